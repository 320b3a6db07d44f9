//! Agent error types.

use mavc_core::{Cid, EncodeError};
use std::net::SocketAddr;
use thiserror::Error;

/// A maneuver that did not complete.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActuatorError {
    /// The maneuver was rejected or aborted; the session carries on.
    #[error("maneuver failed: {0}")]
    Failed(String),
    /// The link to the flight controller is gone; the session must close.
    #[error("connection to the vehicle was lost")]
    ConnectionLost,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no CID assignment from {monitor} after {attempts} attempt(s)")]
    HandshakeExhausted { monitor: SocketAddr, attempts: u32 },
    #[error("monitor host {0} did not resolve to an address")]
    Resolve(String),
    #[error("CID {cid} does not map to a port above base {base_port}")]
    PortOutOfRange { cid: Cid, base_port: u16 },
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}
