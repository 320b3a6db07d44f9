//! Registry error types.

use mavc_core::{Cid, EncodeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no vehicle with CID {0}")]
    UnknownVehicle(Cid),
    #[error("vehicle {0} has no open stream")]
    NotConnected(Cid),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("registry is shut down")]
    Closed,
}
