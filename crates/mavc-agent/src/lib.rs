//! MAVC agent - vehicle side of the fleet protocol.
//!
//! A [`VehicleSession`] negotiates a CID with the monitor, then runs the
//! reporter, listener and executor loops against a [`Vehicle`] until it is
//! closed or the monitor goes away.

mod backoff;
pub mod config;
pub mod error;
pub mod executor;
pub mod geofence;
pub mod handshake;
pub mod listener;
pub mod queue;
pub mod reporter;
pub mod session;
pub mod vehicle;

pub use config::AgentConfig;
pub use error::{ActuatorError, SessionError};
pub use handshake::{request_cid, Handshake};
pub use queue::ActionQueue;
pub use session::{SessionState, VehicleSession};
pub use vehicle::{Actuator, Telemetry, Vehicle};
