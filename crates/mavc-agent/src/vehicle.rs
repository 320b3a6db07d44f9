//! Interfaces to the flight controller.
//!
//! The agent never talks to firmware directly: actuation and telemetry are
//! provided by the embedding application through these traits.

use mavc_core::Position;
use std::sync::Arc;

use crate::error::ActuatorError;

/// Blocking maneuver primitives.
///
/// Each call returns once the maneuver's completion condition is met (altitude
/// reached, target within a small radius, touched down) or it fails.
pub trait Actuator: Send + Sync + 'static {
    fn arm_and_takeoff(&self, target_alt: f64) -> Result<Position, ActuatorError>;

    fn go_to(&self, lat: f64, lon: f64, alt: f64) -> Result<Position, ActuatorError>;

    fn go_by(&self, north_m: f64, east_m: f64, alt: f64) -> Result<Position, ActuatorError>;

    /// Land at a position; `lat == lon == 0` lands in place.
    fn land(&self, lat: f64, lon: f64) -> Result<(), ActuatorError>;

    fn return_to_base(&self) -> Result<(), ActuatorError>;

    /// Airspeed hint applied before a timed move.
    fn set_airspeed(&self, _speed_mps: f64) -> Result<(), ActuatorError> {
        Ok(())
    }
}

/// Live vehicle readings. Calls must be quick, non-blocking samples.
pub trait Telemetry: Send + Sync + 'static {
    fn current_position(&self) -> Position;

    fn is_armed(&self) -> bool;

    fn flight_mode(&self) -> String;
}

/// Shared handle to a vehicle's actuator and telemetry.
#[derive(Clone)]
pub struct Vehicle {
    pub actuator: Arc<dyn Actuator>,
    pub telemetry: Arc<dyn Telemetry>,
}

impl Vehicle {
    /// One object providing both interfaces.
    pub fn new<V: Actuator + Telemetry>(vehicle: Arc<V>) -> Self {
        Self {
            actuator: vehicle.clone(),
            telemetry: vehicle,
        }
    }

    pub fn from_parts(actuator: Arc<dyn Actuator>, telemetry: Arc<dyn Telemetry>) -> Self {
        Self { actuator, telemetry }
    }
}

impl std::fmt::Debug for Vehicle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vehicle").finish_non_exhaustive()
    }
}

/// Run a blocking actuator call on the blocking pool.
pub(crate) async fn run_blocking<T, F>(call: F) -> Result<T, ActuatorError>
where
    F: FnOnce() -> Result<T, ActuatorError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| ActuatorError::Failed(format!("actuator call aborted: {e}")))?
}
