//! MAVC CLI - operator and simulation tools for the MAVC fleet.
//!
//! - sim_vehicle: simulated vehicle running an agent session
//! - fleet_ctl: inspect and command the fleet through the monitor's HTTP API

pub mod client;
pub mod sim;

pub use client::{FleetClient, VehicleStatus};
pub use sim::{SimConfig, SimVehicle};
