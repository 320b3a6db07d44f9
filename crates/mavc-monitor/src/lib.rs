//! MAVC monitor - ground-station side of the fleet protocol.
//!
//! The [`Registry`] hands out CIDs, keeps the last reported state of every
//! vehicle and fans instruction batches out to their per-vehicle streams.
//! [`api::routes`] exposes it over HTTP.

pub mod api;
pub mod config;
pub mod error;
pub mod registry;

pub use config::Config;
pub use error::RegistryError;
pub use registry::{LinkState, Registry, RegistryEvent, VehicleSnapshot};
