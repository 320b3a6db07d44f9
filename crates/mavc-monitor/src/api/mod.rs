//! HTTP status and control API for the registry.

mod vehicles;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use crate::registry::Registry;

pub use vehicles::{DispatchRequest, DispatchResponse, VehicleView};

/// Create the API router.
pub fn routes() -> Router<Arc<Registry>> {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/v1/vehicles", get(vehicles::list_vehicles))
        .route(
            "/v1/vehicles/:cid",
            get(vehicles::get_vehicle).delete(vehicles::close_vehicle),
        )
        .route("/v1/vehicles/:cid/geofence", post(vehicles::set_geofence))
        .route("/v1/dispatch", post(vehicles::dispatch))
}
