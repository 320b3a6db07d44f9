//! Vehicle endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use mavc_core::{ActionRecord, Cid, Geofence};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::RegistryError;
use crate::registry::{Registry, VehicleSnapshot};

#[derive(Debug, Serialize)]
pub struct VehicleView {
    #[serde(flatten)]
    pub snapshot: VehicleSnapshot,
    /// Nothing heard within the configured staleness window
    pub stale: bool,
}

impl VehicleView {
    fn new(registry: &Registry, snapshot: VehicleSnapshot) -> Self {
        let stale = registry.is_stale(&snapshot.state);
        Self { snapshot, stale }
    }
}

/// Request body for a dispatch: records in the wire layout.
#[derive(Debug, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub actions: Vec<ActionRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub recipients: Vec<Cid>,
}

fn status_for(err: &RegistryError) -> StatusCode {
    match err {
        RegistryError::UnknownVehicle(_) => StatusCode::NOT_FOUND,
        RegistryError::NotConnected(_) => StatusCode::CONFLICT,
        RegistryError::Closed => StatusCode::SERVICE_UNAVAILABLE,
        RegistryError::Encode(_) => StatusCode::UNPROCESSABLE_ENTITY,
        RegistryError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(err: RegistryError) -> StatusCode {
    tracing::debug!(error = %err, "Request rejected");
    status_for(&err)
}

/// GET /v1/vehicles
pub async fn list_vehicles(State(registry): State<Arc<Registry>>) -> Json<Vec<VehicleView>> {
    let views = registry
        .snapshots()
        .into_iter()
        .map(|snapshot| VehicleView::new(&registry, snapshot))
        .collect();
    Json(views)
}

/// GET /v1/vehicles/:cid
pub async fn get_vehicle(
    State(registry): State<Arc<Registry>>,
    Path(cid): Path<Cid>,
) -> Result<Json<VehicleView>, StatusCode> {
    registry
        .snapshot(cid)
        .map(|snapshot| Json(VehicleView::new(&registry, snapshot)))
        .ok_or(StatusCode::NOT_FOUND)
}

/// POST /v1/dispatch
pub async fn dispatch(
    State(registry): State<Arc<Registry>>,
    Json(request): Json<DispatchRequest>,
) -> Result<Json<DispatchResponse>, StatusCode> {
    let recipients = registry.dispatch(request.actions).map_err(reject)?;
    Ok(Json(DispatchResponse { recipients }))
}

/// POST /v1/vehicles/:cid/geofence
pub async fn set_geofence(
    State(registry): State<Arc<Registry>>,
    Path(cid): Path<Cid>,
    Json(fence): Json<Geofence>,
) -> StatusCode {
    if !fence.radius_m.is_finite() || fence.radius_m <= 0.0 {
        return StatusCode::BAD_REQUEST;
    }
    match registry.set_geofence(cid, fence) {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(err) => reject(err),
    }
}

/// DELETE /v1/vehicles/:cid
pub async fn close_vehicle(
    State(registry): State<Arc<Registry>>,
    Path(cid): Path<Cid>,
) -> StatusCode {
    match registry.close_vehicle(cid) {
        Ok(_) => StatusCode::NO_CONTENT,
        Err(err) => reject(err),
    }
}
