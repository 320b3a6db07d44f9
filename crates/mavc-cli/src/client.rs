//! Blocking HTTP client for the monitor API.

use anyhow::{bail, Context, Result};
use mavc_core::{ActionRecord, Cid, Geofence};
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// One vehicle as listed by the monitor.
#[derive(Debug, Clone, Deserialize)]
pub struct VehicleStatus {
    pub cid: Cid,
    pub armed: bool,
    pub mode: String,
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub link: String,
    pub stale: bool,
    #[serde(default)]
    pub last_seen_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct DispatchRequest<'a> {
    actions: &'a [ActionRecord],
}

#[derive(Debug, Deserialize)]
struct DispatchResponse {
    recipients: Vec<Cid>,
}

pub struct FleetClient {
    client: Client,
    base_url: String,
}

impl FleetClient {
    /// `base_url` is the monitor API root, e.g. "http://localhost:3000".
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn vehicles(&self) -> Result<Vec<VehicleStatus>> {
        let response = self
            .client
            .get(self.url("/v1/vehicles"))
            .send()
            .context("Failed to reach monitor")?;
        check(response)?.json().context("Invalid vehicle list")
    }

    pub fn vehicle(&self, cid: Cid) -> Result<VehicleStatus> {
        let response = self
            .client
            .get(self.url(&format!("/v1/vehicles/{cid}")))
            .send()
            .context("Failed to reach monitor")?;
        check(response)?.json().context("Invalid vehicle status")
    }

    /// Send a batch; returns the vehicles it went to.
    pub fn dispatch(&self, actions: &[ActionRecord]) -> Result<Vec<Cid>> {
        let response = self
            .client
            .post(self.url("/v1/dispatch"))
            .json(&DispatchRequest { actions })
            .send()
            .context("Failed to reach monitor")?;
        let body: DispatchResponse = check(response)?.json().context("Invalid dispatch response")?;
        Ok(body.recipients)
    }

    pub fn set_geofence(&self, cid: Cid, fence: &Geofence) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/v1/vehicles/{cid}/geofence")))
            .json(fence)
            .send()
            .context("Failed to reach monitor")?;
        check(response).map(drop)
    }

    pub fn close(&self, cid: Cid) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/v1/vehicles/{cid}")))
            .send()
            .context("Failed to reach monitor")?;
        check(response).map(drop)
    }
}

fn check(response: Response) -> Result<Response> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::NOT_FOUND => bail!("no such vehicle"),
        StatusCode::CONFLICT => bail!("vehicle is not connected"),
        status => bail!("monitor returned {status}"),
    }
}
