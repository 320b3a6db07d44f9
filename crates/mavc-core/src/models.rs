//! Core data models for the MAVC fleet protocol.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::geo::planar_distance_m;
use crate::protocol::{DRONE_ORIGIN, MONITOR_ORIGIN};

/// Connection ID, assigned once per vehicle at handshake time.
pub type Cid = u32;

/// Which side of the link produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Drone,
    Monitor,
}

impl Origin {
    pub fn as_wire(self) -> &'static str {
        match self {
            Origin::Drone => DRONE_ORIGIN,
            Origin::Monitor => MONITOR_ORIGIN,
        }
    }

    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            DRONE_ORIGIN => Some(Origin::Drone),
            MONITOR_ORIGIN => Some(Origin::Monitor),
            _ => None,
        }
    }
}

/// Closed set of message types carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Vehicle asks the registry for a CID
    RequestCid,
    /// Registry answers with the allocated CID
    AssignCid,
    /// Periodic vehicle state
    ReportState,
    /// Replace the vehicle's geofence
    SetGeofence,
    /// Batch of actions, one record per targeted vehicle
    DispatchActions,
    /// A synchronous action finished
    ActionArrived,
    /// Registry ends the vehicle's session
    Done,
}

impl MessageType {
    pub const ALL: [MessageType; 7] = [
        MessageType::RequestCid,
        MessageType::AssignCid,
        MessageType::ReportState,
        MessageType::SetGeofence,
        MessageType::DispatchActions,
        MessageType::ActionArrived,
        MessageType::Done,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MessageType::RequestCid => "RequestCID",
            MessageType::AssignCid => "AssignCID",
            MessageType::ReportState => "ReportState",
            MessageType::SetGeofence => "SetGeofence",
            MessageType::DispatchActions => "DispatchActions",
            MessageType::ActionArrived => "ActionArrived",
            MessageType::Done => "Done",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.name() == name)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A 3D position as reported by telemetry or returned by an actuator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

impl Position {
    pub fn new(lat: f64, lon: f64, alt: f64) -> Self {
        Self { lat, lon, alt }
    }
}

/// Optional home-position hint sent along with a CID request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HomeHint {
    #[serde(rename = "Lat")]
    pub lat: f64,
    #[serde(rename = "Lon")]
    pub lon: f64,
}

/// Record of an `AssignCID` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CidAssignment {
    #[serde(rename = "CID")]
    pub cid: Cid,
}

/// Record of a `ReportState` message.
///
/// Every field except the CID may be absent; receivers merge what is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateReport {
    #[serde(rename = "CID")]
    pub cid: Cid,
    #[serde(rename = "Armed", default, skip_serializing_if = "Option::is_none")]
    pub armed: Option<bool>,
    #[serde(rename = "Mode", default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(rename = "Lat", default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(rename = "Lon", default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(rename = "Alt", default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<f64>,
}

impl StateReport {
    /// A report with every field populated.
    pub fn full(cid: Cid, armed: bool, mode: impl Into<String>, position: Position) -> Self {
        Self {
            cid,
            armed: Some(armed),
            mode: Some(mode.into()),
            lat: Some(position.lat),
            lon: Some(position.lon),
            alt: Some(position.alt),
        }
    }
}

/// Circular safety boundary around a center point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    /// Radius in meters
    #[serde(rename = "Radius")]
    pub radius_m: f64,
    #[serde(rename = "Lat")]
    pub lat: f64,
    #[serde(rename = "Lon")]
    pub lon: f64,
}

impl Geofence {
    pub fn new(radius_m: f64, lat: f64, lon: f64) -> Self {
        Self { radius_m, lat, lon }
    }

    /// Planar distance from the center to a point.
    pub fn distance_from_center(&self, lat: f64, lon: f64) -> f64 {
        planar_distance_m(self.lat, self.lon, lat, lon)
    }

    /// Whether a point, padded by `margin_m`, falls outside the fence.
    pub fn is_breached(&self, lat: f64, lon: f64, margin_m: f64) -> bool {
        self.distance_from_center(lat, lon) + margin_m > self.radius_m
    }
}

/// One commanded maneuver, as queued on the vehicle.
///
/// `step` only correlates acknowledgements; it never reorders the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "Sync", default)]
    pub sync: bool,
    #[serde(rename = "Step", default)]
    pub step: i64,
    #[serde(flatten)]
    pub kind: ActionKind,
}

impl Action {
    pub fn new(kind: ActionKind, step: i64) -> Self {
        Self {
            sync: false,
            step,
            kind,
        }
    }

    /// Request an `ActionArrived` acknowledgement once this action completes.
    pub fn synced(mut self) -> Self {
        self.sync = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Action_type")]
pub enum ActionKind {
    /// Arm and climb to `alt` meters
    ArmAndTakeoff {
        #[serde(rename = "Alt")]
        alt: f64,
    },
    /// Fly to an absolute position
    GoTo {
        #[serde(rename = "Lat")]
        lat: f64,
        #[serde(rename = "Lon")]
        lon: f64,
        #[serde(rename = "Alt")]
        alt: f64,
        /// Time budget in seconds (0 = keep current airspeed)
        #[serde(rename = "Time", default)]
        time_s: f64,
    },
    /// Fly a relative offset in meters
    GoBy {
        #[serde(rename = "N")]
        north_m: f64,
        #[serde(rename = "E")]
        east_m: f64,
        #[serde(rename = "Alt")]
        alt: f64,
        #[serde(rename = "Time", default)]
        time_s: f64,
    },
    /// Land at a position; 0/0 lands in place
    Land {
        #[serde(rename = "Lat", default)]
        lat: f64,
        #[serde(rename = "Lon", default)]
        lon: f64,
    },
    /// Hold for `time_s` seconds
    Wait {
        #[serde(rename = "Time")]
        time_s: f64,
    },
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::ArmAndTakeoff { .. } => "ArmAndTakeoff",
            ActionKind::GoTo { .. } => "GoTo",
            ActionKind::GoBy { .. } => "GoBy",
            ActionKind::Land { .. } => "Land",
            ActionKind::Wait { .. } => "Wait",
        }
    }

    /// Land in place.
    pub fn land_here() -> Self {
        ActionKind::Land { lat: 0.0, lon: 0.0 }
    }
}

/// One record of a `DispatchActions` batch: an action addressed to a CID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    #[serde(rename = "CID")]
    pub cid: Cid,
    #[serde(flatten)]
    pub action: Action,
}

impl ActionRecord {
    pub fn new(cid: Cid, action: Action) -> Self {
        Self { cid, action }
    }
}

/// Record of an `ActionArrived` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Arrival {
    #[serde(rename = "CID")]
    pub cid: Cid,
    #[serde(rename = "Step")]
    pub step: i64,
}

/// Registry-side snapshot of one connected vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub cid: Cid,
    pub armed: bool,
    pub mode: String,
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    /// Home position hinted during the handshake
    pub home: Option<HomeHint>,
    pub registered_at: DateTime<Utc>,
    /// Time of the last accepted report (None until the first one)
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl VehicleState {
    pub fn new(cid: Cid, home: Option<HomeHint>, now: DateTime<Utc>) -> Self {
        Self {
            cid,
            armed: false,
            mode: String::new(),
            lat: home.map(|h| h.lat).unwrap_or_default(),
            lon: home.map(|h| h.lon).unwrap_or_default(),
            alt: 0.0,
            home,
            registered_at: now,
            last_seen_at: None,
        }
    }

    /// Merge a report: fields absent from the report keep their previous value.
    pub fn apply(&mut self, report: &StateReport, now: DateTime<Utc>) {
        if let Some(armed) = report.armed {
            self.armed = armed;
        }
        if let Some(mode) = &report.mode {
            self.mode = mode.clone();
        }
        if let Some(lat) = report.lat {
            self.lat = lat;
        }
        if let Some(lon) = report.lon {
            self.lon = lon;
        }
        if let Some(alt) = report.alt {
            self.alt = alt;
        }
        self.last_seen_at = Some(now);
    }

    /// True when nothing has been heard for longer than `threshold`.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        let reference = self.last_seen_at.unwrap_or(self.registered_at);
        now - reference > threshold
    }
}
