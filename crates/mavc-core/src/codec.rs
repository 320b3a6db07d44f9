//! MAVC message envelope codec.
//!
//! A message is a JSON array whose first element is the header
//! (`{"Header": <origin>, "Type": <type>}`) and whose remaining elements are
//! the typed records for that type.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{DecodeError, EncodeError};
use crate::framing::FrameBuffer;
use crate::models::{
    ActionKind, ActionRecord, Arrival, CidAssignment, Geofence, HomeHint, MessageType, Origin, StateReport,
};
use crate::protocol::MAX_DATAGRAM_BYTES;

/// Typed payload, one variant per message type.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    RequestCid { home: Option<HomeHint> },
    AssignCid(CidAssignment),
    ReportState(StateReport),
    SetGeofence(Geofence),
    DispatchActions(Vec<ActionRecord>),
    ActionArrived(Arrival),
    Done,
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::RequestCid { .. } => MessageType::RequestCid,
            Payload::AssignCid(_) => MessageType::AssignCid,
            Payload::ReportState(_) => MessageType::ReportState,
            Payload::SetGeofence(_) => MessageType::SetGeofence,
            Payload::DispatchActions(_) => MessageType::DispatchActions,
            Payload::ActionArrived(_) => MessageType::ActionArrived,
            Payload::Done => MessageType::Done,
        }
    }
}

/// A complete MAVC message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub origin: Origin,
    pub payload: Payload,
}

impl Message {
    pub fn from_drone(payload: Payload) -> Self {
        Self {
            origin: Origin::Drone,
            payload,
        }
    }

    pub fn from_monitor(payload: Payload) -> Self {
        Self {
            origin: Origin::Monitor,
            payload,
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }
}

/// Serialize a message to its textual wire form.
pub fn encode(message: &Message) -> Result<Vec<u8>, EncodeError> {
    let message_type = message.message_type();
    // JSON has no NaN or infinity; serde_json would write `null` instead.
    if wire_numbers(&message.payload).iter().any(|n| !n.is_finite()) {
        return Err(EncodeError::NonFinite { message_type });
    }
    let checked = |value: serde_json::Result<Value>| {
        value.map_err(|source| EncodeError::Serialize { message_type, source })
    };

    let mut items = vec![json!({
        "Header": message.origin.as_wire(),
        "Type": message_type.name(),
    })];

    match &message.payload {
        Payload::RequestCid { home } => {
            if let Some(home) = home {
                items.push(checked(serde_json::to_value(home))?);
            }
        }
        Payload::AssignCid(assignment) => items.push(checked(serde_json::to_value(assignment))?),
        Payload::ReportState(report) => items.push(checked(serde_json::to_value(report))?),
        Payload::SetGeofence(fence) => items.push(checked(serde_json::to_value(fence))?),
        Payload::DispatchActions(records) => {
            for record in records {
                items.push(checked(serde_json::to_value(record))?);
            }
        }
        Payload::ActionArrived(arrival) => items.push(checked(serde_json::to_value(arrival))?),
        Payload::Done => {}
    }

    serde_json::to_vec(&Value::Array(items))
        .map_err(|source| EncodeError::Serialize { message_type, source })
}

fn wire_numbers(payload: &Payload) -> Vec<f64> {
    match payload {
        Payload::RequestCid { home } => home.iter().flat_map(|h| [h.lat, h.lon]).collect(),
        Payload::ReportState(report) => [report.lat, report.lon, report.alt]
            .into_iter()
            .flatten()
            .collect(),
        Payload::SetGeofence(fence) => vec![fence.radius_m, fence.lat, fence.lon],
        Payload::DispatchActions(records) => records
            .iter()
            .flat_map(|record| match record.action.kind {
                ActionKind::ArmAndTakeoff { alt } => vec![alt],
                ActionKind::GoTo { lat, lon, alt, time_s } => vec![lat, lon, alt, time_s],
                ActionKind::GoBy {
                    north_m,
                    east_m,
                    alt,
                    time_s,
                } => vec![north_m, east_m, alt, time_s],
                ActionKind::Land { lat, lon } => vec![lat, lon],
                ActionKind::Wait { time_s } => vec![time_s],
            })
            .collect(),
        Payload::AssignCid(_) | Payload::ActionArrived(_) | Payload::Done => Vec::new(),
    }
}

/// Encode for a connectionless channel, refusing anything over the datagram limit.
pub fn encode_datagram(message: &Message) -> Result<Vec<u8>, EncodeError> {
    let bytes = encode(message)?;
    if bytes.len() > MAX_DATAGRAM_BYTES {
        return Err(EncodeError::Oversize {
            size: bytes.len(),
            limit: MAX_DATAGRAM_BYTES,
        });
    }
    Ok(bytes)
}

/// Encode for a stream channel, terminator appended.
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, EncodeError> {
    Ok(FrameBuffer::frame(encode(message)?))
}

/// Parse a wire payload back into a message.
pub fn decode(bytes: &[u8]) -> Result<Message, DecodeError> {
    let value: Value = serde_json::from_slice(bytes).map_err(DecodeError::NotJson)?;
    let Value::Array(items) = value else {
        return Err(DecodeError::NotAnArray);
    };
    let Some((header, records)) = items.split_first() else {
        return Err(DecodeError::MissingHeader);
    };
    let header = header.as_object().ok_or(DecodeError::MissingHeader)?;

    let origin = header
        .get("Header")
        .and_then(Value::as_str)
        .and_then(Origin::from_wire)
        .ok_or(DecodeError::UnknownOrigin)?;
    let message_type = header
        .get("Type")
        .and_then(Value::as_str)
        .and_then(MessageType::from_name)
        .ok_or(DecodeError::UnknownType)?;

    let payload = match message_type {
        MessageType::RequestCid => Payload::RequestCid {
            // The hint is advisory; a garbled one is dropped, not fatal.
            home: records
                .first()
                .and_then(|record| HomeHint::deserialize(record).ok()),
        },
        MessageType::AssignCid => Payload::AssignCid(required(message_type, records)?),
        MessageType::ReportState => Payload::ReportState(required(message_type, records)?),
        MessageType::SetGeofence => Payload::SetGeofence(required(message_type, records)?),
        MessageType::DispatchActions => Payload::DispatchActions(
            records
                .iter()
                .filter_map(|record| match ActionRecord::deserialize(record) {
                    Ok(action) => Some(action),
                    Err(e) => {
                        tracing::debug!(error = %e, "Skipping malformed action record");
                        None
                    }
                })
                .collect(),
        ),
        MessageType::ActionArrived => Payload::ActionArrived(required(message_type, records)?),
        MessageType::Done => Payload::Done,
    };

    Ok(Message { origin, payload })
}

fn required<T: DeserializeOwned>(
    message_type: MessageType,
    records: &[Value],
) -> Result<T, DecodeError> {
    let record = records.first().ok_or_else(|| DecodeError::BadRecord {
        message_type,
        reason: "record missing".to_string(),
    })?;
    T::deserialize(record).map_err(|e| DecodeError::BadRecord {
        message_type,
        reason: e.to_string(),
    })
}
