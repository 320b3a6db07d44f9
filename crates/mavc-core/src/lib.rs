//! MAVC core - protocol types shared by the fleet monitor and vehicle agents.
//!
//! Holds the message envelope codec, the `$$` stream framing, the fleet data
//! model and the small amount of geodesy the geofence needs.

pub mod codec;
pub mod error;
pub mod framing;
pub mod geo;
pub mod models;
pub mod protocol;

pub use codec::{decode, encode, encode_datagram, encode_frame, Message, Payload};
pub use error::{DecodeError, EncodeError};
pub use framing::FrameBuffer;
pub use geo::{offset_position, planar_distance_m};
pub use models::{
    Action, ActionKind, ActionRecord, Arrival, Cid, CidAssignment, Geofence, HomeHint,
    MessageType, Origin, Position, StateReport, VehicleState,
};
