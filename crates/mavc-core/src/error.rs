//! Codec error types.

use thiserror::Error;

use crate::models::MessageType;

/// A payload that is not a well-formed MAVC message.
///
/// Receivers treat every variant as "not for us": log, discard, keep listening.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    NotJson(#[source] serde_json::Error),
    #[error("payload is not a JSON array")]
    NotAnArray,
    #[error("message header is missing")]
    MissingHeader,
    #[error("header origin is missing or unrecognized")]
    UnknownOrigin,
    #[error("header type is missing or unrecognized")]
    UnknownType,
    #[error("{message_type} record is missing or malformed: {reason}")]
    BadRecord {
        message_type: MessageType,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to serialize {message_type} message: {source}")]
    Serialize {
        message_type: MessageType,
        #[source]
        source: serde_json::Error,
    },
    #[error("{message_type} message carries a non-finite number")]
    NonFinite { message_type: MessageType },
    #[error("datagram of {size} bytes exceeds the {limit}-byte limit")]
    Oversize { size: usize, limit: usize },
}
