//! JSON serialization for socket frames.
//!
//! Every socket frame is a single JSON object in a WebSocket text frame.
//! Binary frames carrying UTF-8 JSON are accepted on the inbound side.

use crate::message::{ChatMessage, InboundFrame};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Encodes an outbound [`ChatMessage`] as a JSON string.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the message cannot be serialized.
pub fn encode(message: &ChatMessage) -> Result<String, CodecError> {
    Ok(serde_json::to_string(message)?)
}

/// Decodes an [`InboundFrame`] from JSON bytes.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes are not a JSON object
/// with the expected fields.
pub fn decode_inbound(bytes: &[u8]) -> Result<InboundFrame, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Decodes an outbound [`ChatMessage`] from JSON bytes.
///
/// Used by clients and tests reading what the server sends.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes are not a valid message.
pub fn decode_outbound(bytes: &[u8]) -> Result<ChatMessage, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}
