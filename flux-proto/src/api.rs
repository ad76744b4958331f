//! Request and response bodies for the REST messaging endpoints.

use serde::{Deserialize, Serialize};

use crate::message::{ChatMessage, UserId};

/// Body of `POST /messages`. The sender is the authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    /// Intended recipient.
    pub receiver_id: UserId,
    /// Message text.
    pub content: String,
}

/// Response of `POST /messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    /// The persisted message with expanded users.
    pub message: ChatMessage,
}

/// Response of `GET /messages/conversation`, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationResponse {
    /// Messages exchanged between the two participants.
    pub messages: Vec<ChatMessage>,
}

/// Query string of `GET /messages/conversation`.
///
/// Kept as a raw string so that a missing or malformed value maps to a
/// JSON `400` instead of the framework's plain-text rejection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationQuery {
    /// The other participant.
    pub user_id: Option<String>,
}

/// Uniform error body for every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable error description.
    pub error: String,
}

impl ErrorBody {
    /// Creates an error body from any displayable message.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
