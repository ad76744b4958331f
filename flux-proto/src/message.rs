//! Wire format message types for Flux direct messaging.
//!
//! Clients send [`InboundFrame`]s over the socket; the server answers with
//! fully persisted [`ChatMessage`]s carrying the assigned id, timestamp and
//! expanded sender/receiver summaries. Both travel as JSON text frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum allowed message content size in bytes (64 KB).
pub const MAX_CONTENT_LEN: usize = 64 * 1024;

/// Content of the system message sent to every newly admitted connection.
pub const WELCOME_CONTENT: &str = "Connected to chat server";

/// Stable numeric identity of a user account.
///
/// `0` is reserved: it marks an unset receiver on inbound frames and the
/// system as sender on server-originated messages.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(u64);

impl UserId {
    /// The reserved system identity.
    pub const SYSTEM: Self = Self(0);

    /// Creates a user identity from its raw numeric value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns `true` for the reserved zero identity.
    #[must_use]
    pub const fn is_unset(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier assigned to a message by the persistence layer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MessageId(u64);

impl MessageId {
    /// Creates a message identifier from its raw numeric value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Public profile fields embedded in outbound messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    /// Account identity.
    pub id: UserId,
    /// Unique handle.
    pub username: String,
    /// Number of accounts following this user.
    #[serde(default)]
    pub followers_count: u32,
    /// Number of accounts this user follows.
    #[serde(default)]
    pub following_count: u32,
}

/// A chat message as submitted by a client over the socket.
///
/// Missing identity fields decode as [`UserId::SYSTEM`] so that validation,
/// not deserialization, reports what is wrong with the frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundFrame {
    /// Claimed sender. Must match the connection's authenticated identity.
    #[serde(default)]
    pub sender_id: UserId,
    /// Intended recipient.
    #[serde(default)]
    pub receiver_id: UserId,
    /// Message text.
    pub content: String,
}

/// Reason an inbound frame was refused before reaching persistence.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameRejection {
    /// The frame is not a JSON object with the expected fields.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// Message content is empty or whitespace only.
    #[error("message content is empty")]
    EmptyContent,
    /// Message content exceeds the configured maximum size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    ContentTooLong {
        /// Actual size of the content in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
    /// No receiver was given.
    #[error("receiver_id is missing or zero")]
    MissingReceiver,
    /// The frame claims a sender other than the authenticated user.
    #[error("sender_id {claimed} does not match authenticated user {authenticated}")]
    SenderMismatch {
        /// Identity written in the frame.
        claimed: UserId,
        /// Identity proven by the connection's credential.
        authenticated: UserId,
    },
    /// The receiver does not exist.
    #[error("receiver {0} not found")]
    UnknownReceiver(UserId),
}

impl InboundFrame {
    /// Validates this frame for a connection authenticated as `authenticated`.
    ///
    /// The sender check is the trust boundary: the claimed sender is never
    /// taken from the wire without matching the proven identity.
    ///
    /// # Errors
    ///
    /// Returns the first [`FrameRejection`] that applies.
    pub fn validate(&self, authenticated: UserId, max_len: usize) -> Result<(), FrameRejection> {
        if self.sender_id != authenticated {
            return Err(FrameRejection::SenderMismatch {
                claimed: self.sender_id,
                authenticated,
            });
        }
        if self.receiver_id.is_unset() {
            return Err(FrameRejection::MissingReceiver);
        }
        validate_content(&self.content, max_len)
    }
}

/// Checks that message text is non-blank and at most `max_len` bytes.
///
/// # Errors
///
/// Returns [`FrameRejection::EmptyContent`] or
/// [`FrameRejection::ContentTooLong`].
pub fn validate_content(content: &str, max_len: usize) -> Result<(), FrameRejection> {
    if content.trim().is_empty() {
        return Err(FrameRejection::EmptyContent);
    }
    if content.len() > max_len {
        return Err(FrameRejection::ContentTooLong {
            size: content.len(),
            max: max_len,
        });
    }
    Ok(())
}

/// A message as sent from the server to clients and returned by the REST API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Persisted identifier; absent on server-originated system messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    /// Author of the message ([`UserId::SYSTEM`] for system messages).
    pub sender_id: UserId,
    /// Recipient of the message.
    pub receiver_id: UserId,
    /// Message text.
    pub content: String,
    /// When the message was persisted (or generated, for system messages).
    pub created_at: DateTime<Utc>,
    /// Expanded sender profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<UserSummary>,
    /// Expanded receiver profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<UserSummary>,
}

impl ChatMessage {
    /// Builds the system welcome message for a freshly admitted connection.
    #[must_use]
    pub fn welcome(receiver_id: UserId) -> Self {
        Self {
            id: None,
            sender_id: UserId::SYSTEM,
            receiver_id,
            content: WELCOME_CONTENT.to_string(),
            created_at: Utc::now(),
            sender: None,
            receiver: None,
        }
    }

    /// Returns `true` if this message originates from the server itself.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        self.sender_id.is_unset()
    }
}
