//! Persistence gateway for users and messages.
//!
//! The messaging core only needs four queries from storage, captured by the
//! [`Gateway`] trait. [`MemoryGateway`] is the bundled in-process
//! implementation; account and social-graph management beyond
//! [`MemoryGateway::create_user`] lives outside this crate.

use std::collections::BTreeMap;
use std::future::Future;

use chrono::{DateTime, Utc};
use flux_proto::message::{ChatMessage, MessageId, UserId, UserSummary};
use parking_lot::RwLock;

/// Errors reported by a persistence backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// A uniqueness constraint was violated.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The backend could not complete the operation.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// A stored user account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Account identity.
    pub id: UserId,
    /// Unique handle.
    pub username: String,
    /// Contact address. Never sent over the socket.
    pub email: String,
    /// Number of followers.
    pub followers_count: u32,
    /// Number of followed accounts.
    pub following_count: u32,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Returns the public summary embedded in outbound messages.
    #[must_use]
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            username: self.username.clone(),
            followers_count: self.followers_count,
            following_count: self.following_count,
        }
    }
}

/// A validated message waiting to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    /// Authenticated author.
    pub sender_id: UserId,
    /// Existing recipient.
    pub receiver_id: UserId,
    /// Non-empty text.
    pub content: String,
}

/// A message row as written by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Assigned identifier.
    pub id: MessageId,
    /// Author.
    pub sender_id: UserId,
    /// Recipient.
    pub receiver_id: UserId,
    /// Text.
    pub content: String,
    /// Write timestamp.
    pub created_at: DateTime<Utc>,
}

/// Storage operations the messaging core depends on.
///
/// Implementations must be internally synchronized: every method may be
/// called concurrently from any number of connection tasks.
pub trait Gateway: Send + Sync + 'static {
    /// Looks up a user by id.
    fn user(
        &self,
        id: UserId,
    ) -> impl Future<Output = Result<Option<User>, GatewayError>> + Send;

    /// Durably writes a message, assigning its id and timestamp.
    fn create_message(
        &self,
        message: NewMessage,
    ) -> impl Future<Output = Result<StoredMessage, GatewayError>> + Send;

    /// Loads a message with its sender and receiver summaries expanded.
    fn message_with_users(
        &self,
        id: MessageId,
    ) -> impl Future<Output = Result<Option<ChatMessage>, GatewayError>> + Send;

    /// Returns every message between `a` and `b` in either direction,
    /// oldest first.
    fn conversation(
        &self,
        a: UserId,
        b: UserId,
    ) -> impl Future<Output = Result<Vec<ChatMessage>, GatewayError>> + Send;
}

#[derive(Debug, Default)]
struct MemoryInner {
    users: BTreeMap<UserId, User>,
    messages: BTreeMap<MessageId, StoredMessage>,
    next_user_id: u64,
    next_message_id: u64,
}

impl MemoryInner {
    fn expand(&self, stored: &StoredMessage) -> ChatMessage {
        ChatMessage {
            id: Some(stored.id),
            sender_id: stored.sender_id,
            receiver_id: stored.receiver_id,
            content: stored.content.clone(),
            created_at: stored.created_at,
            sender: self.users.get(&stored.sender_id).map(User::summary),
            receiver: self.users.get(&stored.receiver_id).map(User::summary),
        }
    }
}

/// In-memory [`Gateway`] backed by ordered maps.
///
/// Ids start at 1 so that `0` stays reserved for "unset" and the system user.
/// Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    inner: RwLock<MemoryInner>,
}

impl MemoryGateway {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a user account.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Conflict`] if the username is already taken.
    pub fn create_user(&self, username: &str, email: &str) -> Result<User, GatewayError> {
        let mut inner = self.inner.write();
        if inner.users.values().any(|u| u.username == username) {
            return Err(GatewayError::Conflict(format!(
                "username {username} already exists"
            )));
        }
        inner.next_user_id += 1;
        let user = User {
            id: UserId::new(inner.next_user_id),
            username: username.to_string(),
            email: email.to_string(),
            followers_count: 0,
            following_count: 0,
            created_at: Utc::now(),
        };
        inner.users.insert(user.id, user.clone());
        drop(inner);
        Ok(user)
    }

    /// Returns the number of stored messages.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.inner.read().messages.len()
    }
}

impl Gateway for MemoryGateway {
    async fn user(&self, id: UserId) -> Result<Option<User>, GatewayError> {
        Ok(self.inner.read().users.get(&id).cloned())
    }

    async fn create_message(&self, message: NewMessage) -> Result<StoredMessage, GatewayError> {
        let mut inner = self.inner.write();
        inner.next_message_id += 1;
        let stored = StoredMessage {
            id: MessageId::new(inner.next_message_id),
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            content: message.content,
            created_at: Utc::now(),
        };
        inner.messages.insert(stored.id, stored.clone());
        drop(inner);
        Ok(stored)
    }

    async fn message_with_users(&self, id: MessageId) -> Result<Option<ChatMessage>, GatewayError> {
        let inner = self.inner.read();
        Ok(inner.messages.get(&id).map(|stored| inner.expand(stored)))
    }

    async fn conversation(&self, a: UserId, b: UserId) -> Result<Vec<ChatMessage>, GatewayError> {
        let inner = self.inner.read();
        let mut messages: Vec<ChatMessage> = inner
            .messages
            .values()
            .filter(|m| {
                (m.sender_id == a && m.receiver_id == b) || (m.sender_id == b && m.receiver_id == a)
            })
            .map(|m| inner.expand(m))
            .collect();
        drop(inner);
        messages.sort_by_key(|m| (m.created_at, m.id));
        Ok(messages)
    }
}
