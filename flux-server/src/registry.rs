//! Registry of live socket connections and the users they belong to.
//!
//! Every admitted connection has exactly one entry, keyed by its
//! [`ConnectionId`], from the moment its intake loop starts until it
//! terminates (or a delivery write to it fails). A user may hold any number
//! of entries at once; all of them receive that user's messages.
//!
//! The map is guarded by a [`RwLock`], so registration from many intake loops
//! and snapshot reads from the dispatch hub are linearizable.

use std::collections::{HashMap, HashSet};

use axum::extract::ws::Message;
use flux_proto::message::UserId;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::error::ChatError;

/// Sender half of a connection's outbound channel.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

/// Opaque identity of one live connection (UUID v7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Mints a fresh connection identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered connection: who it belongs to and how to write to it.
///
/// The registry only holds the channel sender; the socket itself is owned
/// by the connection's writer task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Connection identity.
    pub id: ConnectionId,
    /// Authenticated owner, fixed for the connection's lifetime.
    pub user_id: UserId,
    sender: ConnectionSender,
}

impl ConnectionHandle {
    /// Queues a frame for this connection without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::DeliveryFailed`] if the connection's writer has
    /// gone away.
    pub fn send(&self, message: Message) -> Result<(), ChatError> {
        self.sender
            .send(message)
            .map_err(|_| ChatError::DeliveryFailed(self.id))
    }
}

/// Concurrent map from live connection to authenticated user.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, ConnectionHandle>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection for `user_id`.
    ///
    /// Re-registering the same connection id replaces its entry; the previous
    /// handle is returned.
    pub async fn register(
        &self,
        id: ConnectionId,
        user_id: UserId,
        sender: ConnectionSender,
    ) -> Option<ConnectionHandle> {
        let handle = ConnectionHandle {
            id,
            user_id,
            sender,
        };
        let mut conns = self.connections.write().await;
        conns.insert(id, handle)
    }

    /// Removes a connection, returning its handle if it was registered.
    pub async fn unregister(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        let mut conns = self.connections.write().await;
        conns.remove(&id)
    }

    /// Snapshot of every connection currently registered for `user_id`.
    pub async fn connections_for(&self, user_id: UserId) -> Vec<ConnectionHandle> {
        let conns = self.connections.read().await;
        conns
            .values()
            .filter(|h| h.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Returns `true` if `user_id` has at least one live connection.
    pub async fn is_online(&self, user_id: UserId) -> bool {
        let conns = self.connections.read().await;
        conns.values().any(|h| h.user_id == user_id)
    }

    /// Every user with at least one live connection.
    pub async fn online_identities(&self) -> HashSet<UserId> {
        let conns = self.connections.read().await;
        conns.values().map(|h| h.user_id).collect()
    }

    /// Number of live connections across all users.
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Returns `true` if no connection is registered.
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}
