//! Dispatch hub: fans persisted messages out to their recipient's sockets.
//!
//! A single [`Hub`] task drains an unbounded queue fed by every intake loop
//! through cloned [`HubHandle`]s. The queue has no backpressure: a flood of
//! inbound messages grows it without limit. Messages are processed in
//! submission order, so frames from one connection stay FIFO.
//!
//! Delivery is one best-effort attempt per recipient connection. A failed
//! write unregisters that connection and does not affect the others.
//! Messages for users with no live connection are dropped here; they are
//! already persisted and reachable through the conversation endpoint.

use std::sync::Arc;

use axum::extract::ws::Message;
use flux_proto::codec;
use flux_proto::message::ChatMessage;
use tokio::sync::mpsc;

use crate::registry::ConnectionRegistry;

/// The hub's queue has been closed; the hub task is gone.
#[derive(Debug, thiserror::Error)]
#[error("dispatch hub is not running")]
pub struct HubClosed;

/// Cloneable submission side of the hub queue.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<ChatMessage>,
}

impl HubHandle {
    /// Enqueues a persisted message for fan-out. Never waits.
    ///
    /// # Errors
    ///
    /// Returns [`HubClosed`] if the hub task has stopped.
    pub fn submit(&self, message: ChatMessage) -> Result<(), HubClosed> {
        self.tx.send(message).map_err(|_| HubClosed)
    }
}

/// Outcome of fanning out one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Connections the frame was queued on.
    pub delivered: usize,
    /// Connections whose write failed and were unregistered.
    pub failed: usize,
}

/// The consumer side of the hub queue.
#[derive(Debug)]
pub struct Hub {
    rx: mpsc::UnboundedReceiver<ChatMessage>,
    registry: Arc<ConnectionRegistry>,
}

/// Creates a hub bound to `registry` and the handle used to feed it.
#[must_use]
pub fn channel(registry: Arc<ConnectionRegistry>) -> (HubHandle, Hub) {
    let (tx, rx) = mpsc::unbounded_channel();
    (HubHandle { tx }, Hub { rx, registry })
}

impl Hub {
    /// Runs until every [`HubHandle`] has been dropped.
    pub async fn run(mut self) {
        tracing::info!("dispatch hub started");
        while let Some(message) = self.rx.recv().await {
            let report = dispatch(&self.registry, &message).await;
            tracing::debug!(
                message_id = ?message.id,
                sender_id = %message.sender_id,
                receiver_id = %message.receiver_id,
                delivered = report.delivered,
                failed = report.failed,
                "message dispatched"
            );
        }
        tracing::info!("dispatch hub stopped");
    }
}

/// Writes `message` to every connection registered for its receiver.
///
/// The registry lock is only held while taking the snapshot, never while
/// writing, so intake loops can register and unregister concurrently.
pub async fn dispatch(registry: &ConnectionRegistry, message: &ChatMessage) -> DeliveryReport {
    let json = match codec::encode(message) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode message for dispatch");
            return DeliveryReport::default();
        }
    };
    let frame = Message::Text(json.into());

    let mut report = DeliveryReport::default();
    for conn in registry.connections_for(message.receiver_id).await {
        match conn.send(frame.clone()) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                tracing::warn!(
                    connection_id = %conn.id,
                    user_id = %conn.user_id,
                    error = %e,
                    "delivery failed, unregistering connection"
                );
                registry.unregister(conn.id).await;
                report.failed += 1;
            }
        }
    }

    if report.delivered == 0 && report.failed == 0 {
        tracing::debug!(
            receiver_id = %message.receiver_id,
            "receiver offline, live delivery skipped"
        );
    }
    report
}
