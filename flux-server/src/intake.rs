//! Per-connection intake loop.
//!
//! The connection lifecycle:
//! 1. Register the connection under its authenticated user.
//! 2. Send the system welcome message straight to the socket.
//! 3. Spawn a writer task forwarding the connection's channel to the socket.
//! 4. Read frames: validate, persist, and hand accepted messages to the hub.
//!    A bad frame is logged and dropped; the connection stays open.
//! 5. On peer close, transport error, writer failure or too many undecodable
//!    frames, unregister the connection.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use flux_proto::codec;
use flux_proto::message::{ChatMessage, FrameRejection, UserId};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::error::ChatError;
use crate::gateway::{Gateway, GatewayError, NewMessage};
use crate::registry::ConnectionId;
use crate::server::ServerState;

/// Why a connection's read loop ended.
#[derive(Debug)]
enum Termination {
    /// The peer sent a close frame or the stream ended.
    PeerClosed,
    /// Too many frames could not be decoded.
    ProtocolViolation(u32),
    /// Reading from the socket failed.
    Lost(ChatError),
}

/// Drives one authenticated connection until it terminates.
pub async fn run_connection<G: Gateway>(
    socket: WebSocket,
    state: Arc<ServerState<G>>,
    user_id: UserId,
) {
    let (mut ws_sender, ws_receiver) = socket.split();
    let connection_id = ConnectionId::new();

    // Channel the hub writes into; the writer task drains it to the socket.
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    state.registry.register(connection_id, user_id, tx).await;
    tracing::info!(
        user_id = %user_id,
        connection_id = %connection_id,
        "connection registered"
    );

    if let Err(e) = send_welcome(&mut ws_sender, user_id).await {
        tracing::warn!(
            user_id = %user_id,
            connection_id = %connection_id,
            error = %e,
            "failed to send welcome message"
        );
        state.registry.unregister(connection_id).await;
        return;
    }

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(connection_id = %connection_id, "WebSocket write failed");
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let mut read_task =
        tokio::spawn(
            async move { read_frames(ws_receiver, &reader_state, connection_id, user_id).await },
        );

    tokio::select! {
        outcome = &mut read_task => {
            write_task.abort();
            match outcome {
                Ok(Termination::PeerClosed) => {
                    tracing::info!(user_id = %user_id, connection_id = %connection_id, "peer closed connection");
                }
                Ok(Termination::ProtocolViolation(count)) => {
                    tracing::warn!(
                        user_id = %user_id,
                        connection_id = %connection_id,
                        invalid_frames = count,
                        "closing connection after repeated malformed frames"
                    );
                }
                Ok(Termination::Lost(e)) => {
                    tracing::warn!(user_id = %user_id, connection_id = %connection_id, error = %e, "connection terminated");
                }
                Err(e) => {
                    tracing::error!(connection_id = %connection_id, error = %e, "reader task failed");
                }
            }
        }
        _ = &mut write_task => {
            read_task.abort();
            tracing::info!(user_id = %user_id, connection_id = %connection_id, "writer closed, terminating connection");
        }
    }

    state.registry.unregister(connection_id).await;
    tracing::info!(
        user_id = %user_id,
        connection_id = %connection_id,
        "connection unregistered"
    );
}

/// Encodes and sends the system welcome directly on the socket.
async fn send_welcome(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    user_id: UserId,
) -> Result<(), ChatError> {
    let json = codec::encode(&ChatMessage::welcome(user_id))
        .map_err(|e| ChatError::ConnectionLost(e.to_string()))?;
    ws_sender
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| ChatError::ConnectionLost(e.to_string()))
}

/// Reads frames until the connection ends, submitting accepted messages.
async fn read_frames<G: Gateway>(
    mut receiver: impl StreamExt<Item = Result<Message, axum::Error>> + Unpin,
    state: &ServerState<G>,
    connection_id: ConnectionId,
    user_id: UserId,
) -> Termination {
    let mut malformed = 0u32;
    loop {
        let outcome = match receiver.next().await {
            None | Some(Ok(Message::Close(_))) => return Termination::PeerClosed,
            Some(Err(e)) => return Termination::Lost(ChatError::ConnectionLost(e.to_string())),
            Some(Ok(Message::Text(text))) => {
                accept_frame(
                    &state.gateway,
                    user_id,
                    text.as_str().as_bytes(),
                    state.max_content_len,
                )
                .await
            }
            Some(Ok(Message::Binary(data))) => {
                accept_frame(&state.gateway, user_id, &data, state.max_content_len).await
            }
            Some(Ok(_)) => continue,
        };

        match outcome {
            Ok(message) => {
                tracing::debug!(
                    user_id = %user_id,
                    message_id = ?message.id,
                    receiver_id = %message.receiver_id,
                    "message persisted, submitting to hub"
                );
                if let Err(e) = state.hub.submit(message) {
                    tracing::error!(connection_id = %connection_id, error = %e, "hub submission failed");
                }
            }
            Err(ChatError::ValidationFailed(FrameRejection::Malformed(reason))) => {
                malformed += 1;
                tracing::warn!(
                    user_id = %user_id,
                    connection_id = %connection_id,
                    reason = %reason,
                    malformed,
                    "dropping malformed frame"
                );
                if malformed >= state.max_invalid_frames {
                    return Termination::ProtocolViolation(malformed);
                }
            }
            Err(ChatError::PersistenceFailed(e)) => {
                tracing::error!(
                    user_id = %user_id,
                    connection_id = %connection_id,
                    error = %e,
                    "failed to persist message, dropping frame"
                );
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    connection_id = %connection_id,
                    error = %e,
                    "dropping frame"
                );
            }
        }
    }
}

/// Turns one raw inbound frame from `sender` into a persisted, expanded
/// message ready for dispatch.
///
/// # Errors
///
/// Returns [`ChatError::ValidationFailed`] for malformed, spoofed, empty or
/// misaddressed frames, or [`ChatError::PersistenceFailed`] if storage
/// fails. Nothing is written unless every check passes.
pub async fn accept_frame<G: Gateway>(
    gateway: &G,
    sender: UserId,
    bytes: &[u8],
    max_content_len: usize,
) -> Result<ChatMessage, ChatError> {
    let frame = codec::decode_inbound(bytes)
        .map_err(|e| FrameRejection::Malformed(e.to_string()))?;
    frame.validate(sender, max_content_len)?;
    persist_message(gateway, sender, frame.receiver_id, frame.content).await
}

/// Checks the receiver exists, writes the message and reloads it with
/// sender and receiver summaries.
///
/// `sender` must already be the authenticated identity and `content` must
/// already be validated.
///
/// # Errors
///
/// Returns [`FrameRejection::UnknownReceiver`] (as
/// [`ChatError::ValidationFailed`]) or [`ChatError::PersistenceFailed`].
pub async fn persist_message<G: Gateway>(
    gateway: &G,
    sender: UserId,
    receiver: UserId,
    content: String,
) -> Result<ChatMessage, ChatError> {
    if gateway.user(receiver).await?.is_none() {
        return Err(FrameRejection::UnknownReceiver(receiver).into());
    }

    let stored = gateway
        .create_message(NewMessage {
            sender_id: sender,
            receiver_id: receiver,
            content,
        })
        .await?;

    gateway
        .message_with_users(stored.id)
        .await?
        .ok_or_else(|| {
            GatewayError::Unavailable(format!("message {} missing after write", stored.id)).into()
        })
}
