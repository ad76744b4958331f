//! REST endpoints around the messaging core.
//!
//! - `POST /messages` sends a message as the bearer of the token.
//! - `GET /messages/conversation?user_id=N` lists the caller's messages with
//!   user `N`, oldest first.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequestParts, Query, State};
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use flux_proto::api::{ConversationQuery, ConversationResponse, MessageResponse, SendMessageRequest};
use flux_proto::message::{FrameRejection, UserId, validate_content};

use crate::error::{ApiError, ChatError};
use crate::gateway::Gateway;
use crate::intake;
use crate::server::ServerState;

/// The authenticated caller of a REST endpoint.
///
/// Extracted from `Authorization: Bearer <jwt>` using the same gate that
/// admits sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub UserId);

impl<G: Gateway> FromRequestParts<Arc<ServerState<G>>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ServerState<G>>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| ApiError::Unauthorized("Authorization header required".to_string()))?;

        state.gate.authenticate(token).map(Self).map_err(|e| {
            tracing::debug!(error = %e, "REST authentication failed");
            ApiError::from(ChatError::Unauthenticated(e))
        })
    }
}

/// Routes served under the shared state.
pub fn routes<G: Gateway>() -> axum::Router<Arc<ServerState<G>>> {
    axum::Router::new()
        .route("/messages", axum::routing::post(send_message::<G>))
        .route(
            "/messages/conversation",
            axum::routing::get(conversation::<G>),
        )
}

/// `POST /messages`: persist a message from the caller and hand it to the
/// hub for live delivery.
async fn send_message<G: Gateway>(
    State(state): State<Arc<ServerState<G>>>,
    AuthUser(sender): AuthUser,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let Json(request) = body.map_err(|e| {
        ApiError::BadRequest(format!("Invalid request format: {}", e.body_text()))
    })?;
    if request.receiver_id.is_unset() {
        return Err(ChatError::from(FrameRejection::MissingReceiver).into());
    }
    validate_content(&request.content, state.max_content_len).map_err(ChatError::from)?;

    let message =
        intake::persist_message(&state.gateway, sender, request.receiver_id, request.content)
            .await
            .inspect_err(|e| tracing::warn!(sender_id = %sender, error = %e, "send failed"))?;

    if let Err(e) = state.hub.submit(message.clone()) {
        tracing::error!(error = %e, "hub submission failed");
    }
    tracing::info!(
        sender_id = %sender,
        receiver_id = %message.receiver_id,
        message_id = ?message.id,
        "message sent over REST"
    );
    Ok((StatusCode::CREATED, Json(MessageResponse { message })))
}

/// `GET /messages/conversation?user_id=N`.
async fn conversation<G: Gateway>(
    State(state): State<Arc<ServerState<G>>>,
    AuthUser(caller): AuthUser,
    Query(query): Query<ConversationQuery>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let raw = query
        .user_id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("user_id query parameter is required".to_string()))?;
    let other = raw
        .parse::<u64>()
        .map(UserId::new)
        .map_err(|_| ApiError::BadRequest("Invalid user_id format".to_string()))?;

    match state.gateway.user(other).await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(ApiError::NotFound("User not found".to_string())),
        Err(e) => {
            tracing::error!(error = %e, "user lookup failed");
            return Err(ApiError::Internal("Failed to verify user".to_string()));
        }
    }

    let messages = state
        .gateway
        .conversation(caller, other)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "conversation query failed");
            ApiError::Internal("Failed to fetch conversation".to_string())
        })?;

    tracing::debug!(
        caller = %caller,
        other = %other,
        count = messages.len(),
        "conversation fetched"
    );
    Ok(Json(ConversationResponse { messages }))
}
