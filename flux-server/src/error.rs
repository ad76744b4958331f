//! Error types for the messaging core and its REST surface.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use flux_proto::api::ErrorBody;
use flux_proto::message::FrameRejection;

use crate::auth::AuthError;
use crate::gateway::GatewayError;
use crate::registry::ConnectionId;

/// Failures in the socket messaging path.
///
/// Only [`ChatError::Unauthenticated`] and [`ChatError::ConnectionLost`] end
/// a connection (or prevent it). Everything else is contained to the frame
/// or recipient it happened to.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The credential was missing, malformed, expired or forged.
    #[error("unauthenticated: {0}")]
    Unauthenticated(#[from] AuthError),

    /// The frame was malformed or failed validation and was dropped.
    #[error("frame rejected: {0}")]
    ValidationFailed(#[from] FrameRejection),

    /// The durable write (or the lookup around it) failed.
    #[error("persistence failed: {0}")]
    PersistenceFailed(#[from] GatewayError),

    /// Writing to a recipient connection failed; the peer is gone.
    #[error("delivery to connection {0} failed")]
    DeliveryFailed(ConnectionId),

    /// The transport failed or the peer went away.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

/// Error returned by REST handlers, rendered as `{ "error": ... }`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 400: the request was malformed.
    #[error("{0}")]
    BadRequest(String),
    /// 401: no or invalid credential.
    #[error("{0}")]
    Unauthorized(String),
    /// 404: a referenced record does not exist.
    #[error("{0}")]
    NotFound(String),
    /// 409: a uniqueness constraint was violated.
    #[error("{0}")]
    Conflict(String),
    /// 500: the server failed to complete the request.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status code for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorBody::new(self.to_string()))).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Unauthenticated(e) => Self::Unauthorized(e.public_message().to_string()),
            ChatError::ValidationFailed(FrameRejection::UnknownReceiver(_)) => {
                Self::NotFound("Receiver not found".to_string())
            }
            ChatError::ValidationFailed(rejection) => Self::BadRequest(rejection.to_string()),
            ChatError::PersistenceFailed(GatewayError::Conflict(reason)) => Self::Conflict(reason),
            ChatError::PersistenceFailed(_) => Self::Internal("Failed to send message".to_string()),
            ChatError::DeliveryFailed(_) | ChatError::ConnectionLost(_) => {
                Self::Internal("Internal server error".to_string())
            }
        }
    }
}
