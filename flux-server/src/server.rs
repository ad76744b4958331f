//! Server bootstrap: shared state, router, socket upgrade and listener.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::api;
use crate::auth::{AuthError, AuthGate};
use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::gateway::Gateway;
use crate::hub::{self, Hub, HubHandle};
use crate::intake;
use crate::registry::ConnectionRegistry;

/// State shared by every request handler, intake loop and the hub.
///
/// Built once at startup and injected everywhere; tests build their own
/// isolated instances.
#[derive(Debug)]
pub struct ServerState<G> {
    /// Bearer token verifier.
    pub gate: AuthGate,
    /// Live connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Submission side of the dispatch queue.
    pub hub: HubHandle,
    /// Storage for users and messages.
    pub gateway: G,
    /// Maximum message content size in bytes.
    pub max_content_len: usize,
    /// Undecodable frames tolerated per connection.
    pub max_invalid_frames: u32,
}

impl<G: Gateway> ServerState<G> {
    /// Creates the state and the hub that must be spawned alongside it.
    #[must_use]
    pub fn new(config: &ServerConfig, gateway: G) -> (Self, Hub) {
        let registry = Arc::new(ConnectionRegistry::new());
        let (hub_handle, hub) = hub::channel(Arc::clone(&registry));
        let state = Self {
            gate: AuthGate::new(config.jwt_secret.as_bytes()),
            registry,
            hub: hub_handle,
            gateway,
            max_content_len: config.max_content_len,
            max_invalid_frames: config.max_invalid_frames,
        };
        (state, hub)
    }
}

/// A server started by [`start_server`].
#[derive(Debug)]
pub struct RunningServer<G> {
    /// Address the listener is bound to.
    pub addr: SocketAddr,
    /// Shared state, for inspection.
    pub state: Arc<ServerState<G>>,
    /// The HTTP server task.
    pub handle: tokio::task::JoinHandle<()>,
    /// The dispatch hub task.
    pub hub: tokio::task::JoinHandle<()>,
}

/// Builds the full router: the socket endpoint plus the REST routes.
pub fn router<G: Gateway>(state: Arc<ServerState<G>>) -> axum::Router {
    axum::Router::new()
        .route("/ws/connect", axum::routing::get(ws_handler::<G>))
        .merge(api::routes::<G>())
        .with_state(state)
}

/// Binds `config.bind_addr`, spawns the hub and serves the router.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server<G: Gateway>(
    config: &ServerConfig,
    gateway: G,
) -> Result<RunningServer<G>, Box<dyn std::error::Error + Send + Sync>> {
    let (state, hub) = ServerState::new(config, gateway);
    let state = Arc::new(state);
    let app = router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    let addr = listener.local_addr()?;

    let hub = tokio::spawn(hub.run());
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok(RunningServer {
        addr,
        state,
        handle,
        hub,
    })
}

/// Query string of the socket endpoint.
#[derive(Debug, Deserialize)]
struct ConnectQuery {
    token: Option<String>,
}

/// `GET /ws/connect?token=JWT`.
///
/// Authenticates before upgrading: a refused credential gets a `401` JSON
/// body and the connection is never upgraded or registered.
async fn ws_handler<G: Gateway>(
    State(state): State<Arc<ServerState<G>>>,
    query: Result<Query<ConnectQuery>, QueryRejection>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let auth = match query {
        Ok(Query(ConnectQuery { token: Some(token) })) => state.gate.authenticate(&token),
        Ok(Query(ConnectQuery { token: None })) => Err(AuthError::MissingToken),
        Err(rejection) => {
            tracing::debug!(error = %rejection.body_text(), "unreadable socket query string");
            Err(AuthError::Invalid(
                jsonwebtoken::errors::ErrorKind::InvalidToken.into(),
            ))
        }
    };
    let user_id = match auth {
        Ok(user_id) => user_id,
        Err(e) => {
            tracing::warn!(error = %e, "socket authentication failed");
            return ApiError::Unauthorized(e.public_message().to_string()).into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    tracing::info!(user_id = %user_id, "socket authenticated, upgrading");
    ws.on_upgrade(move |socket| intake::run_connection(socket, state, user_id))
}
