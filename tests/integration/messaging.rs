// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! End-to-end tests for live socket messaging.
//!
//! Each test starts a real server on an OS-assigned port and drives it with
//! `tokio-tungstenite` clients. These tests validate:
//! - authentication before upgrade (401 for missing or forged tokens)
//! - the welcome message on connect
//! - live delivery to every connection of the receiver
//! - spoofed senders are dropped without closing the connection
//! - offline receivers: persisted, not delivered
//! - unregistration on disconnect and after repeated malformed frames
//! - REST sends are delivered live too
//! - a frame failing on its own (storage, decoding) leaves the connection open

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use flux_proto::codec;
use flux_proto::message::{ChatMessage, MessageId, UserId, WELCOME_CONTENT};
use flux_server::config::ServerConfig;
use flux_server::gateway::{
    Gateway, GatewayError, MemoryGateway, NewMessage, StoredMessage, User,
};
use flux_server::server::{self, RunningServer};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;
use tower::ServiceExt;

const SECRET: &str = "integration-secret";

type Ws = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// A running server with three users: alice (1), bob (2) and carol (3).
struct Fixture {
    server: RunningServer<MemoryGateway>,
    alice: UserId,
    bob: UserId,
    carol: UserId,
}

impl Fixture {
    async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    async fn start_with(tweak: impl FnOnce(&mut ServerConfig)) -> Self {
        let gateway = MemoryGateway::new();
        let alice = gateway.create_user("alice", "alice@example.com").unwrap().id;
        let bob = gateway.create_user("bob", "bob@example.com").unwrap().id;
        let carol = gateway.create_user("carol", "carol@example.com").unwrap().id;

        let mut config = ServerConfig::with_secret(SECRET);
        config.bind_addr = "127.0.0.1:0".to_string();
        tweak(&mut config);

        let server = server::start_server(&config, gateway)
            .await
            .expect("failed to start test server");
        Self {
            server,
            alice,
            bob,
            carol,
        }
    }

    fn token(&self, user: UserId) -> String {
        self.server
            .state
            .gate
            .issue(user, None, Duration::from_secs(300))
            .unwrap()
    }

    fn url(&self, token: &str) -> String {
        format!("ws://{}/ws/connect?token={token}", self.server.addr)
    }

    /// Connects as `user` and consumes the welcome message.
    async fn connect(&self, user: UserId) -> Ws {
        let (mut ws, _) = tokio_tungstenite::connect_async(self.url(&self.token(user)))
            .await
            .unwrap();
        let welcome = recv(&mut ws).await;
        assert_eq!(welcome.content, WELCOME_CONTENT);
        assert_eq!(welcome.receiver_id, user);
        ws
    }

    async fn wait_for_connections(&self, expected: usize) {
        let registry = &self.server.state.registry;
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.len().await != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("registry never reached the expected size");
    }
}

async fn send_frame(ws: &mut Ws, sender: UserId, receiver: UserId, content: &str) {
    let frame = serde_json::json!({
        "sender_id": sender.get(),
        "receiver_id": receiver.get(),
        "content": content,
    });
    ws.send(tungstenite::Message::Text(frame.to_string().into()))
        .await
        .unwrap();
}

async fn recv(ws: &mut Ws) -> ChatMessage {
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("stream ended")
        .unwrap();
    codec::decode_outbound(&msg.into_data()).unwrap()
}

/// Asserts that nothing arrives on `ws` for a short while.
async fn assert_silent(ws: &mut Ws) {
    let next = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    assert!(next.is_err(), "unexpected frame: {next:?}");
}

#[tokio::test]
async fn welcome_is_a_system_message() {
    let fx = Fixture::start().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(fx.url(&fx.token(fx.alice)))
        .await
        .unwrap();

    let welcome = recv(&mut ws).await;
    assert!(welcome.is_system());
    assert_eq!(welcome.id, None);
    assert_eq!(welcome.receiver_id, fx.alice);
    assert!(fx.server.state.registry.is_online(fx.alice).await);
}

#[tokio::test]
async fn missing_token_is_refused() {
    let fx = Fixture::start().await;
    let url = format!("ws://{}/ws/connect", fx.server.addr);
    match tokio_tungstenite::connect_async(url).await {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
        other => panic!("expected HTTP 401, got {other:?}"),
    }
    assert!(fx.server.state.registry.is_empty().await);
}

#[tokio::test]
async fn forged_token_is_refused() {
    let fx = Fixture::start().await;
    let forged = flux_server::auth::AuthGate::new(b"someone-else")
        .issue(fx.alice, None, Duration::from_secs(60))
        .unwrap();
    match tokio_tungstenite::connect_async(fx.url(&forged)).await {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
        other => panic!("expected HTTP 401, got {other:?}"),
    }
    assert!(fx.server.state.registry.is_empty().await);
}

#[tokio::test]
async fn alice_sends_bob_hi() {
    let fx = Fixture::start().await;
    let mut ws_alice = fx.connect(fx.alice).await;
    let mut ws_bob = fx.connect(fx.bob).await;

    send_frame(&mut ws_alice, fx.alice, fx.bob, "hi").await;

    let received = recv(&mut ws_bob).await;
    assert_eq!(received.content, "hi");
    assert_eq!(received.sender_id, fx.alice);
    assert_eq!(received.receiver_id, fx.bob);
    assert!(received.id.is_some());
    assert_eq!(received.sender.unwrap().username, "alice");
    assert_eq!(received.receiver.unwrap().username, "bob");

    // The sender gets no echo.
    assert_silent(&mut ws_alice).await;
}

#[tokio::test]
async fn spoofed_sender_is_dropped_and_connection_stays_open() {
    let fx = Fixture::start().await;
    let mut ws_alice = fx.connect(fx.alice).await;
    let mut ws_bob = fx.connect(fx.bob).await;

    // Alice claims to be Bob, writing to herself.
    send_frame(&mut ws_alice, fx.bob, fx.alice, "forged").await;
    assert_silent(&mut ws_alice).await;
    assert_silent(&mut ws_bob).await;
    assert_eq!(fx.server.state.gateway.message_count(), 0);

    // The same connection still works.
    send_frame(&mut ws_alice, fx.alice, fx.bob, "genuine").await;
    let received = recv(&mut ws_bob).await;
    assert_eq!(received.content, "genuine");
    assert_eq!(fx.server.state.gateway.message_count(), 1);
}

#[tokio::test]
async fn invalid_frames_are_dropped_without_closing() {
    let fx = Fixture::start().await;
    let mut ws_alice = fx.connect(fx.alice).await;
    let mut ws_bob = fx.connect(fx.bob).await;

    send_frame(&mut ws_alice, fx.alice, fx.bob, "").await;
    send_frame(&mut ws_alice, fx.alice, UserId::SYSTEM, "nobody").await;
    send_frame(&mut ws_alice, fx.alice, UserId::new(404), "ghost").await;
    send_frame(&mut ws_alice, fx.alice, fx.bob, "after").await;

    let received = recv(&mut ws_bob).await;
    assert_eq!(received.content, "after");
    assert_eq!(fx.server.state.gateway.message_count(), 1);
}

#[tokio::test]
async fn every_session_of_the_receiver_gets_the_message() {
    let fx = Fixture::start().await;
    let mut ws_alice = fx.connect(fx.alice).await;
    let mut ws_bob_laptop = fx.connect(fx.bob).await;
    let mut ws_bob_phone = fx.connect(fx.bob).await;
    assert_eq!(fx.server.state.registry.connections_for(fx.bob).await.len(), 2);

    send_frame(&mut ws_alice, fx.alice, fx.bob, "both").await;

    assert_eq!(recv(&mut ws_bob_laptop).await.content, "both");
    assert_eq!(recv(&mut ws_bob_phone).await.content, "both");
}

#[tokio::test]
async fn offline_receiver_is_persisted_but_not_delivered() {
    let fx = Fixture::start().await;
    let mut ws_alice = fx.connect(fx.alice).await;
    let mut ws_bob = fx.connect(fx.bob).await;

    send_frame(&mut ws_alice, fx.alice, fx.carol, "for later").await;
    // A follow-up to Bob proves the first frame was fully processed.
    send_frame(&mut ws_alice, fx.alice, fx.bob, "marker").await;
    assert_eq!(recv(&mut ws_bob).await.content, "marker");

    assert_eq!(fx.server.state.gateway.message_count(), 2);
    assert!(!fx.server.state.registry.is_online(fx.carol).await);
    assert_silent(&mut ws_alice).await;
}

#[tokio::test]
async fn frames_from_one_connection_arrive_in_order() {
    let fx = Fixture::start().await;
    let mut ws_alice = fx.connect(fx.alice).await;
    let mut ws_bob = fx.connect(fx.bob).await;

    for i in 0..25 {
        send_frame(&mut ws_alice, fx.alice, fx.bob, &format!("msg-{i}")).await;
    }
    for i in 0..25 {
        assert_eq!(recv(&mut ws_bob).await.content, format!("msg-{i}"));
    }
}

#[tokio::test]
async fn disconnect_unregisters_connection() {
    let fx = Fixture::start().await;
    let ws_alice = fx.connect(fx.alice).await;
    let mut ws_bob = fx.connect(fx.bob).await;
    fx.wait_for_connections(2).await;

    ws_bob.close(None).await.unwrap();
    drop(ws_bob);
    fx.wait_for_connections(1).await;
    assert!(!fx.server.state.registry.is_online(fx.bob).await);
    assert!(fx.server.state.registry.is_online(fx.alice).await);
    drop(ws_alice);
}

#[tokio::test]
async fn repeated_malformed_frames_close_the_connection() {
    let fx = Fixture::start_with(|config| config.max_invalid_frames = 3).await;
    let mut ws_alice = fx.connect(fx.alice).await;

    for _ in 0..3 {
        ws_alice
            .send(tungstenite::Message::Text("{not json".into()))
            .await
            .unwrap();
    }

    let next = tokio::time::timeout(Duration::from_secs(5), ws_alice.next())
        .await
        .expect("server did not close the connection");
    assert!(
        matches!(
            next,
            None | Some(Ok(tungstenite::Message::Close(_)) | Err(_))
        ),
        "expected close, got {next:?}"
    );
    fx.wait_for_connections(0).await;
}

#[tokio::test]
async fn rest_send_is_delivered_live() {
    let fx = Fixture::start().await;
    let mut ws_bob = fx.connect(fx.bob).await;

    let app = server::router(std::sync::Arc::clone(&fx.server.state));
    let request = Request::builder()
        .method("POST")
        .uri("/messages")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", fx.token(fx.alice)))
        .body(Body::from(
            serde_json::json!({ "receiver_id": fx.bob.get(), "content": "via rest" }).to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let received = recv(&mut ws_bob).await;
    assert_eq!(received.content, "via rest");
    assert_eq!(received.sender_id, fx.alice);
}

/// Gateway whose first message write fails; later writes succeed.
#[derive(Debug)]
struct FirstWriteFails {
    inner: MemoryGateway,
    failed: AtomicBool,
}

impl Gateway for FirstWriteFails {
    async fn user(&self, id: UserId) -> Result<Option<User>, GatewayError> {
        self.inner.user(id).await
    }

    async fn create_message(&self, message: NewMessage) -> Result<StoredMessage, GatewayError> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("disk full".into()));
        }
        self.inner.create_message(message).await
    }

    async fn message_with_users(&self, id: MessageId) -> Result<Option<ChatMessage>, GatewayError> {
        self.inner.message_with_users(id).await
    }

    async fn conversation(&self, a: UserId, b: UserId) -> Result<Vec<ChatMessage>, GatewayError> {
        self.inner.conversation(a, b).await
    }
}

#[tokio::test]
async fn failing_frames_do_not_close_the_connection() {
    let inner = MemoryGateway::new();
    let alice = inner.create_user("alice", "alice@example.com").unwrap().id;
    let bob = inner.create_user("bob", "bob@example.com").unwrap().id;
    let gateway = FirstWriteFails {
        inner,
        failed: AtomicBool::new(false),
    };

    let mut config = ServerConfig::with_secret(SECRET);
    config.bind_addr = "127.0.0.1:0".to_string();
    let server = server::start_server(&config, gateway).await.unwrap();

    let mut sockets = Vec::new();
    for user in [alice, bob] {
        let token = server
            .state
            .gate
            .issue(user, None, Duration::from_secs(300))
            .unwrap();
        let url = format!("ws://{}/ws/connect?token={token}", server.addr);
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        assert_eq!(recv(&mut ws).await.content, WELCOME_CONTENT);
        sockets.push(ws);
    }
    let mut ws_bob = sockets.pop().unwrap();
    let mut ws_alice = sockets.pop().unwrap();

    // Storage refuses this one.
    send_frame(&mut ws_alice, alice, bob, "lost").await;
    // One undecodable frame, well under the limit.
    ws_alice
        .send(tungstenite::Message::Text("{bad".into()))
        .await
        .unwrap();
    // JSON carried in a binary frame is accepted too.
    let binary = serde_json::json!({
        "sender_id": alice.get(),
        "receiver_id": bob.get(),
        "content": "bin",
    });
    ws_alice
        .send(tungstenite::Message::Binary(binary.to_string().into_bytes().into()))
        .await
        .unwrap();
    send_frame(&mut ws_alice, alice, bob, "after").await;

    assert_eq!(recv(&mut ws_bob).await.content, "bin");
    assert_eq!(recv(&mut ws_bob).await.content, "after");
    assert_silent(&mut ws_bob).await;

    assert_eq!(server.state.gateway.inner.message_count(), 2);
    assert!(server.state.registry.is_online(alice).await);
}
