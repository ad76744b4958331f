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

//! History tests: messages sent live are retrievable through
//! `GET /messages/conversation` from either side, oldest first.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use flux_proto::api::ConversationResponse;
use flux_proto::codec;
use flux_proto::message::UserId;
use flux_server::config::ServerConfig;
use flux_server::gateway::MemoryGateway;
use flux_server::server::{self, RunningServer};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;
use tower::ServiceExt;

type Ws = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn start() -> (RunningServer<MemoryGateway>, UserId, UserId, UserId) {
    let gateway = MemoryGateway::new();
    let alice = gateway.create_user("alice", "alice@example.com").unwrap().id;
    let bob = gateway.create_user("bob", "bob@example.com").unwrap().id;
    let carol = gateway.create_user("carol", "carol@example.com").unwrap().id;

    let mut config = ServerConfig::with_secret("conversation-secret");
    config.bind_addr = "127.0.0.1:0".to_string();
    let server = server::start_server(&config, gateway).await.unwrap();
    (server, alice, bob, carol)
}

fn token(server: &RunningServer<MemoryGateway>, user: UserId) -> String {
    server
        .state
        .gate
        .issue(user, None, Duration::from_secs(300))
        .unwrap()
}

async fn connect(server: &RunningServer<MemoryGateway>, user: UserId) -> Ws {
    let url = format!(
        "ws://{}/ws/connect?token={}",
        server.addr,
        token(server, user)
    );
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    // Welcome.
    next_content(&mut ws).await;
    ws
}

async fn next_content(ws: &mut Ws) -> String {
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("stream ended")
        .unwrap();
    codec::decode_outbound(&msg.into_data()).unwrap().content
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

async fn fetch_conversation(
    server: &RunningServer<MemoryGateway>,
    caller: UserId,
    other: UserId,
) -> ConversationResponse {
    let request = Request::builder()
        .uri(format!("/messages/conversation?user_id={}", other.get()))
        .header("authorization", format!("Bearer {}", token(server, caller)))
        .body(Body::empty())
        .unwrap();
    let response = server::router(Arc::clone(&server.state))
        .oneshot(request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn live_messages_appear_in_history_for_both_sides() {
    let (server, alice, bob, carol) = start().await;
    let mut ws_alice = connect(&server, alice).await;
    let mut ws_bob = connect(&server, bob).await;

    send_frame(&mut ws_alice, alice, bob, "hi bob").await;
    assert_eq!(next_content(&mut ws_bob).await, "hi bob");
    send_frame(&mut ws_bob, bob, alice, "hi alice").await;
    assert_eq!(next_content(&mut ws_alice).await, "hi alice");
    send_frame(&mut ws_alice, alice, bob, "how are you?").await;
    assert_eq!(next_content(&mut ws_bob).await, "how are you?");

    // Unrelated traffic stays out of the conversation.
    send_frame(&mut ws_alice, alice, carol, "hey carol").await;
    send_frame(&mut ws_alice, alice, bob, "marker").await;
    assert_eq!(next_content(&mut ws_bob).await, "marker");

    let expected = ["hi bob", "hi alice", "how are you?", "marker"];
    for (caller, other) in [(alice, bob), (bob, alice)] {
        let history = fetch_conversation(&server, caller, other).await;
        let contents: Vec<_> = history.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, expected);
        assert!(
            history
                .messages
                .windows(2)
                .all(|w| w[0].created_at <= w[1].created_at)
        );
        assert!(history.messages.iter().all(|m| m.sender.is_some() && m.receiver.is_some()));
    }

    let with_carol = fetch_conversation(&server, carol, alice).await;
    assert_eq!(with_carol.messages.len(), 1);
    assert_eq!(with_carol.messages[0].content, "hey carol");
}

#[tokio::test]
async fn messages_to_offline_users_are_in_history() {
    let (server, alice, bob, _) = start().await;
    let mut ws_alice = connect(&server, alice).await;

    send_frame(&mut ws_alice, alice, bob, "while you were away").await;

    // Frames are processed asynchronously; poll until persisted.
    tokio::time::timeout(Duration::from_secs(5), async {
        while server.state.gateway.message_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let history = fetch_conversation(&server, bob, alice).await;
    assert_eq!(history.messages.len(), 1);
    assert_eq!(history.messages[0].content, "while you were away");
    assert_eq!(history.messages[0].sender_id, alice);
}

#[tokio::test]
async fn empty_conversation_is_an_empty_list() {
    let (server, alice, _, carol) = start().await;
    let history = fetch_conversation(&server, alice, carol).await;
    assert!(history.messages.is_empty());
}
