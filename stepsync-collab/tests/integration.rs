//! End-to-end notification tests.
//!
//! These start real listeners and connect real WebSocket clients,
//! verifying that committed pushes reach subscribers and that dead
//! or departing connections are cleaned up.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use stepsync_collab::{ServerConfig, SyncCoordinator, SyncServer, NOTIFICATION_TEXT};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::tungstenite::Message;

struct TestServer {
    coordinator: Arc<SyncCoordinator>,
    ws_url: String,
}

/// Start a server on free ports.
async fn start_test_server() -> TestServer {
    let http = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws_url = format!("ws://{}/ws", ws.local_addr().unwrap());

    let server = SyncServer::new(ServerConfig::default().with_notify_buffer(8));
    let coordinator = server.coordinator().clone();
    tokio::spawn(async move {
        server.serve(http, ws).await.unwrap();
    });

    TestServer {
        coordinator,
        ws_url,
    }
}

/// Wait until the topic for `id` reports `expected` subscribers.
async fn wait_for_subscribers(coordinator: &SyncCoordinator, id: &str, expected: usize) {
    timeout(Duration::from_secs(2), async {
        loop {
            let stats = coordinator.broker().stats(id).await.unwrap();
            if stats.subscribers == expected {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscriber count never settled");
}

#[tokio::test]
async fn test_subscriber_notified_on_push() {
    let server = start_test_server().await;
    let id = server.coordinator.create_document().await.unwrap().doc_id;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("{}?name={id}", server.ws_url))
        .await
        .unwrap();
    wait_for_subscribers(&server.coordinator, &id, 1).await;

    server
        .coordinator
        .push_update(&id, 1, 0, vec![json!("a")])
        .await
        .unwrap();

    let msg = timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("notification within timeout")
        .unwrap()
        .unwrap();
    assert_eq!(msg, Message::Text(NOTIFICATION_TEXT.into()));
}

#[tokio::test]
async fn test_rebase_does_not_notify() {
    let server = start_test_server().await;
    let id = server.coordinator.create_document().await.unwrap().doc_id;
    server
        .coordinator
        .push_update(&id, 1, 0, vec![json!("a")])
        .await
        .unwrap();

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("{}?name={id}", server.ws_url))
        .await
        .unwrap();
    wait_for_subscribers(&server.coordinator, &id, 1).await;

    let outcome = server
        .coordinator
        .push_update(&id, 2, 0, vec![json!("b")])
        .await
        .unwrap();
    assert!(!outcome.is_applied());

    let result = timeout(Duration::from_millis(200), ws.next()).await;
    assert!(result.is_err(), "no notification expected for a rebase");
}

#[tokio::test]
async fn test_two_subscribers_same_document() {
    let server = start_test_server().await;
    let id = server.coordinator.create_document().await.unwrap().doc_id;
    let url = format!("{}?name={id}", server.ws_url);

    let (mut alice, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (mut bob, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    wait_for_subscribers(&server.coordinator, &id, 2).await;

    server
        .coordinator
        .push_update(&id, 1, 0, vec![json!("a"), json!("b")])
        .await
        .unwrap();

    for ws in [&mut alice, &mut bob] {
        let msg = timeout(Duration::from_secs(2), ws.next()).await.unwrap();
        assert!(matches!(msg, Some(Ok(Message::Text(_)))));
    }
}

#[tokio::test]
async fn test_close_unsubscribes() {
    let server = start_test_server().await;
    let id = server.coordinator.create_document().await.unwrap().doc_id;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("{}?name={id}", server.ws_url))
        .await
        .unwrap();
    wait_for_subscribers(&server.coordinator, &id, 1).await;

    ws.close(None).await.unwrap();
    wait_for_subscribers(&server.coordinator, &id, 0).await;
}

#[tokio::test]
async fn test_ping_answered() {
    let server = start_test_server().await;
    let id = server.coordinator.create_document().await.unwrap().doc_id;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("{}?name={id}", server.ws_url))
        .await
        .unwrap();
    wait_for_subscribers(&server.coordinator, &id, 1).await;

    ws.send(Message::Ping(vec![7u8].into())).await.unwrap();
    let msg = timeout(Duration::from_secs(2), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(matches!(msg, Message::Pong(_)));
}

#[tokio::test]
async fn test_missing_name_rejected() {
    let server = start_test_server().await;

    let result = tokio_tungstenite::connect_async(&server.ws_url).await;
    assert!(result.is_err(), "handshake without a name must fail");
}

#[tokio::test]
async fn test_unknown_document_closed() {
    let server = start_test_server().await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("{}?name=ghost", server.ws_url))
        .await
        .unwrap();

    let msg = timeout(Duration::from_secs(2), ws.next()).await.unwrap();
    match msg {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert!(frame.reason.contains("ghost"));
        }
        other => panic!("Expected close frame, got {other:?}"),
    }
}
