//! Board server tests over a real loopback socket

use chalktalk::board::{router, ConnectionRegistry};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

async fn spawn_board(registry: ConnectionRegistry) -> std::net::SocketAddr {
    let app = router(registry);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn next_json(
    ws: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
          + Unpin),
) -> Value {
    loop {
        match ws.next().await.expect("connection closed").unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            _ => continue,
        }
    }
}

#[tokio::test]
async fn test_connect_ack_and_echo() {
    let registry = ConnectionRegistry::new();
    let addr = spawn_board(registry.clone()).await;

    let (mut ws, _) = connect_async(format!("ws://{}/ws/abc", addr)).await.unwrap();

    let ack = next_json(&mut ws).await;
    assert_eq!(ack["status"], "connected");
    assert_eq!(ack["session_id"], "abc");
    assert!(registry.contains("abc"));

    ws.send(Message::Text(
        json!({"cmd": "drawCircle", "args": {"x": 1, "y": 2, "radius": 3}}).to_string(),
    ))
    .await
    .unwrap();

    let echo = next_json(&mut ws).await;
    assert_eq!(echo["echo"]["cmd"], "drawCircle");
    assert_eq!(echo["echo"]["args"]["radius"], 3);
}

#[tokio::test]
async fn test_malformed_frame_discarded_connection_survives() {
    let registry = ConnectionRegistry::new();
    let addr = spawn_board(registry.clone()).await;

    let (mut ws, _) = connect_async(format!("ws://{}/ws/abc", addr)).await.unwrap();
    let _ack = next_json(&mut ws).await;

    // Malformed payload: no echo, no error, no disconnect
    ws.send(Message::Text("this is not json".into()))
        .await
        .unwrap();

    // A valid frame afterwards still gets its echo
    ws.send(Message::Text(json!({"probe": 1}).to_string()))
        .await
        .unwrap();
    let echo = next_json(&mut ws).await;
    assert_eq!(echo["echo"]["probe"], 1);
}

#[tokio::test]
async fn test_registry_forward_reaches_connection() {
    let registry = ConnectionRegistry::new();
    let addr = spawn_board(registry.clone()).await;

    let (mut ws, _) = connect_async(format!("ws://{}/ws/xyz", addr)).await.unwrap();
    let _ack = next_json(&mut ws).await;

    registry
        .forward("xyz", &json!({"cmd": "clearCanvas", "args": {}}))
        .unwrap();

    let forwarded = next_json(&mut ws).await;
    assert_eq!(forwarded["cmd"], "clearCanvas");

    // Unknown tokens are reported as not found
    assert!(registry.forward("nobody", &json!({})).is_err());
}

#[tokio::test]
async fn test_disconnect_unregisters() {
    let registry = ConnectionRegistry::new();
    let addr = spawn_board(registry.clone()).await;

    let (mut ws, _) = connect_async(format!("ws://{}/ws/abc", addr)).await.unwrap();
    let _ack = next_json(&mut ws).await;
    assert!(registry.contains("abc"));

    ws.close(None).await.unwrap();

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    while registry.contains("abc") {
        assert!(
            std::time::Instant::now() < deadline,
            "connection never unregistered"
        );
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
