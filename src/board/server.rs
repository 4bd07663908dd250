//! Board server: WebSocket sink plus HTTP command forwarding
//!
//! One WebSocket connection per session token, registered in the
//! [`ConnectionRegistry`]. Inbound frames that parse as JSON are echoed back
//! as `{echo: …}`; malformed frames are discarded with a warning. The HTTP
//! endpoint forwards `{session_id, command, args}` to the matching live
//! connection and reports not-found when there is none.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::registry::{ConnectionRegistry, ForwardError};
use crate::config::BoardConfig;
use crate::Result;

/// Body of the HTTP forward endpoint
#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    /// Token of the target connection
    pub session_id: String,
    /// Command name, e.g. `drawCircle`
    pub command: String,
    /// Command arguments
    #[serde(default = "empty_object")]
    pub args: Value,
}

fn empty_object() -> Value {
    json!({})
}

/// Build the board router over a connection registry
pub fn router(registry: ConnectionRegistry) -> Router {
    Router::new()
        .route("/ws/:session_id", get(ws_handler))
        .route("/api/v1/board/command", post(command_handler))
        .with_state(registry)
}

/// Bind and serve the board until the process exits
pub async fn run(config: BoardConfig) -> Result<()> {
    let registry = ConnectionRegistry::new();
    let app = router(registry);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Board server listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn ws_handler(
    Path(session_id): Path<String>,
    State(registry): State<ConnectionRegistry>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, registry))
}

async fn handle_socket(mut socket: WebSocket, session_id: String, registry: ConnectionRegistry) {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    registry.register(&session_id, outbound_tx.clone());

    let ack = json!({
        "type": "connection",
        "status": "connected",
        "session_id": session_id,
    });
    if socket.send(Message::Text(ack.to_string())).await.is_err() {
        registry.unregister_sender(&session_id, &outbound_tx);
        return;
    }

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(payload) => {
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    // Sender replaced in the registry; this connection is done
                    None => break,
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Value>(&text) {
                            Ok(value) => {
                                debug!("Message from session {}: {}", session_id, value);
                                let echo = json!({ "echo": value });
                                if socket.send(Message::Text(echo.to_string())).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(
                                    "Discarding malformed message from session {}: {}",
                                    session_id, e
                                );
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Connection error for session {}: {}", session_id, e);
                        break;
                    }
                }
            }
        }
    }

    registry.unregister_sender(&session_id, &outbound_tx);
    info!("Session {} disconnected", session_id);
}

async fn command_handler(
    State(registry): State<ConnectionRegistry>,
    Json(request): Json<CommandRequest>,
) -> Response {
    let payload = json!({ "cmd": request.command, "args": request.args });
    match registry.forward(&request.session_id, &payload) {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response(),
        Err(e @ (ForwardError::NotFound(_) | ForwardError::Closed(_))) => {
            debug!("Forward failed: {}", e);
            (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_request_default_args() {
        let request: CommandRequest =
            serde_json::from_value(json!({"session_id": "abc", "command": "clearCanvas"}))
                .unwrap();
        assert_eq!(request.args, json!({}));
    }

    #[test]
    fn test_command_request_with_args() {
        let request: CommandRequest = serde_json::from_value(json!({
            "session_id": "abc",
            "command": "drawCircle",
            "args": {"x": 1, "y": 2, "radius": 3}
        }))
        .unwrap();
        assert_eq!(request.command, "drawCircle");
        assert_eq!(request.args["radius"], 3);
    }

    #[test]
    fn test_router_builds() {
        let _ = router(ConnectionRegistry::new());
    }
}
