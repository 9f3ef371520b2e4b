//! WebSocket channel for controlled clients.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::lifecycle::{Client, ClientRegistry};

use super::ServerState;

/// GET /__offline/clients: registers a client for as long as the socket is
/// open and streams every broadcast `ClientMessage` as JSON.
pub async fn clients(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
) -> axum::response::Response {
    let registry = state.current().await.clients().clone();
    ws.on_upgrade(move |socket| async move {
        let client = registry.register();
        handle_socket(socket, &registry, client).await;
    })
}

async fn handle_socket(mut socket: WebSocket, registry: &ClientRegistry, client: Client) {
    let Client { id, mut messages } = client;
    debug!(client = %id, "Client connected");
    loop {
        tokio::select! {
            message = messages.recv() => {
                match message {
                    Ok(m) => {
                        let json = match serde_json::to_string(&m) {
                            Ok(j) => j,
                            Err(_) => continue,
                        };
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
    registry.unregister(id);
}
