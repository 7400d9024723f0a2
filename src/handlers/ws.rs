//! WebSocket upgrade handler — the transport glue between axum's socket and
//! the Room Coordinator (C4). Mirrors the split-socket forwarding pattern
//! used for audio streaming, generalized to the coordinator's
//! event/broadcast protocol instead of raw binary frames.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};

use crate::coordinator::ClientEvent;
use crate::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (connection_id, tx, mut outbound_rx) = state.coordinator.register_connection();

    // The coordinator addresses outbound messages through `tx`; forward
    // whatever lands on the paired receiver to the real socket on a
    // separate task so a slow client can't block event processing.
    let forward_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!("websocket read error on connection {}: {}", connection_id, e);
                break;
            }
        };

        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    state
                        .coordinator
                        .handle_client_event(connection_id, tx.clone(), event)
                        .await;
                }
                Err(e) => {
                    tracing::debug!("ignoring malformed client event: {}", e);
                }
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }

    state.coordinator.handle_disconnect(connection_id).await;
    forward_task.abort();
}
