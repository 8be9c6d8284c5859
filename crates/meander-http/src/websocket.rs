//! WebSocket push channel.
//!
//! Each connection is one [`BroadcastHub`](meander_core::BroadcastHub)
//! subscriber. Events are sent as tagged JSON text frames; the only message
//! accepted from the client is `startVote`.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use meander_core::{ClientMessage, ShowRuntime};
use std::sync::Arc;

use crate::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let hub = Arc::clone(state.runtime.hub());
    let mut subscription = hub.subscribe();
    let id = subscription.id();
    log::info!("[WS] Client {} connected", id);

    // Forward hub events until the hub drops us or the socket fails
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            if sender.send(Message::Text(event.to_json())).await.is_err() {
                return;
            }
        }
        // Dropped by the hub for falling behind
        let _ = sender.send(Message::Close(None)).await;
    });

    let runtime = Arc::clone(&state.runtime);
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => handle_client_message(&runtime, id, &text),
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.unsubscribe(id);
    log::info!("[WS] Client {} disconnected", id);
}

/// Apply one client message. Malformed or rejected messages are logged and
/// the connection stays open.
pub(crate) fn handle_client_message(runtime: &ShowRuntime, client: u64, text: &str) {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            log::warn!("[WS] Ignoring malformed message from client {}: {}", client, e);
            return;
        }
    };

    match message {
        ClientMessage::StartVote { fork_id } => match runtime.start_vote(&fork_id) {
            Ok(started) => log::info!(
                "[WS] Client {} started vote on '{}' ({}s)",
                client,
                started.fork_id,
                started.duration_seconds
            ),
            Err(e) => log::info!("[WS] Ignoring startVote from client {}: {}", client, e),
        },
    }
}
