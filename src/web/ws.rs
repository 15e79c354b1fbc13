use axum::extract::{
    State,
    ws::{self, WebSocket, WebSocketUpgrade},
};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::chatbot::RuleStatus;
use crate::state::AppState;

pub async fn ws_handler(
    ws_upgrade: WebSocketUpgrade,
    State(app_state): State<AppState>,
) -> impl IntoResponse {
    let statuses = app_state.notifier.subscribe();
    ws_upgrade.on_upgrade(move |socket| handle_socket(socket, statuses))
}

fn status_message(status: &RuleStatus) -> Result<ws::Message, serde_json::Error> {
    serde_json::to_string(status).map(|json| ws::Message::Text(json.into()))
}

/// Pushes every rule notification to the client until either side goes away.
pub async fn handle_socket(socket: WebSocket, mut statuses: broadcast::Receiver<RuleStatus>) {
    let client_id = Uuid::new_v4();
    tracing::info!(client.id = %client_id, "WebSocket: Client subscribed to rule notifications");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        loop {
            let status = match statuses.recv().await {
                Ok(status) => status,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(client.id = %client_id, skipped, "WebSocket: Client lagging behind notifications");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let message = match status_message(&status) {
                Ok(message) => message,
                Err(e) => {
                    tracing::error!(client.id = %client_id, error = %e, "WebSocket: Failed to encode notification");
                    continue;
                }
            };
            if ws_sender.send(message).await.is_err() {
                tracing::debug!(client.id = %client_id, "WebSocket: Send failed, client likely disconnected");
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(message) = ws_receiver.next().await {
            match message {
                Ok(ws::Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(client.id = %client_id, error = %e, "WebSocket: Receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    tracing::info!(client.id = %client_id, "WebSocket: Client disconnected");
}
