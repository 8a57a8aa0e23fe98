use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use super::hub::PollHub;
use crate::poll::{ClientMessage, ConnectionId};

pub async fn handle_poll_websocket(websocket: WebSocket, hub: Arc<PollHub>) {
    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let connection_id = hub.connect(tx).await;
    tracing::info!(connection_id = %connection_id, "Poll WebSocket connection established");

    // Spawn task to send messages to client
    let sender_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_sender.send(message).await {
                tracing::error!(error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(message) => handle_websocket_message(&hub, &connection_id, message).await,
            Err(e) => {
                tracing::error!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    hub.disconnect(&connection_id).await;
    sender_task.abort();
    tracing::info!(connection_id = %connection_id, "Poll WebSocket connection closed");
}

async fn handle_websocket_message(hub: &PollHub, connection_id: &ConnectionId, message: Message) {
    let Ok(text) = message.to_str() else {
        return;
    };

    tracing::debug!(connection_id = %connection_id, "Received poll message: {}", text);

    match serde_json::from_str::<ClientMessage>(text) {
        Ok(client_message) => hub.handle(connection_id, client_message).await,
        Err(e) => {
            tracing::error!(
                connection_id = %connection_id,
                error = %e,
                raw_message = %text,
                "Failed to parse poll message"
            );
        }
    }
}
