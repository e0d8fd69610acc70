use std::sync::Arc;
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};

use crate::auth::Session;
use crate::duel::{DuelServer, DuelSignalingHandler};

pub async fn handle_duel_websocket(
    websocket: WebSocket,
    duel_server: Arc<DuelServer>,
    session: Session,
) {
    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let mut signaling_handler = DuelSignalingHandler::new(duel_server, session, tx);
    let connection_id = signaling_handler.connection_id();

    tracing::info!(connection_id, user_id = session.user_id, "New duel WebSocket connection established");

    // Spawn task to send messages to client
    let sender_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_sender.send(message).await {
                tracing::error!(connection_id, error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(message) => {
                if message.is_close() {
                    break;
                }
                if let Ok(text) = message.to_str() {
                    tracing::debug!(connection_id, "Received duel event: {}", text);
                    signaling_handler.handle_text(text).await;
                }
            }
            Err(e) => {
                tracing::error!(connection_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    signaling_handler.cleanup().await;
    sender_task.abort();
    tracing::info!(connection_id, "Duel WebSocket connection closed");
}
