use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use warp::ws::Message;

use super::questions::Question;
use super::room::Player;
use super::server::{ConnectionId, DuelServer};
use crate::auth::Session;
use crate::error::{DuelError, Result};

/// Events sent by clients. Frames look like `{"event": "...", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    CreateClassDuel(CreateDuel),
    JoinClassDuel(JoinDuel),
    StartGame(StartGame),
    UpdateProgress(ProgressUpdate),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDuel {
    #[serde(deserialize_with = "class_id")]
    pub class_id: String,
    pub host_id: i64,
    #[serde(default)]
    pub host_name: String,
    #[serde(default)]
    pub set_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinDuel {
    #[serde(deserialize_with = "class_id")]
    pub class_id: String,
    pub user_id: i64,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartGame {
    #[serde(deserialize_with = "class_id")]
    pub class_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    #[serde(deserialize_with = "class_id")]
    pub class_id: String,
    pub user_id: i64,
    pub score: i64,
    pub progress: f64,
}

/// Events pushed to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    DuelCreated,
    PlayerJoined(Vec<Player>),
    GameStarted { questions: Vec<Question> },
    ScoreboardUpdate(Vec<Player>),
    GameFinished(Vec<Player>),
    Error { message: String },
}

impl ServerEvent {
    pub fn error(err: &DuelError) -> Self {
        ServerEvent::Error {
            message: err.to_string(),
        }
    }

    pub fn to_message(&self) -> Result<Message> {
        Ok(Message::text(serde_json::to_string(self)?))
    }
}

/// Class ids arrive as strings from route params but as numbers from some pages.
fn class_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    })
}

/// Per-connection event handler bound to an authenticated session
pub struct DuelSignalingHandler {
    server: Arc<DuelServer>,
    connection_id: ConnectionId,
    session: Session,
    sender: mpsc::UnboundedSender<Message>,
}

impl DuelSignalingHandler {
    pub fn new(server: Arc<DuelServer>, session: Session, sender: mpsc::UnboundedSender<Message>) -> Self {
        let connection_id = server.next_connection_id();
        tracing::info!(connection_id, user_id = session.user_id, "Duel connection registered");
        Self {
            server,
            connection_id,
            session,
            sender,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Parses a raw text frame and dispatches it. Malformed frames are
    /// answered with an `error` event.
    pub async fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.handle_message(event).await,
            Err(e) => {
                tracing::warn!(
                    connection_id = self.connection_id,
                    error = %e,
                    raw_message = %text,
                    "Failed to parse duel event"
                );
                self.send(&ServerEvent::error(&DuelError::InvalidEvent(e.to_string())));
            }
        }
    }

    pub async fn handle_message(&mut self, event: ClientEvent) {
        if let Err(e) = self.dispatch(event).await {
            if e.is_unauthorized() {
                tracing::warn!(connection_id = self.connection_id, user_id = self.session.user_id, error = %e, "Rejected duel event");
            } else {
                tracing::debug!(connection_id = self.connection_id, error = %e, "Duel event failed");
            }
            self.send(&ServerEvent::error(&e));
        }
    }

    async fn dispatch(&self, event: ClientEvent) -> Result<()> {
        match event {
            ClientEvent::CreateClassDuel(create) => {
                self.server
                    .create_duel(self.connection_id, &self.sender, self.session, create)
                    .await
            }
            ClientEvent::JoinClassDuel(join) => {
                self.server
                    .join_duel(self.connection_id, &self.sender, self.session, join)
                    .await
            }
            ClientEvent::StartGame(start) => self.server.start_game(self.session, start).await,
            ClientEvent::UpdateProgress(update) => {
                self.server.update_progress(self.session, update).await
            }
        }
    }

    fn send(&self, event: &ServerEvent) {
        match event.to_message() {
            Ok(message) => {
                if self.sender.send(message).is_err() {
                    tracing::debug!(connection_id = self.connection_id, "Connection writer already gone");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to serialize duel event"),
        }
    }

    /// Drops the connection from every broadcast group. Rosters are untouched.
    pub async fn cleanup(&self) {
        self.server.disconnect(self.connection_id).await;
    }
}
