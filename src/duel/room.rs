use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{DuelError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    Starting,
    Playing,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: i64,
    pub username: String,
    pub score: i64,
    pub progress: f64,
}

impl Player {
    pub fn new(id: i64, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            score: 0,
            progress: 0.0,
        }
    }

    fn is_done(&self) -> bool {
        self.progress >= 100.0
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub host_id: i64,
    pub set_id: Option<i64>,
    pub players: Vec<Player>,
    pub status: RoomStatus,
    pub current_question_index: usize,
    pub question_count: usize,
    #[serde(skip)]
    generation: u64,
    #[serde(skip)]
    last_activity: Instant,
    #[serde(skip)]
    finished_at: Option<Instant>,
}

impl Room {
    fn new(id: String, host_id: i64, set_id: Option<i64>, generation: u64) -> Self {
        Self {
            id,
            host_id,
            set_id,
            players: Vec::new(),
            status: RoomStatus::Waiting,
            current_question_index: 0,
            question_count: 0,
            generation,
            last_activity: Instant::now(),
            finished_at: None,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn is_expired(&self, now: Instant, retention: &Retention) -> bool {
        match (self.status, self.finished_at) {
            (RoomStatus::Finished, Some(at)) => now.saturating_duration_since(at) >= retention.finished_grace,
            _ => now.saturating_duration_since(self.last_activity) >= retention.idle_timeout,
        }
    }
}

/// Proof that a caller won the right to start a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartTicket {
    pub set_id: i64,
    generation: u64,
}

/// Outcome of a progress report that matched a player.
#[derive(Debug, Clone)]
pub struct ProgressOutcome {
    pub players: Vec<Player>,
    pub finished: bool,
}

/// How long rooms are kept around before the sweeper evicts them.
#[derive(Debug, Clone, Copy)]
pub struct Retention {
    pub idle_timeout: Duration,
    pub finished_grace: Duration,
}

/// Process-wide registry of duel rooms keyed by class id
pub struct RoomManager {
    rooms: RwLock<HashMap<String, Room>>,
    next_generation: AtomicU64,
}

impl RoomManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rooms: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        })
    }

    /// Create a fresh waiting room, replacing the previous one at `room_id`.
    ///
    /// A live room hosted by someone else is left alone; a finished one may be
    /// taken over.
    pub async fn create_room(&self, room_id: &str, host_id: i64, set_id: Option<i64>) -> Result<()> {
        let generation = self
            .next_generation
            .fetch_add(1, Ordering::Relaxed);

        let mut rooms = self.rooms.write().await;

        if let Some(existing) = rooms.get(room_id) {
            if existing.host_id != host_id && existing.status != RoomStatus::Finished {
                return Err(DuelError::RoomOwnedByAnotherHost(room_id.to_string()));
            }
            if existing.status != RoomStatus::Waiting {
                tracing::warn!(
                    room_id = %room_id,
                    previous_status = ?existing.status,
                    "Replacing duel room that already left the waiting state"
                );
            }
        }

        rooms.insert(
            room_id.to_string(),
            Room::new(room_id.to_string(), host_id, set_id, generation),
        );

        tracing::info!(room_id = %room_id, host_id, ?set_id, "Duel room created");
        Ok(())
    }

    /// Get room information
    pub async fn get_room(&self, room_id: &str) -> Option<Room> {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).cloned()
    }

    pub async fn room_exists(&self, room_id: &str) -> bool {
        self.rooms.read().await.contains_key(room_id)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Add a player to a waiting room. Joining twice keeps a single slot.
    pub async fn join_room(&self, room_id: &str, player_id: i64, username: &str) -> Result<Vec<Player>> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| DuelError::RoomNotFound(room_id.to_string()))?;

        if room.status != RoomStatus::Waiting {
            return Err(DuelError::GameAlreadyStarted(room_id.to_string()));
        }

        if !room.players.iter().any(|p| p.id == player_id) {
            room.players.push(Player::new(player_id, username));
            tracing::info!(room_id = %room_id, player_id, username = %username, "Player joined duel");
        } else {
            tracing::debug!(room_id = %room_id, player_id, "Player already in duel");
        }
        room.touch();

        Ok(room.players.clone())
    }

    /// Claim the start of a room. The room moves to `Starting` before any
    /// term lookup happens, so a second start is rejected until the first
    /// one completes.
    pub async fn begin_start(&self, room_id: &str, caller_id: i64) -> Result<StartTicket> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| DuelError::RoomNotFound(room_id.to_string()))?;

        if room.host_id != caller_id {
            return Err(DuelError::NotHost(room_id.to_string()));
        }

        match room.status {
            RoomStatus::Waiting => {}
            RoomStatus::Starting => return Err(DuelError::StartInProgress(room_id.to_string())),
            RoomStatus::Playing | RoomStatus::Finished => {
                return Err(DuelError::GameAlreadyStarted(room_id.to_string()))
            }
        }

        let set_id = room
            .set_id
            .ok_or_else(|| DuelError::MissingStudySet(room_id.to_string()))?;

        room.status = RoomStatus::Starting;
        room.touch();

        Ok(StartTicket {
            set_id,
            generation: room.generation,
        })
    }

    /// Move a starting room to `Playing` with a round of `question_count` questions.
    pub async fn complete_start(&self, room_id: &str, ticket: StartTicket, question_count: usize) -> Result<()> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| DuelError::RoomNotFound(room_id.to_string()))?;

        if room.generation != ticket.generation || room.status != RoomStatus::Starting {
            return Err(DuelError::StaleStart(room_id.to_string()));
        }

        room.status = RoomStatus::Playing;
        room.question_count = question_count;
        room.current_question_index = 0;
        room.touch();

        tracing::info!(room_id = %room_id, question_count, "Duel started");
        Ok(())
    }

    /// Overwrite a player's reported score and progress.
    ///
    /// Returns `Ok(None)` when the player is not part of the room.
    pub async fn update_progress(
        &self,
        room_id: &str,
        player_id: i64,
        score: i64,
        progress: f64,
    ) -> Result<Option<ProgressOutcome>> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| DuelError::RoomNotFound(room_id.to_string()))?;

        let progress = if progress.is_finite() {
            progress.clamp(0.0, 100.0)
        } else {
            0.0
        };

        let Some(player) = room.players.iter_mut().find(|p| p.id == player_id) else {
            tracing::debug!(room_id = %room_id, player_id, "Progress for unknown player ignored");
            return Ok(None);
        };
        player.score = score;
        player.progress = progress;

        if room.question_count > 0 {
            let reached = room
                .players
                .iter()
                .map(|p| (p.progress / 100.0 * room.question_count as f64).floor() as usize)
                .max()
                .unwrap_or(0);
            room.current_question_index = reached.min(room.question_count - 1);
        }

        let mut finished = false;
        if room.status == RoomStatus::Playing && room.players.iter().all(Player::is_done) {
            room.status = RoomStatus::Finished;
            room.finished_at = Some(Instant::now());
            finished = true;
            tracing::info!(room_id = %room_id, "Duel finished");
        }
        room.touch();

        Ok(Some(ProgressOutcome {
            players: room.players.clone(),
            finished,
        }))
    }

    /// Remove rooms that finished longer than the grace period ago or saw no
    /// activity within the idle timeout. Returns the evicted room ids.
    pub async fn evict_expired(&self, now: Instant, retention: &Retention) -> Vec<String> {
        let mut rooms = self.rooms.write().await;
        let expired: Vec<String> = rooms
            .values()
            .filter(|room| room.is_expired(now, retention))
            .map(|room| room.id.clone())
            .collect();

        for room_id in &expired {
            rooms.remove(room_id);
            tracing::info!(room_id = %room_id, "Evicted expired duel room");
        }

        expired
    }
}
