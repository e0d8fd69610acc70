use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use warp::ws::Message;

use super::questions::build_questions;
use super::room::{Retention, Room, RoomManager};
use super::signaling::{CreateDuel, JoinDuel, ProgressUpdate, ServerEvent, StartGame};
use super::terms::TermSource;
use crate::auth::Session;
use crate::config::DuelConfig;
use crate::error::Result;

pub type ConnectionId = u64;

type Group = HashMap<ConnectionId, mpsc::UnboundedSender<Message>>;

impl From<&DuelConfig> for Retention {
    fn from(config: &DuelConfig) -> Self {
        Retention {
            idle_timeout: config.idle_timeout(),
            finished_grace: config.finished_grace(),
        }
    }
}

/// Coordinates duel rooms and the broadcast groups of connected clients
pub struct DuelServer {
    room_manager: Arc<RoomManager>,
    /// room id -> connections subscribed to that room.
    ///
    /// Held from a room change until its broadcast is queued, so clients see
    /// events in the order the room changed. Lock order is groups, then rooms.
    groups: Mutex<HashMap<String, Group>>,
    term_source: Arc<dyn TermSource>,
    config: DuelConfig,
    next_connection_id: AtomicU64,
}

impl DuelServer {
    pub fn new(term_source: Arc<dyn TermSource>, config: DuelConfig) -> Self {
        Self::with_room_manager(RoomManager::new(), term_source, config)
    }

    pub fn with_room_manager(
        room_manager: Arc<RoomManager>,
        term_source: Arc<dyn TermSource>,
        config: DuelConfig,
    ) -> Self {
        Self {
            room_manager,
            groups: Mutex::new(HashMap::new()),
            term_source,
            config,
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn room_manager(&self) -> &Arc<RoomManager> {
        &self.room_manager
    }

    pub fn config(&self) -> &DuelConfig {
        &self.config
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn room_snapshot(&self, room_id: &str) -> Option<Room> {
        self.room_manager.get_room(room_id).await
    }

    pub async fn create_duel(
        &self,
        connection_id: ConnectionId,
        sender: &mpsc::UnboundedSender<Message>,
        session: Session,
        create: CreateDuel,
    ) -> Result<()> {
        session.ensure_user(create.host_id)?;

        let mut groups = self.groups.lock().await;
        self.room_manager
            .create_room(&create.class_id, create.host_id, create.set_id)
            .await?;
        subscribe(&mut groups, &create.class_id, connection_id, sender);

        tracing::info!(
            room_id = %create.class_id,
            host_name = %create.host_name,
            set_id = ?create.set_id,
            "Class duel created"
        );

        broadcast(&groups, &create.class_id, &ServerEvent::DuelCreated, Some(connection_id));
        Ok(())
    }

    pub async fn join_duel(
        &self,
        connection_id: ConnectionId,
        sender: &mpsc::UnboundedSender<Message>,
        session: Session,
        join: JoinDuel,
    ) -> Result<()> {
        session.ensure_user(join.user_id)?;

        let mut groups = self.groups.lock().await;
        let players = self
            .room_manager
            .join_room(&join.class_id, join.user_id, &join.username)
            .await?;
        subscribe(&mut groups, &join.class_id, connection_id, sender);

        broadcast(&groups, &join.class_id, &ServerEvent::PlayerJoined(players), None);
        Ok(())
    }

    /// Starts the round for a room. Only the host's session may do this, and
    /// only once per room incarnation.
    pub async fn start_game(&self, session: Session, start: StartGame) -> Result<()> {
        let room_id = start.class_id;
        let ticket = self.room_manager.begin_start(&room_id, session.user_id).await?;

        let terms = match self.term_source.terms_for_set(ticket.set_id).await {
            Ok(terms) => terms,
            Err(e) => {
                tracing::error!(
                    room_id = %room_id,
                    set_id = ticket.set_id,
                    error = %e,
                    "Failed to fetch terms, starting with an empty round"
                );
                Vec::new()
            }
        };
        if terms.is_empty() {
            tracing::warn!(room_id = %room_id, set_id = ticket.set_id, "Study set has no terms");
        }

        let questions = build_questions(&terms, self.config.max_questions, &mut rand::thread_rng());

        let groups = self.groups.lock().await;
        self.room_manager
            .complete_start(&room_id, ticket, questions.len())
            .await?;
        broadcast(&groups, &room_id, &ServerEvent::GameStarted { questions }, None);
        Ok(())
    }

    pub async fn update_progress(&self, session: Session, update: ProgressUpdate) -> Result<()> {
        session.ensure_user(update.user_id)?;

        let groups = self.groups.lock().await;
        let outcome = self
            .room_manager
            .update_progress(&update.class_id, update.user_id, update.score, update.progress)
            .await?;

        if let Some(outcome) = outcome {
            broadcast(
                &groups,
                &update.class_id,
                &ServerEvent::ScoreboardUpdate(outcome.players.clone()),
                None,
            );
            if outcome.finished {
                broadcast(&groups, &update.class_id, &ServerEvent::GameFinished(outcome.players), None);
            }
        }
        Ok(())
    }

    pub async fn disconnect(&self, connection_id: ConnectionId) {
        let left = self.leave_all_groups(connection_id).await;
        tracing::info!(connection_id, rooms = ?left, "Duel connection closed");
    }

    async fn leave_all_groups(&self, connection_id: ConnectionId) -> Vec<String> {
        let mut groups = self.groups.lock().await;
        let mut left = Vec::new();
        for (room_id, group) in groups.iter_mut() {
            if group.remove(&connection_id).is_some() {
                left.push(room_id.clone());
            }
        }
        groups.retain(|_, group| !group.is_empty());
        left
    }

    /// Evicts expired rooms together with their broadcast groups.
    pub async fn sweep_rooms(&self, now: Instant) -> Vec<String> {
        let retention = Retention::from(&self.config);
        let mut groups = self.groups.lock().await;
        let evicted = self.room_manager.evict_expired(now, &retention).await;
        for room_id in &evicted {
            groups.remove(room_id);
        }
        evicted
    }

    pub fn start_room_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        let interval = self.config.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = self.sweep_rooms(Instant::now()).await;
                if !evicted.is_empty() {
                    tracing::info!(count = evicted.len(), "Room sweep evicted rooms");
                }
            }
        })
    }
}

fn subscribe(
    groups: &mut HashMap<String, Group>,
    room_id: &str,
    connection_id: ConnectionId,
    sender: &mpsc::UnboundedSender<Message>,
) {
    groups
        .entry(room_id.to_string())
        .or_default()
        .insert(connection_id, sender.clone());
}

/// Queues `event` for every connection in the room's group except `except`.
fn broadcast(
    groups: &HashMap<String, Group>,
    room_id: &str,
    event: &ServerEvent,
    except: Option<ConnectionId>,
) {
    let message = match event.to_message() {
        Ok(message) => message,
        Err(e) => {
            tracing::error!(room_id = %room_id, error = %e, "Failed to serialize broadcast");
            return;
        }
    };

    let Some(group) = groups.get(room_id) else {
        return;
    };

    for (connection_id, sender) in group {
        if Some(*connection_id) == except {
            continue;
        }
        if sender.send(message.clone()).is_err() {
            tracing::debug!(room_id = %room_id, connection_id, "Skipping closed connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duel::room::{Player, RoomStatus};
    use crate::duel::terms::{InMemoryTermStore, Term};
    use crate::error::DuelError;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct FailingTerms;

    #[async_trait]
    impl TermSource for FailingTerms {
        async fn terms_for_set(&self, _set_id: i64) -> Result<Vec<Term>> {
            Err(DuelError::term_source("database unavailable"))
        }
    }

    /// Term source that parks inside the fetch until released.
    #[derive(Default)]
    struct GatedTerms {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl TermSource for GatedTerms {
        async fn terms_for_set(&self, _set_id: i64) -> Result<Vec<Term>> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(vec![
                Term::new(1, "cat", "a small domesticated feline"),
                Term::new(2, "dog", "a domesticated canine"),
                Term::new(3, "bird", "a feathered flying animal"),
                Term::new(4, "fish", "an aquatic gill-breathing animal"),
            ])
        }
    }

    struct Client {
        id: ConnectionId,
        session: Session,
        tx: mpsc::UnboundedSender<Message>,
        rx: mpsc::UnboundedReceiver<Message>,
    }

    impl Client {
        fn new(server: &DuelServer, user_id: i64) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                id: server.next_connection_id(),
                session: Session::new(user_id),
                tx,
                rx,
            }
        }

        fn next(&mut self) -> Option<ServerEvent> {
            self.rx.try_recv().ok().map(|message| {
                serde_json::from_str(message.to_str().unwrap()).unwrap()
            })
        }
    }

    async fn server_with_animals() -> DuelServer {
        let store = InMemoryTermStore::new();
        store
            .insert_set(
                7,
                vec![
                    Term::new(1, "cat", "a small domesticated feline"),
                    Term::new(2, "dog", "a domesticated canine"),
                    Term::new(3, "bird", "a feathered flying animal"),
                    Term::new(4, "fish", "an aquatic gill-breathing animal"),
                ],
            )
            .await;
        DuelServer::new(Arc::new(store), DuelConfig::default())
    }

    fn create(class_id: &str, host_id: i64, set_id: Option<i64>) -> CreateDuel {
        CreateDuel {
            class_id: class_id.to_string(),
            host_id,
            host_name: "host".to_string(),
            set_id,
        }
    }

    fn join(class_id: &str, user_id: i64, username: &str) -> JoinDuel {
        JoinDuel {
            class_id: class_id.to_string(),
            user_id,
            username: username.to_string(),
        }
    }

    fn start(class_id: &str) -> StartGame {
        StartGame {
            class_id: class_id.to_string(),
        }
    }

    fn progress(class_id: &str, user_id: i64, score: i64, progress: f64) -> ProgressUpdate {
        ProgressUpdate {
            class_id: class_id.to_string(),
            user_id,
            score,
            progress,
        }
    }

    #[tokio::test]
    async fn test_duel_created_goes_to_other_members_only() {
        let server = server_with_animals().await;
        let mut host = Client::new(&server, 42);
        let mut alice = Client::new(&server, 99);

        server.create_duel(host.id, &host.tx, host.session, create("C1", 42, Some(7))).await.unwrap();
        server.join_duel(alice.id, &alice.tx, alice.session, join("C1", 99, "alice")).await.unwrap();
        assert!(matches!(host.next(), Some(ServerEvent::PlayerJoined(_))));
        assert!(matches!(alice.next(), Some(ServerEvent::PlayerJoined(_))));

        server.create_duel(host.id, &host.tx, host.session, create("C1", 42, Some(7))).await.unwrap();
        assert_eq!(alice.next(), Some(ServerEvent::DuelCreated));
        assert_eq!(host.next(), None);
    }

    #[tokio::test]
    async fn test_create_with_foreign_host_id_is_rejected() {
        let server = server_with_animals().await;
        let intruder = Client::new(&server, 5);

        let result = server
            .create_duel(intruder.id, &intruder.tx, intruder.session, create("C1", 42, Some(7)))
            .await;
        assert!(matches!(result, Err(DuelError::IdentityMismatch { .. })));
        assert!(!server.room_manager().room_exists("C1").await);
    }

    #[tokio::test]
    async fn test_join_missing_room_reaches_nobody() {
        let server = server_with_animals().await;
        let mut alice = Client::new(&server, 99);

        let result = server.join_duel(alice.id, &alice.tx, alice.session, join("C9", 99, "alice")).await;
        assert!(matches!(result, Err(DuelError::RoomNotFound(_))));
        assert_eq!(alice.next(), None);
    }

    #[tokio::test]
    async fn test_full_round() {
        let server = server_with_animals().await;
        let mut host = Client::new(&server, 42);
        let mut alice = Client::new(&server, 99);

        server.create_duel(host.id, &host.tx, host.session, create("C1", 42, Some(7))).await.unwrap();
        server.join_duel(alice.id, &alice.tx, alice.session, join("C1", 99, "alice")).await.unwrap();
        assert_eq!(alice.next(), Some(ServerEvent::PlayerJoined(vec![Player::new(99, "alice")])));
        host.next();

        server.start_game(host.session, start("C1")).await.unwrap();
        for client in [&mut host, &mut alice] {
            match client.next() {
                Some(ServerEvent::GameStarted { questions }) => {
                    assert_eq!(questions.len(), 4);
                    for q in questions {
                        assert_eq!(q.options.len(), 4);
                        assert_eq!(q.options.iter().filter(|o| **o == q.correct_answer).count(), 1);
                    }
                }
                other => panic!("expected game_started, got {other:?}"),
            }
        }

        server.update_progress(alice.session, progress("C1", 99, 100, 25.0)).await.unwrap();
        let expected = Player { id: 99, username: "alice".into(), score: 100, progress: 25.0 };
        assert_eq!(alice.next(), Some(ServerEvent::ScoreboardUpdate(vec![expected.clone()])));
        assert_eq!(host.next(), Some(ServerEvent::ScoreboardUpdate(vec![expected])));

        server.update_progress(alice.session, progress("C1", 99, 400, 100.0)).await.unwrap();
        assert!(matches!(alice.next(), Some(ServerEvent::ScoreboardUpdate(_))));
        assert!(matches!(alice.next(), Some(ServerEvent::GameFinished(_))));
        assert_eq!(
            server.room_snapshot("C1").await.unwrap().status,
            RoomStatus::Finished
        );
    }

    #[tokio::test]
    async fn test_non_host_cannot_start() {
        let server = server_with_animals().await;
        let host = Client::new(&server, 42);
        let mut alice = Client::new(&server, 99);

        server.create_duel(host.id, &host.tx, host.session, create("C1", 42, Some(7))).await.unwrap();
        server.join_duel(alice.id, &alice.tx, alice.session, join("C1", 99, "alice")).await.unwrap();
        alice.next();

        let result = server.start_game(alice.session, start("C1")).await;
        assert!(matches!(result, Err(DuelError::NotHost(_))));
        assert_eq!(alice.next(), None);
        assert_eq!(server.room_snapshot("C1").await.unwrap().status, RoomStatus::Waiting);
    }

    #[tokio::test]
    async fn test_injected_room_manager_is_shared() {
        let manager = RoomManager::new();
        let server = DuelServer::with_room_manager(
            manager.clone(),
            Arc::new(InMemoryTermStore::new()),
            DuelConfig::default(),
        );
        let host = Client::new(&server, 42);

        server.create_duel(host.id, &host.tx, host.session, create("C1", 42, None)).await.unwrap();
        assert!(manager.room_exists("C1").await);
    }

    #[tokio::test]
    async fn test_second_start_while_fetching_is_refused() {
        let terms = Arc::new(GatedTerms::default());
        let server = Arc::new(DuelServer::new(terms.clone(), DuelConfig::default()));
        let mut host = Client::new(&server, 42);
        server.create_duel(host.id, &host.tx, host.session, create("C1", 42, Some(7))).await.unwrap();

        let first = tokio::spawn({
            let server = server.clone();
            let session = host.session;
            async move { server.start_game(session, start("C1")).await }
        });
        terms.entered.notified().await;

        let second = server.start_game(host.session, start("C1")).await;
        assert!(matches!(second, Err(DuelError::StartInProgress(_))));
        assert_eq!(server.room_snapshot("C1").await.unwrap().status, RoomStatus::Starting);
        assert_eq!(host.next(), None);

        terms.release.notify_one();
        first.await.unwrap().unwrap();

        match host.next() {
            Some(ServerEvent::GameStarted { questions }) => assert_eq!(questions.len(), 4),
            other => panic!("expected game_started, got {other:?}"),
        }
        assert_eq!(host.next(), None);
        assert_eq!(server.room_snapshot("C1").await.unwrap().status, RoomStatus::Playing);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_progress_broadcasts_in_room_order() {
        let server = Arc::new(server_with_animals().await);
        let mut host = Client::new(&server, 42);
        server.create_duel(host.id, &host.tx, host.session, create("C1", 42, Some(7))).await.unwrap();

        let players: Vec<Client> = (1..=8).map(|id| Client::new(&server, id)).collect();
        for player in &players {
            let name = format!("player{}", player.session.user_id);
            server
                .join_duel(player.id, &player.tx, player.session, join("C1", player.session.user_id, &name))
                .await
                .unwrap();
        }
        while host.next().is_some() {}

        for round in 0..200i64 {
            let reports: Vec<_> = players
                .iter()
                .map(|player| {
                    let server = server.clone();
                    let session = player.session;
                    let update = progress("C1", session.user_id, round * 10 + session.user_id, 50.0);
                    tokio::spawn(async move { server.update_progress(session, update).await })
                })
                .collect();
            for report in reports {
                report.await.unwrap().unwrap();
            }

            let mut last = None;
            while let Some(event) = host.next() {
                last = Some(event);
            }
            let expected = server.room_snapshot("C1").await.unwrap().players;
            assert_eq!(last, Some(ServerEvent::ScoreboardUpdate(expected)), "round {round}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_every_rostered_player_receives_the_round() {
        for _ in 0..50 {
            let server = Arc::new(server_with_animals().await);
            let host = Client::new(&server, 42);
            server.create_duel(host.id, &host.tx, host.session, create("C1", 42, Some(7))).await.unwrap();

            let mut players: Vec<Client> = (1..=8).map(|id| Client::new(&server, id)).collect();
            let joins: Vec<_> = players
                .iter()
                .map(|player| {
                    let server = server.clone();
                    let (id, tx, session) = (player.id, player.tx.clone(), player.session);
                    tokio::spawn(async move {
                        let name = format!("player{}", session.user_id);
                        server
                            .join_duel(id, &tx, session, join("C1", session.user_id, &name))
                            .await
                    })
                })
                .collect();
            server.start_game(host.session, start("C1")).await.unwrap();
            for join in joins {
                let _ = join.await.unwrap();
            }

            let roster = server.room_snapshot("C1").await.unwrap().players;
            for player in players.iter_mut() {
                let rostered = roster.iter().any(|p| p.id == player.session.user_id);
                let mut started = false;
                while let Some(event) = player.next() {
                    started |= matches!(event, ServerEvent::GameStarted { .. });
                }
                assert_eq!(rostered, started, "player {}", player.session.user_id);
            }
        }
    }

    #[tokio::test]
    async fn test_failed_term_fetch_starts_empty_round() {
        let server = DuelServer::new(Arc::new(FailingTerms), DuelConfig::default());
        let mut host = Client::new(&server, 42);
        server.create_duel(host.id, &host.tx, host.session, create("C1", 42, Some(7))).await.unwrap();

        server.start_game(host.session, start("C1")).await.unwrap();
        assert_eq!(host.next(), Some(ServerEvent::GameStarted { questions: vec![] }));
        assert_eq!(server.room_snapshot("C1").await.unwrap().status, RoomStatus::Playing);
    }

    #[tokio::test]
    async fn test_progress_for_other_user_is_rejected() {
        let server = server_with_animals().await;
        let host = Client::new(&server, 42);
        server.create_duel(host.id, &host.tx, host.session, create("C1", 42, Some(7))).await.unwrap();

        let result = server.update_progress(host.session, progress("C1", 99, 1000, 100.0)).await;
        assert!(matches!(result, Err(DuelError::IdentityMismatch { .. })));
    }

    #[tokio::test]
    async fn test_disconnect_keeps_roster_but_stops_delivery() {
        let server = server_with_animals().await;
        let mut host = Client::new(&server, 42);
        let alice = Client::new(&server, 99);

        server.create_duel(host.id, &host.tx, host.session, create("C1", 42, Some(7))).await.unwrap();
        server.join_duel(alice.id, &alice.tx, alice.session, join("C1", 99, "alice")).await.unwrap();
        host.next();

        server.disconnect(host.id).await;
        server.update_progress(alice.session, progress("C1", 99, 10, 0.0)).await.unwrap();

        assert_eq!(host.next(), None);
        assert_eq!(server.room_snapshot("C1").await.unwrap().players.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_drops_rooms_and_groups() {
        let server = server_with_animals().await;
        let mut host = Client::new(&server, 42);
        server.create_duel(host.id, &host.tx, host.session, create("C1", 42, Some(7))).await.unwrap();

        let later = Instant::now() + server.config().idle_timeout() + Duration::from_secs(1);
        assert_eq!(server.sweep_rooms(later).await, vec!["C1".to_string()]);
        assert!(server.room_snapshot("C1").await.is_none());

        let mut alice = Client::new(&server, 99);
        let result = server.join_duel(alice.id, &alice.tx, alice.session, join("C1", 99, "alice")).await;
        assert!(matches!(result, Err(DuelError::RoomNotFound(_))));
        assert_eq!(alice.next(), None);
        assert_eq!(host.next(), None);
    }
}
