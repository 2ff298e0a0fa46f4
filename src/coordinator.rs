//! Composition root
//!
//! The coordinator wires the room registry, the per-room sessions and
//! the heartbeat monitor to the transport's broadcast capability, and
//! routes every inbound message to the right room. It is an explicitly
//! constructed, explicitly owned object: the transport adapter holds
//! one and calls into it, and nothing in the engine is reachable
//! through globals.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    constants,
    event::{ClientMessage, ErrorReason, ServerEvent},
    heartbeat::{DisconnectedPlayer, HeartbeatConfig, HeartbeatMonitor},
    names::NamePolicy,
    player::{PlayerId, Role},
    question::QuestionBank,
    registry::{Room, RoomRegistry, Visibility},
    room_code::RoomCode,
    session::SessionConfig,
    transport::{Broadcaster, ConnectionId, MatchSink},
};

struct CoordinatorInner<B: Broadcaster> {
    registry: RoomRegistry<B>,
    heartbeat: HeartbeatMonitor<B>,
    broadcaster: Arc<B>,
    bank: Arc<dyn QuestionBank>,
}

/// Routes messages between the transport and per-room sessions
///
/// Cheap to clone; clones share the same engine. Lifecycle is
/// process-start to process-stop: construct once, call
/// [`Coordinator::start`], and feed it connection events and messages.
pub struct Coordinator<B: Broadcaster> {
    inner: Arc<CoordinatorInner<B>>,
}

impl<B: Broadcaster> Clone for Coordinator<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Broadcaster> Coordinator<B> {
    /// Creates a coordinator with default policies
    pub fn new(broadcaster: Arc<B>, bank: Arc<dyn QuestionBank>, sink: Arc<dyn MatchSink>) -> Self {
        Self::with_config(
            broadcaster,
            bank,
            sink,
            NamePolicy::default(),
            SessionConfig::default(),
            HeartbeatConfig::default(),
        )
    }

    /// Creates a coordinator with explicit policies
    pub fn with_config(
        broadcaster: Arc<B>,
        bank: Arc<dyn QuestionBank>,
        sink: Arc<dyn MatchSink>,
        policy: NamePolicy,
        session_config: SessionConfig,
        heartbeat_config: HeartbeatConfig,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                registry: RoomRegistry::new(
                    policy,
                    session_config,
                    Arc::clone(&broadcaster),
                    sink,
                ),
                heartbeat: HeartbeatMonitor::new(heartbeat_config, Arc::clone(&broadcaster)),
                broadcaster,
                bank,
            }),
        }
    }

    /// Starts background liveness probing
    pub fn start(&self) {
        self.inner.heartbeat.start_probes();
    }

    /// Stops background liveness probing
    pub fn shutdown(&self) {
        self.inner.heartbeat.stop_probes();
    }

    /// The room registry, for host-side inspection
    pub fn registry(&self) -> &RoomRegistry<B> {
        &self.inner.registry
    }

    /// The heartbeat monitor, for host-side inspection
    pub fn heartbeat(&self) -> &HeartbeatMonitor<B> {
        &self.inner.heartbeat
    }

    fn reply(&self, connection: ConnectionId, reason: ErrorReason) {
        self.inner.broadcaster.send(connection, &reason.into());
    }

    // --- connection lifecycle ---

    /// Registers a freshly opened connection for liveness tracking
    pub fn connection_opened(&self, connection: ConnectionId) {
        debug!(%connection, "connection opened");
        self.inner.heartbeat.register(connection);
    }

    /// Handles an unexpected connection drop
    ///
    /// The player (if any) stays in their room's roster with the
    /// connection unbound, and a grace record is held so they can
    /// reconnect; if the window elapses first, the departure becomes
    /// permanent.
    pub async fn connection_lost(&self, connection: ConnectionId) {
        debug!(%connection, "connection lost");
        self.inner.heartbeat.forget(connection);

        let Some(room) = self.inner.registry.unbind(connection) else {
            return;
        };
        let Some(player) = room.session().suspend_connection(connection).await else {
            return;
        };

        let record = DisconnectedPlayer::capture(&player, room.code.clone());
        let coordinator = self.clone();
        self.inner
            .heartbeat
            .hold_for_reconnect(record, move |expired| async move {
                coordinator.finalize_expiry(expired).await;
            });
    }

    /// Removes a player whose reconnection window elapsed
    async fn finalize_expiry(&self, record: DisconnectedPlayer) {
        info!(
            player = %record.player,
            room = %record.room,
            "player permanently left after grace period"
        );
        self.inner
            .registry
            .remove_player(&record.room, record.player)
            .await;
    }

    /// Force-closes a room, notifying and detaching its members
    pub async fn close_room(&self, code: &RoomCode) -> bool {
        let Some(room) = self.inner.registry.close_room(code) else {
            return false;
        };
        self.inner.heartbeat.drop_room(code);
        self.inner
            .broadcaster
            .broadcast(code, &ServerEvent::RoomClosed);
        // Stop any running flow so the timer cannot fire into the
        // removed room.
        room.session().end_game().await;
        true
    }

    // --- message dispatch ---

    /// Routes one inbound message from a connection
    pub async fn dispatch(&self, connection: ConnectionId, message: ClientMessage) {
        match message {
            ClientMessage::CreateRoom {
                name,
                visibility,
                password,
            } => {
                self.create_room(connection, name, visibility, password.as_deref())
                    .await;
            }
            ClientMessage::ListRooms => {
                let rooms = self.inner.registry.list_public().await;
                self.inner
                    .broadcaster
                    .send(connection, &ServerEvent::RoomList { rooms });
            }
            ClientMessage::Join {
                code,
                name,
                password,
                as_admin,
            } => {
                self.join(connection, &code, &name, password.as_deref(), as_admin)
                    .await;
            }
            ClientMessage::Leave => {
                self.inner.registry.remove_connection(connection).await;
            }
            ClientMessage::Answer { option, seq } => {
                if let Some(room) = self.inner.registry.room_of(connection) {
                    room.session().submit_answer(connection, option, seq).await;
                }
            }
            ClientMessage::Start => {
                if let Some(room) = self.admin_room(connection).await {
                    room.session().start().await;
                }
            }
            ClientMessage::Next => {
                if let Some(room) = self.admin_room(connection).await {
                    room.session().next().await;
                }
            }
            ClientMessage::ShowPodium => {
                if let Some(room) = self.admin_room(connection).await {
                    room.session().show_podium().await;
                }
            }
            ClientMessage::ShowLeaderboard => {
                if let Some(room) = self.admin_room(connection).await {
                    room.session().show_leaderboard().await;
                }
            }
            ClientMessage::EndGame => {
                if let Some(room) = self.admin_room(connection).await {
                    room.session().end_game().await;
                }
            }
            ClientMessage::Pong => self.inner.heartbeat.beat(connection),
            ClientMessage::Reconnect { player } => self.reconnect(connection, player).await,
            ClientMessage::GetState => {
                if let Some(room) = self.inner.registry.room_of(connection) {
                    let state = room.session().snapshot().await;
                    self.inner
                        .broadcaster
                        .send(connection, &ServerEvent::State { state });
                }
            }
        }
    }

    /// Resolves the sender's room for an admin-only message
    ///
    /// Rejections go back to the sender as error events; they never
    /// disturb the room.
    async fn admin_room(&self, connection: ConnectionId) -> Option<Arc<Room<B>>> {
        let Some(room) = self.inner.registry.room_of(connection) else {
            self.reply(connection, ErrorReason::NotInRoom);
            return None;
        };
        if room.session().role_of(connection).await != Some(Role::Admin) {
            warn!(%connection, room = %room.code, "admin action from non-admin ignored");
            self.reply(connection, ErrorReason::NotAdmin);
            return None;
        }
        Some(room)
    }

    async fn create_room(
        &self,
        connection: ConnectionId,
        name: String,
        visibility: Visibility,
        password: Option<&str>,
    ) {
        let name = name.trim().to_owned();
        if name.is_empty() || name.chars().count() > constants::room::MAX_NAME_LENGTH {
            self.reply(connection, ErrorReason::InvalidRoomName);
            return;
        }

        let created = self
            .inner
            .registry
            .create_room(name, connection, visibility, password, |code| {
                self.inner.bank.load_questions(code)
            });
        match created {
            Ok(room) => {
                let room = room.summary().await;
                self.inner
                    .broadcaster
                    .send(connection, &ServerEvent::RoomCreated { room });
            }
            Err(error) => {
                warn!(%connection, %error, "room creation failed");
                self.reply(connection, ErrorReason::NoQuestions);
            }
        }
    }

    async fn join(
        &self,
        connection: ConnectionId,
        code: &RoomCode,
        name: &str,
        password: Option<&str>,
        as_admin: bool,
    ) {
        match self
            .inner
            .registry
            .admit(code, name, connection, password, as_admin)
            .await
        {
            Ok((room, player)) => {
                let event = ServerEvent::Welcome {
                    player,
                    room: room.summary().await,
                    state: room.session().snapshot().await,
                };
                self.inner.broadcaster.send(connection, &event);
            }
            Err(error) => {
                debug!(%connection, room = %code, %error, "admission rejected");
                self.reply(connection, error.into());
            }
        }
    }

    /// Restores a dropped player under a new connection
    ///
    /// First-writer-wins against the scheduled expiry: if the grace
    /// window already elapsed, the record is gone and the player must
    /// join again from scratch.
    async fn reconnect(&self, connection: ConnectionId, player: PlayerId) {
        let Some(record) = self.inner.heartbeat.claim(player) else {
            self.reply(connection, ErrorReason::ReconnectExpired);
            return;
        };
        let Some(room) = self.inner.registry.find(&record.room) else {
            self.reply(connection, ErrorReason::RoomNotFound);
            return;
        };
        let Some(restored) = room.session().restore_player(player, connection).await else {
            self.reply(connection, ErrorReason::ReconnectExpired);
            return;
        };

        self.inner.registry.bind(connection, record.room.clone());
        self.inner.heartbeat.register(connection);

        let event = ServerEvent::Welcome {
            player: restored,
            room: room.summary().await,
            state: room.session().snapshot().await,
        };
        self.inner.broadcaster.send(connection, &event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::{
        question::{BankError, Question},
        session::GamePhase,
        transport::{DiscardSink, RecordingBroadcaster},
    };

    /// A bank serving the same fixed list to every room
    struct StaticBank(Vec<Question>);

    impl QuestionBank for StaticBank {
        fn load_questions(&self, room: &RoomCode) -> Result<Vec<Question>, BankError> {
            if self.0.is_empty() {
                return Err(BankError::Empty(room.clone()));
            }
            Ok(self.0.clone())
        }
    }

    fn question(correct: usize, time_limit: u64) -> Question {
        Question {
            text: "Which option is right?".to_owned(),
            options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            correct,
            time_limit: Duration::from_secs(time_limit),
            points: 1000,
        }
    }

    fn coordinator(
        questions: Vec<Question>,
    ) -> (Coordinator<RecordingBroadcaster>, Arc<RecordingBroadcaster>) {
        let broadcaster = Arc::new(RecordingBroadcaster::new());
        let coordinator = Coordinator::new(
            broadcaster.clone(),
            Arc::new(StaticBank(questions)),
            Arc::new(DiscardSink),
        );
        (coordinator, broadcaster)
    }

    async fn create_room(
        coordinator: &Coordinator<RecordingBroadcaster>,
        broadcaster: &RecordingBroadcaster,
    ) -> RoomCode {
        let creator = ConnectionId::new();
        coordinator.connection_opened(creator);
        coordinator
            .dispatch(
                creator,
                ClientMessage::CreateRoom {
                    name: "Quiz Night".to_owned(),
                    visibility: Visibility::Public,
                    password: None,
                },
            )
            .await;
        broadcaster
            .direct_events(creator)
            .iter()
            .find_map(|event| match event {
                ServerEvent::RoomCreated { room } => Some(room.code.clone()),
                _ => None,
            })
            .expect("room should have been created")
    }

    async fn join(
        coordinator: &Coordinator<RecordingBroadcaster>,
        code: &RoomCode,
        name: &str,
        as_admin: bool,
    ) -> ConnectionId {
        let connection = ConnectionId::new();
        coordinator.connection_opened(connection);
        coordinator
            .dispatch(
                connection,
                ClientMessage::Join {
                    code: code.clone(),
                    name: name.to_owned(),
                    password: None,
                    as_admin,
                },
            )
            .await;
        connection
    }

    async fn phase(
        coordinator: &Coordinator<RecordingBroadcaster>,
        code: &RoomCode,
    ) -> GamePhase {
        coordinator
            .registry()
            .find(code)
            .unwrap()
            .session()
            .phase()
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_quiz_flow_with_early_results() {
        let (coordinator, broadcaster) = coordinator(vec![question(1, 20)]);
        let code = create_room(&coordinator, &broadcaster).await;

        let ana = join(&coordinator, &code, "Ana", false).await;
        let bob = join(&coordinator, &code, "Bob", false).await;
        let admin = join(&coordinator, &code, "Quizmaster", true).await;

        coordinator.dispatch(admin, ClientMessage::Start).await;

        let events = broadcaster.room_events(&code);
        let ticks: Vec<u64> = events
            .iter()
            .filter_map(|event| match event {
                ServerEvent::Countdown { seconds } => Some(*seconds),
                _ => None,
            })
            .collect();
        assert_eq!(ticks, vec![3, 2, 1]);
        let time_limit = events
            .iter()
            .find_map(|event| match event {
                ServerEvent::Question { question, .. } => Some(question.time_limit),
                _ => None,
            })
            .expect("question should have been broadcast");
        assert_eq!(time_limit, Duration::from_secs(20));

        broadcaster.clear();
        tokio::time::advance(Duration::from_secs(5)).await;
        coordinator
            .dispatch(ana, ClientMessage::Answer { option: 1, seq: 0 })
            .await;
        coordinator
            .dispatch(bob, ClientMessage::Answer { option: 3, seq: 0 })
            .await;

        // Both answered, so results fire well before the 20s timer.
        assert_eq!(phase(&coordinator, &code).await, GamePhase::Results);

        let events = broadcaster.room_events(&code);
        let (ranking, correct) = events
            .iter()
            .find_map(|event| match event {
                ServerEvent::Results {
                    ranking, correct, ..
                } => Some((ranking.clone(), *correct)),
                _ => None,
            })
            .expect("results should have been broadcast");
        assert_eq!(correct, 1);
        assert_eq!(ranking[0].name, "Ana");
        assert_eq!(ranking[0].score, 875);
        assert_eq!(ranking[1].name, "Bob");
        assert_eq!(ranking[1].score, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_joiner_waits_until_game_ends() {
        let (coordinator, broadcaster) = coordinator(vec![question(0, 20), question(0, 20)]);
        let code = create_room(&coordinator, &broadcaster).await;

        let ana = join(&coordinator, &code, "Ana", false).await;
        let admin = join(&coordinator, &code, "Quizmaster", true).await;
        coordinator.dispatch(admin, ClientMessage::Start).await;

        let carol = join(&coordinator, &code, "Carol", false).await;
        let carol_player = broadcaster
            .direct_events(carol)
            .iter()
            .find_map(|event| match event {
                ServerEvent::Welcome { player, .. } => Some(player.clone()),
                _ => None,
            })
            .unwrap();
        assert!(carol_player.waiting);

        // Carol cannot answer while waiting.
        coordinator
            .dispatch(carol, ClientMessage::Answer { option: 0, seq: 0 })
            .await;
        assert_eq!(phase(&coordinator, &code).await, GamePhase::Question);

        coordinator
            .dispatch(ana, ClientMessage::Answer { option: 0, seq: 0 })
            .await;
        coordinator.dispatch(admin, ClientMessage::EndGame).await;

        let state = coordinator
            .registry()
            .find(&code)
            .unwrap()
            .session()
            .snapshot()
            .await;
        assert_eq!(state.phase, GamePhase::Lobby);
        let carol_row = state
            .players
            .iter()
            .find(|p| p.name == "Carol")
            .unwrap();
        assert!(!carol_row.waiting);
        assert!(state.players.iter().all(|p| p.score == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_within_grace_restores_state() {
        let (coordinator, broadcaster) = coordinator(vec![question(0, 20)]);
        let code = create_room(&coordinator, &broadcaster).await;

        let ana = join(&coordinator, &code, "Ana", false).await;
        let _bob = join(&coordinator, &code, "Bob", false).await;
        let admin = join(&coordinator, &code, "Quizmaster", true).await;
        coordinator.dispatch(admin, ClientMessage::Start).await;

        coordinator
            .dispatch(ana, ClientMessage::Answer { option: 0, seq: 0 })
            .await;
        let ana_id = broadcaster
            .direct_events(ana)
            .iter()
            .find_map(|event| match event {
                ServerEvent::Welcome { player, .. } => Some(player.id),
                _ => None,
            })
            .unwrap();

        coordinator.connection_lost(ana).await;
        assert!(coordinator.heartbeat().is_held(ana_id));

        tokio::time::sleep(Duration::from_secs(5)).await;
        let new_conn = ConnectionId::new();
        coordinator.connection_opened(new_conn);
        coordinator
            .dispatch(new_conn, ClientMessage::Reconnect { player: ana_id })
            .await;

        let restored = broadcaster
            .direct_events(new_conn)
            .iter()
            .find_map(|event| match event {
                ServerEvent::Welcome { player, .. } => Some(player.clone()),
                _ => None,
            })
            .expect("reconnection should be welcomed");
        assert_eq!(restored.id, ana_id);
        assert_eq!(restored.current_answer, Some(0));
        assert!(!coordinator.heartbeat().is_held(ana_id));

        // Her answer still counts toward closing the question.
        coordinator
            .dispatch(_bob, ClientMessage::Answer { option: 1, seq: 0 })
            .await;
        assert_eq!(phase(&coordinator, &code).await, GamePhase::Results);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_past_grace_is_a_fresh_start() {
        let (coordinator, broadcaster) = coordinator(vec![question(0, 20)]);
        let code = create_room(&coordinator, &broadcaster).await;

        let ana = join(&coordinator, &code, "Ana", false).await;
        let _bob = join(&coordinator, &code, "Bob", false).await;
        let ana_id = broadcaster
            .direct_events(ana)
            .iter()
            .find_map(|event| match event {
                ServerEvent::Welcome { player, .. } => Some(player.id),
                _ => None,
            })
            .unwrap();

        coordinator.connection_lost(ana).await;
        broadcaster.clear();

        // Grace period is 10s; let it elapse.
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!coordinator.heartbeat().is_held(ana_id));

        // The room was notified of the permanent departure.
        let events = broadcaster.room_events(&code);
        assert!(events.iter().any(|event| matches!(
            event,
            ServerEvent::PlayerLeft {
                temporary: false,
                name,
                ..
            } if name == "Ana"
        )));

        // A late reconnect attempt is rejected.
        let new_conn = ConnectionId::new();
        coordinator.connection_opened(new_conn);
        coordinator
            .dispatch(new_conn, ClientMessage::Reconnect { player: ana_id })
            .await;
        assert!(broadcaster.direct_events(new_conn).iter().any(|event| {
            matches!(
                event,
                ServerEvent::Error {
                    reason: ErrorReason::ReconnectExpired
                }
            )
        }));

        // And the name is free again for a brand-new join.
        let rejoined = join(&coordinator, &code, "Ana", false).await;
        assert!(broadcaster
            .direct_events(rejoined)
            .iter()
            .any(|event| matches!(event, ServerEvent::Welcome { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admin_actions_require_admin_role() {
        let (coordinator, broadcaster) = coordinator(vec![question(0, 20)]);
        let code = create_room(&coordinator, &broadcaster).await;

        let ana = join(&coordinator, &code, "Ana", false).await;
        coordinator.dispatch(ana, ClientMessage::Start).await;

        assert_eq!(phase(&coordinator, &code).await, GamePhase::Lobby);
        assert!(broadcaster.direct_events(ana).iter().any(|event| {
            matches!(
                event,
                ServerEvent::Error {
                    reason: ErrorReason::NotAdmin
                }
            )
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rooms_progress_independently() {
        let (coordinator, broadcaster) = coordinator(vec![question(0, 20)]);
        let first = create_room(&coordinator, &broadcaster).await;
        let second = create_room(&coordinator, &broadcaster).await;

        let ana = join(&coordinator, &first, "Ana", false).await;
        let admin = join(&coordinator, &first, "Quizmaster", true).await;
        join(&coordinator, &second, "Bob", false).await;

        coordinator.dispatch(admin, ClientMessage::Start).await;
        coordinator
            .dispatch(ana, ClientMessage::Answer { option: 0, seq: 0 })
            .await;

        assert_eq!(phase(&coordinator, &first).await, GamePhase::Results);
        assert_eq!(phase(&coordinator, &second).await, GamePhase::Lobby);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_room_notifies_and_drops_grace_records() {
        let (coordinator, broadcaster) = coordinator(vec![question(0, 20)]);
        let code = create_room(&coordinator, &broadcaster).await;

        let ana = join(&coordinator, &code, "Ana", false).await;
        let ana_id = broadcaster
            .direct_events(ana)
            .iter()
            .find_map(|event| match event {
                ServerEvent::Welcome { player, .. } => Some(player.id),
                _ => None,
            })
            .unwrap();
        let _bob = join(&coordinator, &code, "Bob", false).await;
        coordinator.connection_lost(ana).await;

        assert!(coordinator.close_room(&code).await);
        assert_eq!(coordinator.registry().room_count(), 0);
        assert!(!coordinator.heartbeat().is_held(ana_id));
        assert!(broadcaster
            .room_events(&code)
            .iter()
            .any(|event| matches!(event, ServerEvent::RoomClosed)));
    }

    #[tokio::test]
    async fn test_create_room_with_empty_bank_fails() {
        let (coordinator, broadcaster) = coordinator(Vec::new());
        let creator = ConnectionId::new();
        coordinator.connection_opened(creator);
        coordinator
            .dispatch(
                creator,
                ClientMessage::CreateRoom {
                    name: "Quiz".to_owned(),
                    visibility: Visibility::Public,
                    password: None,
                },
            )
            .await;

        assert_eq!(coordinator.registry().room_count(), 0);
        assert!(broadcaster.direct_events(creator).iter().any(|event| {
            matches!(
                event,
                ServerEvent::Error {
                    reason: ErrorReason::NoQuestions
                }
            )
        }));
    }

    #[tokio::test]
    async fn test_list_rooms_returns_public_summaries() {
        let (coordinator, broadcaster) = coordinator(vec![question(0, 20)]);
        let code = create_room(&coordinator, &broadcaster).await;
        join(&coordinator, &code, "Ana", false).await;

        let asker = ConnectionId::new();
        coordinator.dispatch(asker, ClientMessage::ListRooms).await;
        let rooms = broadcaster
            .direct_events(asker)
            .iter()
            .find_map(|event| match event {
                ServerEvent::RoomList { rooms } => Some(rooms.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].players, 1);
    }
}
