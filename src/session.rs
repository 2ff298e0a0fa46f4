//! Per-room game session
//!
//! This module contains the state machine driving one room's quiz: the
//! lobby, the synchronized countdown, timed questions, answer
//! arbitration, results, and the podium/leaderboard reveal at the end.
//! All mutation of a room's state funnels through a single session-scoped
//! lock, so concurrent answers within a room are serialized while
//! different rooms proceed independently.

use std::{collections::HashMap, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::{Mutex, MutexGuard},
    time::{Instant, sleep},
};
use tracing::{debug, info, warn};

use crate::{
    clock::LogicalClock,
    constants,
    event::{ErrorReason, PlayerOutcome, RankEntry, ServerEvent, SessionSnapshot},
    player::{AnswerRecord, Player, PlayerId, Role},
    question::Question,
    room_code::RoomCode,
    scoring,
    timer::TaskHandle,
    transport::{Broadcaster, ConnectionId, MatchSink},
};

/// The phase a room's quiz is currently in
///
/// The game progresses `Lobby → Countdown → Question → Results`, looping
/// back to `Countdown` while questions remain, then `Podium →
/// Leaderboard`. `end_game` returns to `Lobby` from any phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    /// Waiting for players before the game starts
    Lobby,
    /// Pre-question countdown is running
    Countdown,
    /// A question is open for answers
    Question,
    /// Results of the closed question are on display
    Results,
    /// The staged top-3 reveal has run
    Podium,
    /// The full final ranking is on display; terminal until reset
    Leaderboard,
}

/// Tunables for a session's flow
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Number of countdown ticks before each question
    pub countdown_seconds: u64,
    /// Pause between the final timer tick and the results broadcast
    pub results_grace: Duration,
    /// Pause between staged podium reveals
    pub reveal_delay: Duration,
    /// Whether admin actions (start/next/end) are serialized per room
    ///
    /// On by default; turning it off reproduces the behavior of
    /// deployments without the per-room action lock.
    pub serialize_admin_actions: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            countdown_seconds: constants::session::COUNTDOWN_SECONDS,
            results_grace: Duration::from_millis(constants::session::RESULTS_GRACE_MS),
            reveal_delay: Duration::from_millis(constants::session::PODIUM_REVEAL_MS),
            serialize_admin_actions: true,
        }
    }
}

/// Errors that can occur when inserting a player into the roster
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterError {
    /// The requested name is already in use in this room
    #[error("name already in-use")]
    NameTaken,
    /// The room has reached the maximum number of participants
    #[error("maximum number of players reached")]
    RoomFull,
}

/// Mutable session state guarded by the per-room lock
struct SessionState {
    phase: GamePhase,
    questions: Vec<Question>,
    /// Index of the current question; `None` before the first question
    current: Option<usize>,
    question_started: Option<Instant>,
    players: HashMap<PlayerId, Player>,
    /// Player ids in join order, for deterministic iteration
    joined: Vec<PlayerId>,
    by_connection: HashMap<ConnectionId, PlayerId>,
}

impl SessionState {
    fn new(questions: Vec<Question>) -> Self {
        Self {
            phase: GamePhase::Lobby,
            questions,
            current: None,
            question_started: None,
            players: HashMap::new(),
            joined: Vec::new(),
            by_connection: HashMap::new(),
        }
    }

    fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current?)
    }

    fn has_more_questions(&self) -> bool {
        self.current.map_or(!self.questions.is_empty(), |index| {
            index + 1 < self.questions.len()
        })
    }

    /// Players in join order
    fn roster(&self) -> Vec<Player> {
        self.joined
            .iter()
            .filter_map(|id| self.players.get(id).cloned())
            .collect()
    }

    fn active_count(&self) -> usize {
        self.players.values().filter(|p| p.is_active()).count()
    }

    fn answered_count(&self) -> usize {
        self.players
            .values()
            .filter(|p| p.is_active() && p.current_answer.is_some())
            .count()
    }

    fn all_active_answered(&self) -> bool {
        let active = self.active_count();
        active > 0 && self.answered_count() == active
    }

    fn waiting_count(&self) -> usize {
        self.players.values().filter(|p| p.waiting).count()
    }

    /// Ranking of scored players, stable by join order within equal scores
    fn ranking(&self) -> Vec<RankEntry> {
        let mut scored: Vec<&Player> = self
            .joined
            .iter()
            .filter_map(|id| self.players.get(id))
            .filter(|p| p.is_active())
            .collect();
        scored.sort_by(|a, b| b.score.cmp(&a.score));
        scored
            .into_iter()
            .enumerate()
            .map(|(i, p)| RankEntry {
                position: i + 1,
                player: p.id,
                name: p.name.clone(),
                score: p.score,
            })
            .collect()
    }

    fn insert_player(&mut self, player: Player) {
        if let Some(connection) = player.connection {
            self.by_connection.insert(connection, player.id);
        }
        self.joined.push(player.id);
        self.players.insert(player.id, player);
    }

    fn take_player(&mut self, id: PlayerId) -> Option<Player> {
        let player = self.players.remove(&id)?;
        self.joined.retain(|other| *other != id);
        if let Some(connection) = player.connection {
            self.by_connection.remove(&connection);
        }
        Some(player)
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            players: self.roster(),
            current_question: self.current,
            total_questions: self.questions.len(),
            question: self.current_question().map(Question::public_view),
            answered: self.answered_count(),
        }
    }
}

/// State shared between the session handle and its spawned tasks
struct SessionShared<B: Broadcaster> {
    room: RoomCode,
    config: SessionConfig,
    /// The per-room critical section for answers and transitions
    state: Mutex<SessionState>,
    /// Serializes admin actions when the config asks for it
    actions: Mutex<()>,
    /// The running question timer, if any
    timer: TaskHandle,
    clock: LogicalClock,
    broadcaster: Arc<B>,
    sink: Arc<dyn MatchSink>,
}

/// The state machine for one room's quiz
///
/// Cheap to clone; clones share the same underlying session. Timers and
/// reveals run as cooperative tasks, and every broadcast goes through
/// the injected [`Broadcaster`].
pub struct GameSession<B: Broadcaster> {
    shared: Arc<SessionShared<B>>,
}

impl<B: Broadcaster> Clone for GameSession<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<B: Broadcaster> GameSession<B> {
    /// Creates a session for a room with its fixed question list
    pub fn new(
        room: RoomCode,
        questions: Vec<Question>,
        config: SessionConfig,
        broadcaster: Arc<B>,
        sink: Arc<dyn MatchSink>,
    ) -> Self {
        Self {
            shared: Arc::new(SessionShared {
                room,
                config,
                state: Mutex::new(SessionState::new(questions)),
                actions: Mutex::new(()),
                timer: TaskHandle::new(),
                clock: LogicalClock::new(),
                broadcaster,
                sink,
            }),
        }
    }

    fn broadcast(&self, event: &ServerEvent) {
        self.shared.broadcaster.broadcast(&self.shared.room, event);
    }

    /// Acquires the admin action gate when the policy calls for it
    async fn action_gate(&self) -> Option<MutexGuard<'_, ()>> {
        if self.shared.config.serialize_admin_actions {
            Some(self.shared.actions.lock().await)
        } else {
            None
        }
    }

    /// The session's current phase
    pub async fn phase(&self) -> GamePhase {
        self.shared.state.lock().await.phase
    }

    /// A full snapshot of the session's state
    pub async fn snapshot(&self) -> SessionSnapshot {
        self.shared.state.lock().await.snapshot()
    }

    /// The role of the participant bound to a connection, if any
    pub async fn role_of(&self, connection: ConnectionId) -> Option<Role> {
        let state = self.shared.state.lock().await;
        let id = state.by_connection.get(&connection)?;
        state.players.get(id).map(|p| p.role)
    }

    /// Number of participants in the roster, active and waiting
    pub async fn roster_len(&self) -> usize {
        self.shared.state.lock().await.players.len()
    }

    // --- admission and departure ---

    /// Inserts a participant into the roster
    ///
    /// Non-admins joining outside the lobby are placed in the waiting
    /// roster and will be scored from zero once the next game starts.
    /// The name must be unique within the room, case-insensitively.
    ///
    /// # Errors
    ///
    /// * [`RosterError::NameTaken`] - the name is in use, including by a
    ///   player inside the reconnection grace window
    /// * [`RosterError::RoomFull`] - the room is at capacity
    pub async fn admit(
        &self,
        name: String,
        connection: ConnectionId,
        role: Role,
    ) -> Result<Player, RosterError> {
        let (player, event) = {
            let mut state = self.shared.state.lock().await;
            if state.players.len() >= constants::room::MAX_PLAYER_COUNT {
                return Err(RosterError::RoomFull);
            }
            let lowered = name.to_lowercase();
            if state
                .players
                .values()
                .any(|p| p.name.to_lowercase() == lowered)
            {
                return Err(RosterError::NameTaken);
            }

            let waiting = role == Role::Player && state.phase != GamePhase::Lobby;
            let player = Player::new(name, connection, role, waiting);
            state.insert_player(player.clone());

            let event = if waiting {
                ServerEvent::PlayerWaiting {
                    player: player.clone(),
                    waiting_count: state.waiting_count(),
                }
            } else {
                ServerEvent::PlayerJoined {
                    player: player.clone(),
                    players: state.roster(),
                }
            };
            (player, event)
        };

        info!(
            room = %self.shared.room,
            player = %player.id,
            name = %player.name,
            waiting = player.waiting,
            "player joined"
        );
        self.broadcast(&event);
        Ok(player)
    }

    /// Removes the participant bound to a connection (explicit leave)
    ///
    /// Returns the removed player and the number of participants left.
    pub async fn remove_connection(&self, connection: ConnectionId) -> Option<(Player, usize)> {
        let id = {
            let state = self.shared.state.lock().await;
            state.by_connection.get(&connection).copied()?
        };
        self.remove_player(id).await
    }

    /// Removes a participant by stable id (explicit leave or grace expiry)
    ///
    /// If the last active player leaves while a game is running, the
    /// session is forced back to the lobby as an implicit `end_game`.
    pub async fn remove_player(&self, id: PlayerId) -> Option<(Player, usize)> {
        let (player, remaining, implicit_end, event) = {
            let mut state = self.shared.state.lock().await;
            let player = state.take_player(id)?;
            let remaining = state.players.len();
            let implicit_end =
                state.phase != GamePhase::Lobby && state.active_count() == 0 && remaining > 0;
            let event = ServerEvent::PlayerLeft {
                player: player.id,
                name: player.name.clone(),
                temporary: false,
                players: state.roster(),
            };
            (player, remaining, implicit_end, event)
        };

        info!(
            room = %self.shared.room,
            player = %player.id,
            name = %player.name,
            "player left"
        );
        self.broadcast(&event);

        if implicit_end {
            warn!(room = %self.shared.room, "all active players left, returning to lobby");
            self.reset_to_lobby().await;
        }
        Some((player, remaining))
    }

    /// Unbinds a dropped connection while keeping the player in the roster
    ///
    /// The player's answers and score stay intact; only the connection
    /// mapping is cleared. Returns a snapshot for the grace record.
    pub async fn suspend_connection(&self, connection: ConnectionId) -> Option<Player> {
        let (snapshot, event) = {
            let mut state = self.shared.state.lock().await;
            let id = state.by_connection.remove(&connection)?;
            let player = state.players.get_mut(&id)?;
            player.connection = None;
            let snapshot = player.clone();
            let event = ServerEvent::PlayerLeft {
                player: id,
                name: snapshot.name.clone(),
                temporary: true,
                players: state.roster(),
            };
            (snapshot, event)
        };

        info!(
            room = %self.shared.room,
            player = %snapshot.id,
            "player disconnected, grace period started"
        );
        self.broadcast(&event);
        Some(snapshot)
    }

    /// Rebinds a player to a new connection after reconnection
    ///
    /// Score, role and waiting flag are whatever they were: the player
    /// never left the roster while inside the grace window.
    pub async fn restore_player(
        &self,
        id: PlayerId,
        connection: ConnectionId,
    ) -> Option<Player> {
        let (player, event) = {
            let mut guard = self.shared.state.lock().await;
            let state = &mut *guard;
            let entry = state.players.get_mut(&id)?;
            let old = entry.connection.replace(connection);
            let player = entry.clone();
            if let Some(old) = old {
                state.by_connection.remove(&old);
            }
            state.by_connection.insert(connection, id);
            let event = ServerEvent::PlayerReconnected {
                player: player.clone(),
                players: state.roster(),
            };
            (player, event)
        };

        info!(room = %self.shared.room, player = %id, "player reconnected");
        self.broadcast(&event);
        Some(player)
    }

    // --- answer arbitration ---

    /// Processes an answer submission
    ///
    /// Exactly one submission is processed at a time per room. An answer
    /// is accepted only while the question is open, from an active
    /// player who has not answered yet; everything else is a silent
    /// no-op so that client retries are safe. The server stamps the
    /// authoritative response time; the client sequence number only
    /// feeds the logical clock.
    pub async fn submit_answer(&self, connection: ConnectionId, option: usize, seq: u64) {
        let order = self.shared.clock.observe(seq);

        let (progress, all_answered) = {
            let mut state = self.shared.state.lock().await;
            if state.phase != GamePhase::Question {
                return;
            }
            let Some(option_count) = state.current_question().map(|q| q.options.len()) else {
                return;
            };
            let Some(started) = state.question_started else {
                return;
            };
            let Some(id) = state.by_connection.get(&connection).copied() else {
                return;
            };
            if option >= option_count {
                drop(state);
                self.shared
                    .broadcaster
                    .send(connection, &ErrorReason::InvalidAnswer.into());
                return;
            }
            let elapsed = started.elapsed();
            let Some(player) = state.players.get_mut(&id) else {
                return;
            };
            if !player.is_active() || player.current_answer.is_some() {
                return;
            }
            player.record_answer(option, elapsed, order);
            debug!(
                room = %self.shared.room,
                player = %id,
                option,
                elapsed_ms = elapsed.as_millis() as u64,
                order,
                "answer accepted"
            );

            let progress = ServerEvent::PlayerAnswered {
                player: id,
                answered: state.answered_count(),
                total: state.active_count(),
                order,
            };
            (progress, state.all_active_answered())
        };

        self.broadcast(&progress);

        if all_answered {
            self.shared.timer.cancel();
            self.finish_question(None).await;
        }
    }

    // --- admin actions ---

    /// Starts the game from the lobby
    ///
    /// Requires at least one active player and a non-empty question
    /// list; otherwise nothing happens and `false` is returned.
    pub async fn start(&self) -> bool {
        let _gate = self.action_gate().await;
        {
            let mut state = self.shared.state.lock().await;
            if state.phase != GamePhase::Lobby {
                warn!(room = %self.shared.room, "start ignored, game already running");
                return false;
            }
            if state.active_count() == 0 {
                warn!(room = %self.shared.room, "start ignored, no active players");
                return false;
            }
            if state.questions.is_empty() {
                warn!(room = %self.shared.room, "start ignored, no questions");
                return false;
            }
            state.current = None;
        }
        info!(room = %self.shared.room, "game started");
        self.advance(GamePhase::Lobby).await;
        true
    }

    /// Advances from results to the next question (or the podium)
    pub async fn next(&self) -> bool {
        let _gate = self.action_gate().await;
        if self.shared.state.lock().await.phase != GamePhase::Results {
            return false;
        }
        self.advance(GamePhase::Results).await;
        true
    }

    /// Reveals the podium from the results of the final question
    pub async fn show_podium(&self) -> bool {
        let _gate = self.action_gate().await;
        {
            let state = self.shared.state.lock().await;
            if state.phase != GamePhase::Results || state.has_more_questions() {
                return false;
            }
        }
        self.run_podium().await;
        true
    }

    /// Reveals the full final ranking after the podium
    pub async fn show_leaderboard(&self) -> bool {
        let _gate = self.action_gate().await;
        let ranking = {
            let mut state = self.shared.state.lock().await;
            if state.phase != GamePhase::Podium {
                return false;
            }
            state.phase = GamePhase::Leaderboard;
            state.ranking()
        };
        info!(room = %self.shared.room, "leaderboard shown");
        self.broadcast(&ServerEvent::Leaderboard { ranking });
        true
    }

    /// Ends the game and returns everyone to the lobby
    ///
    /// Cancels any running timer, promotes the waiting roster into the
    /// active roster, and resets every player's score and per-question
    /// fields. Valid in any phase; the reset is always broadcast.
    pub async fn end_game(&self) {
        let _gate = self.action_gate().await;
        self.reset_to_lobby().await;
    }

    // --- internals ---

    /// The reset shared by `end_game` and the implicit empty-room end
    async fn reset_to_lobby(&self) {
        self.shared.timer.cancel();
        let players = {
            let mut state = self.shared.state.lock().await;
            let promoted = state.players.values_mut().filter(|p| p.waiting).fold(
                0usize,
                |count, player| {
                    player.waiting = false;
                    count + 1
                },
            );
            if promoted > 0 {
                info!(room = %self.shared.room, promoted, "waiting players moved into the game");
            }
            for player in state.players.values_mut() {
                player.reset_for_game();
            }
            state.phase = GamePhase::Lobby;
            state.current = None;
            state.question_started = None;
            state.roster()
        };
        info!(room = %self.shared.room, "game ended");
        self.broadcast(&ServerEvent::GameEnded { players });
    }

    /// Runs the countdown and opens the next question
    ///
    /// `expected` guards against a phase change that happened between
    /// the caller's check and this call; exhausted questions route to
    /// the podium instead.
    async fn advance(&self, expected: GamePhase) {
        {
            let mut state = self.shared.state.lock().await;
            if state.phase != expected {
                return;
            }
            if !state.has_more_questions() {
                drop(state);
                self.run_podium().await;
                return;
            }
            for player in state.players.values_mut() {
                player.reset_for_question();
            }
            state.phase = GamePhase::Countdown;
            state.current = Some(state.current.map_or(0, |index| index + 1));
        }

        // The lock is not held across the countdown; answers arriving
        // now fail the phase check instead of queueing.
        for seconds in (1..=self.shared.config.countdown_seconds).rev() {
            self.broadcast(&ServerEvent::Countdown { seconds });
            sleep(Duration::from_secs(1)).await;
        }

        let opened = {
            let mut state = self.shared.state.lock().await;
            if state.phase != GamePhase::Countdown {
                // The game was ended mid-countdown.
                return;
            }
            state.phase = GamePhase::Question;
            state.question_started = Some(Instant::now());
            let Some(index) = state.current else {
                return;
            };
            let Some(question) = state.questions.get(index) else {
                return;
            };
            let order = self.shared.clock.tick();
            Some((
                ServerEvent::Question {
                    index,
                    total: state.questions.len(),
                    question: question.public_view(),
                    order,
                },
                question.time_limit,
                index,
            ))
        };

        if let Some((event, time_limit, index)) = opened {
            info!(room = %self.shared.room, index, "question opened");
            self.broadcast(&event);
            self.start_question_timer(time_limit, index);
        }
    }

    /// Spawns the cancellable per-question timer
    ///
    /// Ticks the remaining seconds down once per second, then triggers
    /// results after a short grace so the final tick can land.
    fn start_question_timer(&self, time_limit: Duration, index: usize) {
        let session = self.clone();
        self.shared.timer.replace(tokio::spawn(async move {
            let mut remaining = time_limit.as_secs();
            while remaining > 0 {
                session.broadcast(&ServerEvent::Timer { remaining });
                sleep(Duration::from_secs(1)).await;
                remaining -= 1;
            }
            session.broadcast(&ServerEvent::Timer { remaining: 0 });
            sleep(session.shared.config.results_grace).await;
            session.finish_question(Some(index)).await;
        }));
    }

    /// Closes the open question and broadcasts its results
    ///
    /// Reached from timer expiry (with an index guard against a stale
    /// timer) and from the all-answered early path. Computes points per
    /// active player, updates cumulative scores and history, and builds
    /// the ranked snapshot and answer histogram.
    async fn finish_question(&self, expect_index: Option<usize>) {
        let event = {
            let mut state = self.shared.state.lock().await;
            if state.phase != GamePhase::Question {
                return;
            }
            if expect_index.is_some_and(|index| state.current != Some(index)) {
                return;
            }
            let Some(index) = state.current else {
                return;
            };
            let Some(question) = state.questions.get(index).cloned() else {
                return;
            };
            state.phase = GamePhase::Results;

            let mut outcomes: Vec<PlayerOutcome> = Vec::new();
            let ids: Vec<PlayerId> = state.joined.clone();
            for id in ids {
                let Some(player) = state.players.get_mut(&id) else {
                    continue;
                };
                if !player.is_active() {
                    continue;
                }
                let (correct, points, response_ms) =
                    match (player.current_answer, player.answered_after) {
                        (Some(answer), Some(elapsed)) => {
                            let correct = question.is_correct(answer);
                            (
                                correct,
                                scoring::score(
                                    correct,
                                    elapsed,
                                    question.time_limit,
                                    question.points,
                                ),
                                elapsed.as_millis() as u64,
                            )
                        }
                        _ => (false, 0, 0),
                    };
                player.score += points;
                player.last_points = points;
                player.history.push(AnswerRecord { correct, points });
                outcomes.push(PlayerOutcome {
                    player: player.id,
                    name: player.name.clone(),
                    answer: player.current_answer,
                    correct,
                    points,
                    response_ms,
                    order: player.answer_order,
                    score: player.score,
                });
            }
            outcomes.sort_by(|a, b| b.score.cmp(&a.score));

            let mut distribution = vec![0usize; question.options.len()];
            for outcome in &outcomes {
                if let Some(answer) = outcome.answer {
                    distribution[answer] += 1;
                }
            }

            ServerEvent::Results {
                correct: question.correct,
                outcomes,
                ranking: state.ranking(),
                distribution,
                has_more: state.has_more_questions(),
            }
        };

        info!(room = %self.shared.room, "results broadcast");
        self.broadcast(&event);
    }

    /// Runs the staged podium reveal and persists the match
    async fn run_podium(&self) {
        let ranking = {
            let mut state = self.shared.state.lock().await;
            state.phase = GamePhase::Podium;
            state.ranking()
        };
        info!(room = %self.shared.room, players = ranking.len(), "podium reached");

        let top: Vec<RankEntry> = ranking
            .iter()
            .take(constants::session::PODIUM_SIZE)
            .cloned()
            .collect();

        // Reveal 3rd, then 2nd, then 1st.
        for entry in top.iter().rev() {
            sleep(self.shared.config.reveal_delay).await;
            if self.shared.state.lock().await.phase != GamePhase::Podium {
                return;
            }
            self.broadcast(&ServerEvent::PodiumReveal {
                position: entry.position,
                entry: entry.clone(),
            });
        }
        self.broadcast(&ServerEvent::Podium { top });

        self.shared.sink.save_match(&self.shared.room, &ranking);
    }
}
