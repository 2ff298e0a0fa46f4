//! Player identity and per-question state
//!
//! This module defines the stable player identifier that survives
//! reconnection, the player's role within a room, and the mutable record
//! tracked by a session for every participant: cumulative score, the
//! volatile connection binding, and the fields reset for each question.

use std::{fmt::Display, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use uuid::Uuid;

use crate::transport::ConnectionId;

/// A stable, unique identifier for a player
///
/// Player ids are assigned on join and survive reconnection; the
/// connection identifier bound to a player changes on every reconnect,
/// but the player id never does.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, DeserializeFromStr, SerializeDisplay,
)]
pub struct PlayerId(Uuid);

impl PlayerId {
    /// Creates a new random player ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PlayerId {
    type Err = uuid::Error;

    /// Parses a player ID from a UUID string
    ///
    /// # Errors
    ///
    /// Returns a `uuid::Error` if the string is not a valid UUID.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// The role of a participant within a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A regular player who answers questions and is scored
    Player,
    /// The presenter driving the quiz; never answers or appears in rankings
    Admin,
}

/// Outcome of one question for one player, kept in their history
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnswerRecord {
    /// Whether the player's answer was correct
    pub correct: bool,
    /// Points earned on the question
    pub points: u64,
}

/// A participant in a room's session
///
/// The stable [`PlayerId`] is the only long-lived key; the connection
/// identifier is a mutable field rebound on reconnection and cleared
/// while the player sits in the reconnection grace window.
#[derive(Debug, Clone, Serialize)]
pub struct Player {
    /// Stable identifier, survives reconnection
    pub id: PlayerId,
    /// Display name, unique within the room (case-insensitive)
    pub name: String,
    /// Current connection, absent while disconnected within grace
    #[serde(skip)]
    pub connection: Option<ConnectionId>,
    /// Role within the room
    pub role: Role,
    /// Cumulative score across the current game
    pub score: u64,
    /// Points earned on the most recent question
    pub last_points: u64,
    /// Whether the player joined mid-game and is held until the next game
    pub waiting: bool,
    /// Option index chosen for the current question
    #[serde(skip)]
    pub current_answer: Option<usize>,
    /// Server-stamped elapsed time between question start and the answer
    #[serde(skip)]
    pub answered_after: Option<Duration>,
    /// Lamport stamp assigned when the answer was accepted
    #[serde(skip)]
    pub answer_order: Option<u64>,
    /// Per-question outcomes of the current game
    #[serde(skip)]
    pub history: Vec<AnswerRecord>,
    /// Whether the player has answered the current question
    ///
    /// Serialized for roster snapshots; derived from `current_answer`.
    answered: bool,
}

impl Player {
    /// Creates a new participant bound to a connection
    pub fn new(name: String, connection: ConnectionId, role: Role, waiting: bool) -> Self {
        Self {
            id: PlayerId::new(),
            name,
            connection: Some(connection),
            role,
            score: 0,
            last_points: 0,
            waiting,
            current_answer: None,
            answered_after: None,
            answer_order: None,
            history: Vec::new(),
            answered: false,
        }
    }

    /// Whether the player is eligible for the current question
    ///
    /// Admins and waiting spectators are never part of the active roster
    /// for answering purposes.
    pub fn is_active(&self) -> bool {
        self.role == Role::Player && !self.waiting
    }

    /// Records an accepted answer with its server-side stamps
    pub(crate) fn record_answer(&mut self, option: usize, elapsed: Duration, order: u64) {
        self.current_answer = Some(option);
        self.answered_after = Some(elapsed);
        self.answer_order = Some(order);
        self.answered = true;
    }

    /// Clears the per-question fields before a new question
    pub(crate) fn reset_for_question(&mut self) {
        self.current_answer = None;
        self.answered_after = None;
        self.answer_order = None;
        self.last_points = 0;
        self.answered = false;
    }

    /// Resets score and history for a fresh game
    pub(crate) fn reset_for_game(&mut self) {
        self.score = 0;
        self.history.clear();
        self.reset_for_question();
    }
}
