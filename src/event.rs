//! Wire-facing message types
//!
//! Everything the engine receives from or emits to clients, shaped
//! independently of the transport. Outbound [`ServerEvent`]s are fanned
//! out through the [`crate::transport::Broadcaster`] capability;
//! inbound [`ClientMessage`]s are routed by the coordinator.

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use thiserror::Error;

use crate::{
    names,
    player::{Player, PlayerId},
    question::PublicQuestion,
    registry::{AdmissionError, RoomSummary, Visibility},
    room_code::RoomCode,
    session::GamePhase,
};

/// Messages received from clients
///
/// Room routing happens through the sender's connection: a connection
/// is in at most one room, so game and admin messages carry no room
/// code. Admin-only messages from non-admin senders are rejected.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMessage {
    /// Create a new room and become its admin
    CreateRoom {
        /// Display name for the room
        name: String,
        /// Whether the room appears in the public listing
        #[serde(default)]
        visibility: Visibility,
        /// Optional password required to join
        #[serde(default)]
        password: Option<String>,
    },
    /// Request the list of public rooms
    ListRooms,
    /// Join a room
    Join {
        /// Code of the room to join
        code: RoomCode,
        /// Requested display name
        name: String,
        /// Password, for protected rooms
        #[serde(default)]
        password: Option<String>,
        /// Join as the room's presenter instead of a player
        #[serde(default)]
        as_admin: bool,
    },
    /// Leave the current room
    Leave,
    /// Submit an answer for the open question
    Answer {
        /// Chosen option index
        option: usize,
        /// Client-side Lamport sequence number
        #[serde(default)]
        seq: u64,
    },
    /// (admin) Start the game from the lobby
    Start,
    /// (admin) Advance from results to the next question
    Next,
    /// (admin) Reveal the podium after the last question
    ShowPodium,
    /// (admin) Reveal the full ranking after the podium
    ShowLeaderboard,
    /// (admin) End the game and return everyone to the lobby
    EndGame,
    /// Liveness reply to a ping
    Pong,
    /// Resume a dropped session within the grace window
    Reconnect {
        /// The stable id issued on the original join
        player: PlayerId,
    },
    /// Request a fresh state snapshot of the current room
    GetState,
}

/// Machine-readable reasons attached to error events
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    /// No room exists with the given code
    #[error("room not found")]
    RoomNotFound,
    /// The supplied password does not match
    #[error("wrong password")]
    WrongPassword,
    /// The requested name is already in use in the room
    #[error("name already in use")]
    NameTaken,
    /// The requested name contains an offensive or reserved word
    #[error("name rejected")]
    NameRejected,
    /// The requested name is empty or too long
    #[error("name invalid")]
    NameInvalid,
    /// The room has reached its player limit
    #[error("room is full")]
    RoomFull,
    /// The answer option index is outside the question's options
    #[error("invalid answer")]
    InvalidAnswer,
    /// The sender is not the room's admin
    #[error("not an admin")]
    NotAdmin,
    /// The sender is not in any room
    #[error("not in a room")]
    NotInRoom,
    /// The grace window has elapsed or the id was never held
    #[error("reconnect expired")]
    ReconnectExpired,
    /// The room name is missing or too long
    #[error("invalid room name")]
    InvalidRoomName,
    /// The question bank produced no usable questions for the room
    #[error("no questions available")]
    NoQuestions,
}

impl From<AdmissionError> for ErrorReason {
    fn from(error: AdmissionError) -> Self {
        match error {
            AdmissionError::RoomNotFound => Self::RoomNotFound,
            AdmissionError::WrongPassword => Self::WrongPassword,
            AdmissionError::NameTaken => Self::NameTaken,
            AdmissionError::RoomFull => Self::RoomFull,
            AdmissionError::Name(names::Error::InvalidLength) => Self::NameInvalid,
            AdmissionError::Name(names::Error::Rejected) => Self::NameRejected,
        }
    }
}

/// One row of a ranking
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankEntry {
    /// Position in the ranking, 1-indexed
    pub position: usize,
    /// The ranked player's stable id
    pub player: PlayerId,
    /// The ranked player's name
    pub name: String,
    /// The ranked player's cumulative score
    pub score: u64,
}

/// Per-player outcome of one question
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct PlayerOutcome {
    /// The player's stable id
    pub player: PlayerId,
    /// The player's name
    pub name: String,
    /// The option the player chose, if any
    pub answer: Option<usize>,
    /// Whether the answer was correct
    pub correct: bool,
    /// Points earned on this question
    pub points: u64,
    /// Server-measured response time in milliseconds
    pub response_ms: u64,
    /// Lamport stamp of the accepted answer, if any
    pub order: Option<u64>,
    /// The player's cumulative score after this question
    pub score: u64,
}

/// A complete view of a session's state
///
/// Sent to connections that join, reconnect, or explicitly request the
/// current state, so their view can be synchronized without replaying
/// the event stream.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// Current phase of the game
    pub phase: GamePhase,
    /// The full roster, active and waiting
    pub players: Vec<Player>,
    /// Index of the current question, absent before the game starts
    pub current_question: Option<usize>,
    /// Total number of questions in the game
    pub total_questions: usize,
    /// The open question, answer withheld
    pub question: Option<PublicQuestion>,
    /// How many active players have answered the open question
    pub answered: usize,
}

/// Events emitted by the engine
///
/// Broadcast to a whole room or sent to a single connection through the
/// [`crate::transport::Broadcaster`].
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, derive_more::From)]
#[serde(rename_all = "snake_case")]
pub enum ServerEvent {
    /// A room was created; sent to its creator
    RoomCreated {
        /// Summary of the new room
        room: RoomSummary,
    },
    /// The public room listing
    RoomList {
        /// One summary per public room
        rooms: Vec<RoomSummary>,
    },
    /// Admission succeeded; sent to the joining connection
    Welcome {
        /// The admitted player
        player: Player,
        /// Summary of the joined room
        room: RoomSummary,
        /// Snapshot of the session state
        state: SessionSnapshot,
    },
    /// A player entered the active roster
    PlayerJoined {
        /// The new player
        player: Player,
        /// The full roster after the join
        players: Vec<Player>,
    },
    /// A late joiner was placed in the waiting roster
    PlayerWaiting {
        /// The waiting player
        player: Player,
        /// Number of players currently waiting
        waiting_count: usize,
    },
    /// A player left the room
    PlayerLeft {
        /// The departed player's stable id
        player: PlayerId,
        /// The departed player's name
        name: String,
        /// Whether the departure may still be undone by reconnection
        temporary: bool,
        /// The full roster after the departure
        players: Vec<Player>,
    },
    /// A disconnected player resumed within the grace window
    PlayerReconnected {
        /// The restored player
        player: Player,
        /// The full roster after the reconnection
        players: Vec<Player>,
    },
    /// Pre-question countdown tick
    Countdown {
        /// Seconds until the question appears
        seconds: u64,
    },
    /// A question opened for answers
    Question {
        /// Index of this question, 0-based
        index: usize,
        /// Total number of questions
        total: usize,
        /// The question, answer withheld
        question: PublicQuestion,
        /// Lamport stamp of the question broadcast
        order: u64,
    },
    /// Question timer tick
    Timer {
        /// Seconds remaining
        remaining: u64,
    },
    /// An answer was accepted (the choice itself is never revealed)
    PlayerAnswered {
        /// Who answered
        player: PlayerId,
        /// How many active players have answered so far
        answered: usize,
        /// How many active players there are
        total: usize,
        /// Lamport stamp of the accepted answer
        order: u64,
    },
    /// Results of the closed question
    Results {
        /// Index of the correct option
        correct: usize,
        /// Per-player outcomes, ranked by cumulative score
        outcomes: Vec<PlayerOutcome>,
        /// Ranking after this question
        ranking: Vec<RankEntry>,
        /// How many players picked each option
        distribution: Vec<usize>,
        /// Whether more questions remain
        has_more: bool,
    },
    /// One step of the staged podium reveal
    PodiumReveal {
        /// The revealed position, 1-indexed
        position: usize,
        /// The player at that position
        entry: RankEntry,
    },
    /// The complete podium
    Podium {
        /// The top players in order
        top: Vec<RankEntry>,
    },
    /// The full final ranking
    Leaderboard {
        /// Every scored player in order
        ranking: Vec<RankEntry>,
    },
    /// The game was ended and everyone returned to the lobby
    GameEnded {
        /// The roster after waiting players were promoted and scores reset
        players: Vec<Player>,
    },
    /// The room was closed by its admin
    RoomClosed,
    /// Liveness probe; clients reply with a pong
    Ping,
    /// A state snapshot, sent on request or after reconnection
    #[from]
    State {
        /// The snapshot
        state: SessionSnapshot,
    },
    /// A request was rejected
    #[from]
    Error {
        /// Machine-readable reason
        reason: ErrorReason,
    },
}

impl ServerEvent {
    /// Converts the event to a JSON string for transmission
    ///
    /// # Panics
    ///
    /// Panics if serialization fails, which cannot happen for
    /// well-formed data with the default JSON serializer.
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).expect("default serializer cannot fail")
    }
}
