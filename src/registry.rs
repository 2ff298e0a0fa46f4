//! Room lifecycle and admission control
//!
//! The registry creates and destroys rooms, maps connections to rooms
//! for routing, and enforces room-level access control: password checks,
//! name validation, and the spectator policy for mid-game joiners. It
//! never manages player lifetimes itself; those belong to each room's
//! session.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use garde::Validate;

use crate::{
    names::{self, NamePolicy},
    player::{Player, PlayerId, Role},
    question::{BankError, Question},
    room_code::RoomCode,
    session::{GamePhase, GameSession, RosterError, SessionConfig},
    transport::{Broadcaster, ConnectionId, MatchSink},
};

/// Whether a room appears in the public listing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Listed publicly and joinable by code
    #[default]
    Public,
    /// Joinable by code only
    Private,
}

/// A sha256 hash of a room password
///
/// Verification recomputes the digest and compares it without
/// short-circuiting, so the comparison time does not depend on where
/// the digests diverge.
#[derive(Clone)]
pub struct PasswordHash([u8; 32]);

impl PasswordHash {
    /// Hashes a plaintext password
    pub fn new(password: &str) -> Self {
        Self(Sha256::digest(password.as_bytes()).into())
    }

    /// Checks an attempt against the stored hash in constant time
    pub fn verify(&self, attempt: &str) -> bool {
        let attempt: [u8; 32] = Sha256::digest(attempt.as_bytes()).into();
        self.0
            .iter()
            .zip(attempt.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl std::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PasswordHash(..)")
    }
}

/// Errors that can occur when admitting a connection into a room
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionError {
    /// No room exists with the given code
    #[error("room not found")]
    RoomNotFound,
    /// The supplied password does not match the room's
    #[error("wrong password")]
    WrongPassword,
    /// The requested name is already in use in the room
    #[error("name already in-use")]
    NameTaken,
    /// The room has reached the maximum number of participants
    #[error("maximum number of players reached")]
    RoomFull,
    /// The requested name failed validation
    #[error(transparent)]
    Name(#[from] names::Error),
}

impl From<RosterError> for AdmissionError {
    fn from(error: RosterError) -> Self {
        match error {
            RosterError::NameTaken => Self::NameTaken,
            RosterError::RoomFull => Self::RoomFull,
        }
    }
}

/// Listing entry for a room
#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    /// The room's code
    pub code: RoomCode,
    /// The room's display name
    pub name: String,
    /// Whether the room is publicly listed
    pub visibility: Visibility,
    /// Number of participants, active and waiting
    pub players: usize,
    /// Current phase of the room's session
    pub phase: GamePhase,
}

/// An isolated quiz instance
///
/// A room exclusively owns its session; the registry only hands out
/// shared references for routing.
pub struct Room<B: Broadcaster> {
    /// The room's unique code
    pub code: RoomCode,
    /// The room's display name
    pub name: String,
    /// Connection that created the room
    pub owner: ConnectionId,
    /// Whether the room is publicly listed
    pub visibility: Visibility,
    password: Option<PasswordHash>,
    session: GameSession<B>,
}

impl<B: Broadcaster> Room<B> {
    /// The room's game session
    pub fn session(&self) -> &GameSession<B> {
        &self.session
    }

    /// Builds the listing entry for this room
    pub async fn summary(&self) -> RoomSummary {
        RoomSummary {
            code: self.code.clone(),
            name: self.name.clone(),
            visibility: self.visibility,
            players: self.session.roster_len().await,
            phase: self.session.phase().await,
        }
    }
}

/// Creates and routes to rooms
///
/// Registry maps are guarded by plain mutexes with no suspension inside
/// the guard; all suspending work happens on the sessions themselves.
pub struct RoomRegistry<B: Broadcaster> {
    rooms: Mutex<HashMap<RoomCode, Arc<Room<B>>>>,
    /// Routing only; never used for lifetime management
    connections: Mutex<HashMap<ConnectionId, RoomCode>>,
    policy: NamePolicy,
    session_config: SessionConfig,
    broadcaster: Arc<B>,
    sink: Arc<dyn MatchSink>,
}

impl<B: Broadcaster> RoomRegistry<B> {
    /// Creates an empty registry
    pub fn new(
        policy: NamePolicy,
        session_config: SessionConfig,
        broadcaster: Arc<B>,
        sink: Arc<dyn MatchSink>,
    ) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
            policy,
            session_config,
            broadcaster,
            sink,
        }
    }

    /// Creates a room with a fresh collision-checked code
    ///
    /// The question list is loaded exactly once, through the provided
    /// loader, after the room's code has been fixed; every question is
    /// validated before the room goes live.
    ///
    /// # Errors
    ///
    /// Returns a [`BankError`] if the loader fails or a question is
    /// invalid; no room is created in that case.
    pub fn create_room<F>(
        &self,
        name: String,
        owner: ConnectionId,
        visibility: Visibility,
        password: Option<&str>,
        load_questions: F,
    ) -> Result<Arc<Room<B>>, BankError>
    where
        F: FnOnce(&RoomCode) -> Result<Vec<Question>, BankError>,
    {
        let mut rooms = self.rooms.lock().expect("registry lock poisoned");
        let code = loop {
            let candidate = RoomCode::generate();
            if !rooms.contains_key(&candidate) {
                break candidate;
            }
        };

        let questions = load_questions(&code)?;
        for question in &questions {
            question.validate()?;
        }

        let room = Arc::new(Room {
            code: code.clone(),
            name,
            owner,
            visibility,
            password: password.map(PasswordHash::new),
            session: GameSession::new(
                code.clone(),
                questions,
                self.session_config.clone(),
                Arc::clone(&self.broadcaster),
                Arc::clone(&self.sink),
            ),
        });
        rooms.insert(code.clone(), Arc::clone(&room));
        info!(room = %code, name = %room.name, "room created");
        Ok(room)
    }

    /// Looks up a room by code
    pub fn find(&self, code: &RoomCode) -> Option<Arc<Room<B>>> {
        self.rooms
            .lock()
            .expect("registry lock poisoned")
            .get(code)
            .cloned()
    }

    /// Resolves the room a connection is in
    pub fn room_of(&self, connection: ConnectionId) -> Option<Arc<Room<B>>> {
        let code = self
            .connections
            .lock()
            .expect("registry lock poisoned")
            .get(&connection)
            .cloned()?;
        self.find(&code)
    }

    /// Summaries of all public rooms
    pub async fn list_public(&self) -> Vec<RoomSummary> {
        let rooms: Vec<Arc<Room<B>>> = self
            .rooms
            .lock()
            .expect("registry lock poisoned")
            .values()
            .filter(|room| room.visibility == Visibility::Public)
            .cloned()
            .collect();

        let mut summaries = Vec::with_capacity(rooms.len());
        for room in rooms {
            summaries.push(room.summary().await);
        }
        summaries
    }

    /// Admits a connection into a room
    ///
    /// Validates the password and the requested name, then inserts the
    /// player through the room's session. Joining a running game as a
    /// non-admin lands in the waiting roster.
    ///
    /// # Errors
    ///
    /// Returns an [`AdmissionError`] describing the first failed check.
    pub async fn admit(
        &self,
        code: &RoomCode,
        name: &str,
        connection: ConnectionId,
        password: Option<&str>,
        as_admin: bool,
    ) -> Result<(Arc<Room<B>>, Player), AdmissionError> {
        let room = self.find(code).ok_or(AdmissionError::RoomNotFound)?;

        if let Some(hash) = &room.password {
            if !password.is_some_and(|attempt| hash.verify(attempt)) {
                return Err(AdmissionError::WrongPassword);
            }
        }

        let name = self.policy.validate(name)?;
        let role = if as_admin { Role::Admin } else { Role::Player };
        let player = room.session.admit(name, connection, role).await?;

        self.connections
            .lock()
            .expect("registry lock poisoned")
            .insert(connection, room.code.clone());
        Ok((room, player))
    }

    /// Rebinds a connection route after reconnection
    pub fn bind(&self, connection: ConnectionId, code: RoomCode) {
        self.connections
            .lock()
            .expect("registry lock poisoned")
            .insert(connection, code);
    }

    /// Drops a connection route without touching the roster
    ///
    /// Used on connection loss, where the player stays in the roster for
    /// the reconnection grace window. Returns the room for follow-up.
    pub fn unbind(&self, connection: ConnectionId) -> Option<Arc<Room<B>>> {
        let code = self
            .connections
            .lock()
            .expect("registry lock poisoned")
            .remove(&connection)?;
        self.find(&code)
    }

    /// Detaches a connection's player from its room (explicit leave)
    ///
    /// Deletes the room once its roster is empty.
    pub async fn remove_connection(
        &self,
        connection: ConnectionId,
    ) -> Option<(Arc<Room<B>>, Player)> {
        let room = self.unbind(connection)?;
        let (player, remaining) = room.session.remove_connection(connection).await?;
        if remaining == 0 {
            self.reap(&room.code);
        }
        Some((room, player))
    }

    /// Removes a player by stable id (grace-period expiry)
    ///
    /// Deletes the room once its roster is empty.
    pub async fn remove_player(
        &self,
        code: &RoomCode,
        id: PlayerId,
    ) -> Option<(Arc<Room<B>>, Player)> {
        let room = self.find(code)?;
        let (player, remaining) = room.session.remove_player(id).await?;
        if remaining == 0 {
            self.reap(code);
        }
        Some((room, player))
    }

    /// Force-closes a room, dropping every route into it
    ///
    /// Returns the removed room so the caller can notify its members.
    pub fn close_room(&self, code: &RoomCode) -> Option<Arc<Room<B>>> {
        let room = self
            .rooms
            .lock()
            .expect("registry lock poisoned")
            .remove(code)?;
        self.connections
            .lock()
            .expect("registry lock poisoned")
            .retain(|_, routed| routed != code);
        info!(room = %code, "room closed");
        Some(room)
    }

    /// Number of live rooms
    pub fn room_count(&self) -> usize {
        self.rooms.lock().expect("registry lock poisoned").len()
    }

    fn reap(&self, code: &RoomCode) {
        if self
            .rooms
            .lock()
            .expect("registry lock poisoned")
            .remove(code)
            .is_some()
        {
            info!(room = %code, "room removed (empty)");
        }
    }
}
