//! Transport-facing interfaces
//!
//! The engine never talks to sockets directly. Outbound traffic goes
//! through the injected [`Broadcaster`] capability implemented by the
//! transport adapter, and finished matches are handed to a
//! [`MatchSink`]. Connections are identified by an opaque id minted by
//! the transport layer.

use std::{fmt::Display, str::FromStr, sync::Mutex};

use serde_with::{DeserializeFromStr, SerializeDisplay};
use uuid::Uuid;

use crate::{
    event::{RankEntry, ServerEvent},
    room_code::RoomCode,
};

/// A volatile identifier for one client connection
///
/// Connection ids change every time a client reconnects; the stable
/// [`crate::player::PlayerId`] is what survives. The engine treats
/// connection ids as opaque routing keys.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, DeserializeFromStr, SerializeDisplay,
)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Creates a new random connection ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ConnectionId {
    type Err = uuid::Error;

    /// Parses a connection ID from a UUID string
    ///
    /// # Errors
    ///
    /// Returns a `uuid::Error` if the string is not a valid UUID.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// Capability for delivering events to clients
///
/// Implemented by the transport adapter (WebSocket server, test
/// harness, ...). The engine only ever fans out through this trait; it
/// never imports transport types. Implementations must not block: they
/// are called from within session critical sections and should queue
/// internally.
pub trait Broadcaster: Send + Sync + 'static {
    /// Delivers an event to every connection subscribed to a room
    fn broadcast(&self, room: &RoomCode, event: &ServerEvent);

    /// Delivers an event to a single connection
    fn send(&self, connection: ConnectionId, event: &ServerEvent);

    /// Forcibly closes a connection
    ///
    /// The transport is expected to report the closure back through the
    /// coordinator's disconnect path like any other connection loss.
    fn close(&self, connection: ConnectionId);
}

/// Persistence sink for finished matches
///
/// Invoked once per game when the podium is shown. Failures are the
/// sink's to handle; the engine does not retry.
pub trait MatchSink: Send + Sync + 'static {
    /// Stores the final ranking of a finished match
    fn save_match(&self, room: &RoomCode, final_ranking: &[RankEntry]);
}

/// A sink that drops finished matches
///
/// Default when no persistence layer is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

impl MatchSink for DiscardSink {
    fn save_match(&self, _room: &RoomCode, _final_ranking: &[RankEntry]) {}
}

/// A broadcaster that records every event, for tests
///
/// Keeps room broadcasts and direct sends in arrival order so tests can
/// assert on the exact event sequence a client would observe.
#[derive(Debug, Default)]
pub struct RecordingBroadcaster {
    log: Mutex<Vec<Recorded>>,
}

/// One delivery captured by [`RecordingBroadcaster`]
#[derive(Debug, Clone)]
pub enum Recorded {
    /// An event broadcast to a whole room
    Broadcast(RoomCode, ServerEvent),
    /// An event sent to one connection
    Direct(ConnectionId, ServerEvent),
    /// A forced connection close
    Closed(ConnectionId),
}

impl RecordingBroadcaster {
    /// Creates an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything delivered so far
    pub fn log(&self) -> Vec<Recorded> {
        self.log.lock().expect("recorder lock poisoned").clone()
    }

    /// Returns the room-broadcast events delivered to a room, in order
    pub fn room_events(&self, room: &RoomCode) -> Vec<ServerEvent> {
        self.log()
            .into_iter()
            .filter_map(|entry| match entry {
                Recorded::Broadcast(code, event) if code == *room => Some(event),
                _ => None,
            })
            .collect()
    }

    /// Returns the events sent directly to a connection, in order
    pub fn direct_events(&self, connection: ConnectionId) -> Vec<ServerEvent> {
        self.log()
            .into_iter()
            .filter_map(|entry| match entry {
                Recorded::Direct(conn, event) if conn == connection => Some(event),
                _ => None,
            })
            .collect()
    }

    /// Forgets everything recorded so far
    pub fn clear(&self) {
        self.log.lock().expect("recorder lock poisoned").clear();
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn broadcast(&self, room: &RoomCode, event: &ServerEvent) {
        self.log
            .lock()
            .expect("recorder lock poisoned")
            .push(Recorded::Broadcast(room.clone(), event.clone()));
    }

    fn send(&self, connection: ConnectionId, event: &ServerEvent) {
        self.log
            .lock()
            .expect("recorder lock poisoned")
            .push(Recorded::Direct(connection, event.clone()));
    }

    fn close(&self, connection: ConnectionId) {
        self.log
            .lock()
            .expect("recorder lock poisoned")
            .push(Recorded::Closed(connection));
    }
}
