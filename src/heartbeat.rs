//! Connection liveness and reconnection grace handling
//!
//! The monitor tracks when each connection was last heard from, probes
//! them on a fixed interval, and force-closes the silent ones. When a
//! player drops, their session-relevant state is snapshotted into a
//! [`DisconnectedPlayer`] record that survives for a bounded grace
//! window: reconnection claims the record, expiry deletes it, and
//! whichever happens first wins the race — the loser simply observes
//! that the record is gone.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use itertools::{Either, Itertools};
use tokio::{
    task::AbortHandle,
    time::{Instant, sleep},
};
use tracing::{info, warn};

use crate::{
    constants,
    event::ServerEvent,
    player::{Player, PlayerId, Role},
    room_code::RoomCode,
    timer::TaskHandle,
    transport::{Broadcaster, ConnectionId},
};

/// Tunables for liveness probing and the reconnection window
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between liveness probes
    pub probe_interval: Duration,
    /// Silence after which a connection is treated as failed
    pub probe_timeout: Duration,
    /// How long a disconnected player's state is held for reconnection
    pub grace_period: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(constants::heartbeat::PROBE_INTERVAL_SECS),
            probe_timeout: Duration::from_secs(constants::heartbeat::PROBE_TIMEOUT_SECS),
            grace_period: Duration::from_secs(constants::heartbeat::RECONNECT_GRACE_SECS),
        }
    }
}

/// Snapshot of a player taken at disconnect time
///
/// Lives only inside the grace window; consumed on reconnection or on
/// expiry, whichever comes first.
#[derive(Debug, Clone)]
pub struct DisconnectedPlayer {
    /// The player's stable id
    pub player: PlayerId,
    /// The player's name
    pub name: String,
    /// The room the player was in
    pub room: RoomCode,
    /// Score at disconnect time
    pub score: u64,
    /// Role at disconnect time
    pub role: Role,
    /// Waiting flag at disconnect time
    pub waiting: bool,
    /// When the disconnect happened
    pub since: Instant,
}

impl DisconnectedPlayer {
    /// Captures a grace record from a live player
    pub fn capture(player: &Player, room: RoomCode) -> Self {
        Self {
            player: player.id,
            name: player.name.clone(),
            room,
            score: player.score,
            role: player.role,
            waiting: player.waiting,
            since: Instant::now(),
        }
    }
}

/// A held record together with its scheduled expiry
struct HeldRecord {
    record: DisconnectedPlayer,
    expiry: AbortHandle,
}

struct MonitorInner<B: Broadcaster> {
    config: HeartbeatConfig,
    /// Last time each connection was heard from
    clients: Mutex<HashMap<ConnectionId, Instant>>,
    /// Grace records by stable player id
    held: Mutex<HashMap<PlayerId, HeldRecord>>,
    broadcaster: Arc<B>,
    probe: TaskHandle,
}

/// Tracks connection liveness and holds grace records
///
/// Cheap to clone; clones share the same monitor.
pub struct HeartbeatMonitor<B: Broadcaster> {
    inner: Arc<MonitorInner<B>>,
}

impl<B: Broadcaster> Clone for HeartbeatMonitor<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Broadcaster> HeartbeatMonitor<B> {
    /// Creates a monitor with the given configuration
    pub fn new(config: HeartbeatConfig, broadcaster: Arc<B>) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                config,
                clients: Mutex::new(HashMap::new()),
                held: Mutex::new(HashMap::new()),
                broadcaster,
                probe: TaskHandle::new(),
            }),
        }
    }

    /// Starts tracking a freshly opened connection
    pub fn register(&self, connection: ConnectionId) {
        self.inner
            .clients
            .lock()
            .expect("heartbeat lock poisoned")
            .insert(connection, Instant::now());
    }

    /// Records a liveness reply from a connection
    pub fn beat(&self, connection: ConnectionId) {
        self.inner
            .clients
            .lock()
            .expect("heartbeat lock poisoned")
            .insert(connection, Instant::now());
    }

    /// Stops tracking a connection
    pub fn forget(&self, connection: ConnectionId) {
        self.inner
            .clients
            .lock()
            .expect("heartbeat lock poisoned")
            .remove(&connection);
    }

    /// Number of connections currently tracked
    pub fn tracked(&self) -> usize {
        self.inner
            .clients
            .lock()
            .expect("heartbeat lock poisoned")
            .len()
    }

    /// Spawns the periodic probe loop
    ///
    /// Each tick pings every tracked connection and force-closes the
    /// ones silent past the timeout. The transport reports the closure
    /// back through the regular disconnect path.
    pub fn start_probes(&self) {
        let monitor = self.clone();
        self.inner.probe.replace(tokio::spawn(async move {
            loop {
                sleep(monitor.inner.config.probe_interval).await;
                monitor.probe_once();
            }
        }));
    }

    /// Stops the probe loop
    pub fn stop_probes(&self) {
        self.inner.probe.cancel();
    }

    fn probe_once(&self) {
        let timeout = self.inner.config.probe_timeout;
        let (stale, live): (Vec<ConnectionId>, Vec<ConnectionId>) = {
            let clients = self
                .inner
                .clients
                .lock()
                .expect("heartbeat lock poisoned");
            clients
                .iter()
                .partition_map(|(connection, last_seen)| {
                    if last_seen.elapsed() > timeout {
                        Either::Left(*connection)
                    } else {
                        Either::Right(*connection)
                    }
                })
        };

        for connection in stale {
            warn!(%connection, "connection timed out, closing");
            self.forget(connection);
            self.inner.broadcaster.close(connection);
        }
        for connection in live {
            self.inner.broadcaster.send(connection, &ServerEvent::Ping);
        }
    }

    /// Holds a grace record and schedules its expiry
    ///
    /// If the window elapses before the record is claimed, `on_expire`
    /// runs with the record; a successful reconnection in the meantime
    /// claims the record first and the scheduled expiry finds nothing.
    /// A newer disconnect for the same player replaces the held record
    /// and cancels the previous expiry.
    pub fn hold_for_reconnect<F, Fut>(&self, record: DisconnectedPlayer, on_expire: F)
    where
        F: FnOnce(DisconnectedPlayer) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = record.player;
        let grace = self.inner.config.grace_period;
        let monitor = self.clone();
        let task = tokio::spawn(async move {
            sleep(grace).await;
            // First writer wins: a reconnection that already claimed the
            // record leaves nothing here to expire.
            if let Some(held) = monitor.take(id) {
                info!(player = %id, room = %held.record.room, "reconnection window elapsed");
                on_expire(held.record).await;
            }
        });

        let replaced = self
            .inner
            .held
            .lock()
            .expect("heartbeat lock poisoned")
            .insert(
                id,
                HeldRecord {
                    record,
                    expiry: task.abort_handle(),
                },
            );
        if let Some(previous) = replaced {
            previous.expiry.abort();
        }
    }

    /// Claims a held record for reconnection
    ///
    /// Returns `None` if the window already elapsed (or the id was never
    /// held); otherwise removes the record and cancels its expiry.
    pub fn claim(&self, id: PlayerId) -> Option<DisconnectedPlayer> {
        let held = self.take(id)?;
        held.expiry.abort();
        Some(held.record)
    }

    /// Whether a record is currently held for the player
    pub fn is_held(&self, id: PlayerId) -> bool {
        self.inner
            .held
            .lock()
            .expect("heartbeat lock poisoned")
            .contains_key(&id)
    }

    /// Drops every held record belonging to a room
    ///
    /// Used when a room is force-closed so no expiry fires into it.
    pub fn drop_room(&self, room: &RoomCode) {
        let dropped: Vec<HeldRecord> = {
            let mut held = self.inner.held.lock().expect("heartbeat lock poisoned");
            let ids: Vec<PlayerId> = held
                .iter()
                .filter(|(_, held)| held.record.room == *room)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| held.remove(&id)).collect()
        };
        for held in dropped {
            held.expiry.abort();
        }
    }

    fn take(&self, id: PlayerId) -> Option<HeldRecord> {
        self.inner
            .held
            .lock()
            .expect("heartbeat lock poisoned")
            .remove(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{
        str::FromStr,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use crate::transport::{Recorded, RecordingBroadcaster};

    fn monitor() -> (HeartbeatMonitor<RecordingBroadcaster>, Arc<RecordingBroadcaster>) {
        let broadcaster = Arc::new(RecordingBroadcaster::new());
        (
            HeartbeatMonitor::new(HeartbeatConfig::default(), broadcaster.clone()),
            broadcaster,
        )
    }

    fn record(room: &str) -> DisconnectedPlayer {
        let player = Player::new(
            "Ana".to_owned(),
            ConnectionId::new(),
            Role::Player,
            false,
        );
        DisconnectedPlayer::capture(&player, RoomCode::from_str(room).unwrap())
    }

    #[tokio::test]
    async fn test_register_beat_forget() {
        let (monitor, _) = monitor();
        let conn = ConnectionId::new();

        monitor.register(conn);
        assert_eq!(monitor.tracked(), 1);

        monitor.beat(conn);
        assert_eq!(monitor.tracked(), 1);

        monitor.forget(conn);
        assert_eq!(monitor.tracked(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_within_grace_returns_record() {
        let (monitor, _) = monitor();
        let expired = Arc::new(AtomicUsize::new(0));

        let rec = record("ROOM01");
        let id = rec.player;
        let counter = expired.clone();
        monitor.hold_for_reconnect(rec, move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(monitor.is_held(id));

        tokio::time::sleep(Duration::from_secs(5)).await;
        let claimed = monitor.claim(id).expect("record should still be held");
        assert_eq!(claimed.name, "Ana");
        assert_eq!(claimed.score, 0);
        assert!(!monitor.is_held(id));

        // The scheduled expiry never fires after a successful claim.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(expired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_fires_once_grace_elapses() {
        let (monitor, _) = monitor();
        let expired = Arc::new(AtomicUsize::new(0));

        let rec = record("ROOM01");
        let id = rec.player;
        let counter = expired.clone();
        monitor.hold_for_reconnect(rec, move |expired_record| async move {
            assert_eq!(expired_record.name, "Ana");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(expired.load(Ordering::SeqCst), 1);
        assert!(!monitor.is_held(id));
        assert!(monitor.claim(id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_disconnect_replaces_record() {
        let (monitor, _) = monitor();
        let expired = Arc::new(AtomicUsize::new(0));

        let mut rec = record("ROOM01");
        let id = rec.player;
        rec.score = 100;
        let counter = expired.clone();
        monitor.hold_for_reconnect(rec.clone(), move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(8)).await;
        rec.score = 200;
        rec.since = Instant::now();
        let counter = expired.clone();
        monitor.hold_for_reconnect(rec, move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // The first expiry was cancelled; only the second one fires,
        // with the newer snapshot.
        tokio::time::sleep(Duration::from_secs(8)).await;
        assert_eq!(expired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(expired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_room_cancels_expiries() {
        let (monitor, _) = monitor();
        let expired = Arc::new(AtomicUsize::new(0));

        let rec = record("ROOM01");
        let other = record("ROOM02");
        let other_id = other.player;
        for rec in [rec, other] {
            let counter = expired.clone();
            monitor.hold_for_reconnect(rec, move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        monitor.drop_room(&RoomCode::from_str("ROOM01").unwrap());
        tokio::time::sleep(Duration::from_secs(30)).await;

        // Only the record in the other room expired.
        assert_eq!(expired.load(Ordering::SeqCst), 1);
        assert!(!monitor.is_held(other_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_pings_live_and_closes_stale() {
        let (monitor, broadcaster) = monitor();
        let live = ConnectionId::new();
        let stale = ConnectionId::new();

        monitor.register(stale);
        tokio::time::sleep(Duration::from_secs(25)).await;
        monitor.register(live);
        monitor.start_probes();

        tokio::time::sleep(Duration::from_secs(11)).await;
        monitor.stop_probes();

        let log = broadcaster.log();
        assert!(
            log.iter()
                .any(|entry| matches!(entry, Recorded::Closed(conn) if *conn == stale))
        );
        assert!(broadcaster
            .direct_events(live)
            .iter()
            .any(|event| matches!(event, ServerEvent::Ping)));
        assert_eq!(monitor.tracked(), 1);
    }
}
