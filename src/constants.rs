//! Configuration constants for the quizcast engine
//!
//! This module contains the limits and default tunables used throughout
//! the engine to ensure data integrity and provide consistent boundaries
//! for rooms, sessions and the heartbeat monitor.

/// Room configuration constants
pub mod room {
    /// Number of characters in a generated room code
    pub const CODE_LENGTH: usize = 6;
    /// Maximum length of a room's display name
    pub const MAX_NAME_LENGTH: usize = 50;
    /// Maximum number of players allowed in a single room
    pub const MAX_PLAYER_COUNT: usize = 1000;
}

/// Player name configuration constants
pub mod name {
    /// Minimum length of a player name in characters
    pub const MIN_LENGTH: usize = 1;
    /// Maximum length of a player name in characters
    pub const MAX_LENGTH: usize = 15;
    /// Reserved words rejected in player names regardless of the
    /// configured denylist
    pub const RESERVED: &[&str] = &["admin", "root", "host", "server"];
}

/// Question configuration constants
pub mod question {
    /// Maximum length of a question's text
    pub const MAX_TEXT_LENGTH: usize = 200;
    /// Maximum length of a single answer option
    pub const MAX_OPTION_LENGTH: usize = 200;
    /// Minimum number of answer options for a question
    pub const MIN_OPTION_COUNT: usize = 2;
    /// Maximum number of answer options for a question
    pub const MAX_OPTION_COUNT: usize = 8;
    /// Minimum time limit in seconds for answering a question
    pub const MIN_TIME_LIMIT: u64 = 5;
    /// Maximum time limit in seconds for answering a question
    pub const MAX_TIME_LIMIT: u64 = 240;
    /// Default time limit in seconds when none is specified
    pub const DEFAULT_TIME_LIMIT: u64 = 20;
}

/// Session flow configuration constants
pub mod session {
    /// Number of countdown ticks broadcast before each question
    pub const COUNTDOWN_SECONDS: u64 = 3;
    /// Delay in milliseconds between the final timer tick and results
    pub const RESULTS_GRACE_MS: u64 = 500;
    /// Delay in milliseconds between staged podium reveals
    pub const PODIUM_REVEAL_MS: u64 = 1500;
    /// Default base points awarded for an instant correct answer
    pub const BASE_POINTS: u64 = 1000;
    /// Number of players revealed on the podium
    pub const PODIUM_SIZE: usize = 3;
}

/// Heartbeat and reconnection configuration constants
pub mod heartbeat {
    /// Interval in seconds between liveness probes
    pub const PROBE_INTERVAL_SECS: u64 = 10;
    /// Seconds of silence after which a connection is considered dead
    pub const PROBE_TIMEOUT_SECS: u64 = 20;
    /// Seconds a disconnected player's state is held for reconnection
    pub const RECONNECT_GRACE_SECS: u64 = 10;
}
