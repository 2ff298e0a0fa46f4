//! Lamport logical clock
//!
//! Provides a monotonically advancing counter used to causally order
//! answer events independently of client-reported time. The clock value
//! travels alongside events as a deterministic tie-break; it never
//! affects scoring.

use std::sync::atomic::{AtomicU64, Ordering};

/// A Lamport-style logical clock
///
/// The counter is incremented before every server-originated causal
/// event (such as broadcasting a question) and merged with
/// client-supplied sequence numbers on receipt, so the values it hands
/// out form a total order consistent with causality.
#[derive(Debug, Default)]
pub struct LogicalClock(AtomicU64);

impl LogicalClock {
    /// Creates a clock starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the clock for a local event and returns the new value
    pub fn tick(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Merges a received sequence number and returns the new value
    ///
    /// Applies the Lamport receive rule: the counter becomes
    /// `max(local, received) + 1`, so the returned value is strictly
    /// greater than both.
    pub fn observe(&self, received: u64) -> u64 {
        self.0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.max(received) + 1)
            })
            .expect("update closure never returns None")
            .max(received)
            + 1
    }

    /// Returns the current value without advancing
    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
