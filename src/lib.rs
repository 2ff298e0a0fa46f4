//! # Quizcast Coordination Engine
//!
//! This library provides the coordination core for a live, multi-room
//! trivia game: room lifecycle and admission control, the per-room game
//! state machine, question timing, concurrent-answer arbitration with
//! causal ordering, scoring, and connection-loss handling with a bounded
//! reconnection grace period.
//!
//! The engine is transport-agnostic. A host application implements
//! [`transport::Broadcaster`] over its wire protocol, provides a
//! [`question::QuestionBank`] and a [`transport::MatchSink`], and feeds
//! connection events and [`event::ClientMessage`]s into a
//! [`coordinator::Coordinator`]. Everything else — countdowns, timers,
//! answer serialization, scoring, podium reveals, heartbeats — happens
//! inside.
//!
//! Concurrency model: cooperative tasks on tokio. Each room serializes
//! its own answer processing and state transitions behind a
//! session-scoped lock, admin actions behind a second per-room gate, and
//! rooms never contend with each other.

#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::doc_markdown)]

pub mod clock;
pub mod constants;
pub mod coordinator;
pub mod event;
pub mod heartbeat;
pub mod names;
pub mod player;
pub mod question;
pub mod registry;
pub mod room_code;
pub mod scoring;
pub mod session;
pub mod timer;
pub mod transport;
