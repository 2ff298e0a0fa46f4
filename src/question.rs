//! Question configuration and the question-bank interface
//!
//! A [`Question`] is immutable once a room is created: text, a fixed set
//! of answer options, the correct option index and a time limit. Editing
//! questions is a pre-game concern that lives behind the
//! [`QuestionBank`] collaborator, outside this engine.

use std::time::Duration;

use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::{constants, room_code::RoomCode};

type ValidationResult = garde::Result;

/// Validates that a duration falls within specified bounds
fn validate_duration<const MIN_SECONDS: u64, const MAX_SECONDS: u64>(
    val: &Duration,
) -> ValidationResult {
    if (MIN_SECONDS..=MAX_SECONDS).contains(&val.as_secs()) {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "outside of bounds [{MIN_SECONDS},{MAX_SECONDS}]",
        )))
    }
}

/// Validates the time limit for answering a question
fn validate_time_limit(val: &Duration) -> ValidationResult {
    validate_duration::<
        { constants::question::MIN_TIME_LIMIT },
        { constants::question::MAX_TIME_LIMIT },
    >(val)
}

/// Validates that the correct-option index points into the options
fn validate_correct_index(correct: &usize, options: &[String]) -> ValidationResult {
    if *correct < options.len() {
        Ok(())
    } else {
        Err(garde::Error::new("correct option index out of range"))
    }
}

/// A single quiz question
///
/// Questions are validated at load time and never mutated during play.
/// The correct option index is withheld from anything broadcast while
/// the question is open; see [`Question::public_view`].
#[serde_with::serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Question {
    /// The question text shown to players
    #[garde(length(chars, min = 1, max = constants::question::MAX_TEXT_LENGTH))]
    pub text: String,
    /// The available answer options
    #[garde(
        length(min = constants::question::MIN_OPTION_COUNT, max = constants::question::MAX_OPTION_COUNT),
        inner(length(chars, max = constants::question::MAX_OPTION_LENGTH))
    )]
    pub options: Vec<String>,
    /// Index of the correct option
    #[garde(custom(|v, _| validate_correct_index(v, &self.options)))]
    pub correct: usize,
    /// Time players have to answer once the question is shown
    #[garde(custom(|v, _| validate_time_limit(v)))]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    #[serde(default = "default_time_limit")]
    pub time_limit: Duration,
    /// Base points awarded for an instant correct answer
    #[garde(skip)]
    #[serde(default = "default_points")]
    pub points: u64,
}

fn default_time_limit() -> Duration {
    Duration::from_secs(constants::question::DEFAULT_TIME_LIMIT)
}

fn default_points() -> u64 {
    constants::session::BASE_POINTS
}

/// A question as broadcast to players, with the answer withheld
#[serde_with::serde_as]
#[derive(Debug, Clone, Serialize)]
pub struct PublicQuestion {
    /// The question text
    pub text: String,
    /// The available answer options
    pub options: Vec<String>,
    /// Time players have to answer
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub time_limit: Duration,
}

impl Question {
    /// Returns the view of this question safe to broadcast while open
    pub fn public_view(&self) -> PublicQuestion {
        PublicQuestion {
            text: self.text.clone(),
            options: self.options.clone(),
            time_limit: self.time_limit,
        }
    }

    /// Whether the given option index is the correct one
    pub fn is_correct(&self, option: usize) -> bool {
        option == self.correct
    }
}

/// Errors reported by a question bank
#[derive(thiserror::Error, Debug)]
pub enum BankError {
    /// The bank holds no questions for the room
    #[error("no questions available for room {0}")]
    Empty(RoomCode),
    /// A stored question failed validation
    #[error("invalid question: {0}")]
    Invalid(#[from] garde::Report),
    /// The underlying store failed
    #[error("question store failure: {0}")]
    Store(String),
}

/// Provider of the ordered question list for a room
///
/// Implemented by the persistence layer outside this engine; the
/// engine calls it exactly once, at room creation.
pub trait QuestionBank: Send + Sync + 'static {
    /// Loads the ordered list of questions for a room
    ///
    /// # Errors
    ///
    /// Returns a [`BankError`] if the room has no questions or the
    /// store cannot produce them.
    fn load_questions(&self, room: &RoomCode) -> Result<Vec<Question>, BankError>;
}
