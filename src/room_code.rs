//! Room code generation and parsing
//!
//! This module provides the short codes that identify rooms. Codes are
//! fixed-length uppercase alphanumeric strings so they are easy to read
//! out loud and type on a phone; lookups are case-insensitive.

use std::{fmt::Display, str::FromStr};

use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;

use crate::constants;

/// Alphabet used for generated room codes
const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// A unique identifier for a room
///
/// Room codes are generated randomly from an uppercase alphanumeric
/// alphabet. Uniqueness against live rooms is enforced by the registry,
/// which regenerates on collision.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct RoomCode(String);

/// Errors that can occur when parsing a room code from a string
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The string does not have the expected number of characters
    #[error("room code must be exactly {} characters", constants::room::CODE_LENGTH)]
    WrongLength,
    /// The string contains characters outside the code alphabet
    #[error("room code must be alphanumeric")]
    InvalidCharacter,
}

impl RoomCode {
    /// Generates a new random room code
    pub fn generate() -> Self {
        Self(
            (0..constants::room::CODE_LENGTH)
                .map(|_| char::from(ALPHABET[fastrand::usize(..ALPHABET.len())]))
                .collect(),
        )
    }

    /// Returns the code as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RoomCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomCode {
    type Err = ParseError;

    /// Parses a room code, accepting lowercase input
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] if the string has the wrong length or
    /// contains characters outside the code alphabet.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_uppercase();
        if s.chars().count() != constants::room::CODE_LENGTH {
            return Err(ParseError::WrongLength);
        }
        if !s.bytes().all(|b| ALPHABET.contains(&b)) {
            return Err(ParseError::InvalidCharacter);
        }
        Ok(Self(s))
    }
}
