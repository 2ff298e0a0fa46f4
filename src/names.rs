//! Player name validation
//!
//! This module validates requested player names before admission:
//! length bounds, profanity filtering, and a configurable denylist of
//! reserved words. Uniqueness is not checked here — it is a per-room,
//! case-insensitive property enforced by the session roster.

use std::collections::HashSet;

use rustrict::CensorStr;
use serde::Serialize;
use thiserror::Error;

use crate::constants;

/// Errors that can occur during name validation
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Error {
    /// The name is empty or exceeds the maximum allowed length
    #[error("name must be between {} and {} characters", constants::name::MIN_LENGTH, constants::name::MAX_LENGTH)]
    InvalidLength,
    /// The name contains an offensive or reserved word
    #[error("name contains a disallowed word")]
    Rejected,
}

/// Validation policy for requested player names
///
/// The policy combines fixed length bounds, content filtering, and a
/// configurable set of denied words matched per whole word,
/// case-insensitively.
#[derive(Debug, Clone)]
pub struct NamePolicy {
    denylist: HashSet<String>,
}

impl Default for NamePolicy {
    /// Policy with the built-in reserved words denied
    fn default() -> Self {
        Self {
            denylist: constants::name::RESERVED
                .iter()
                .map(|w| (*w).to_owned())
                .collect(),
        }
    }
}

impl NamePolicy {
    /// Creates a policy denying the given words in addition to the
    /// built-in reserved words
    pub fn with_denied<I: IntoIterator<Item = String>>(denied: I) -> Self {
        let mut policy = Self::default();
        policy
            .denylist
            .extend(denied.into_iter().map(|w| w.to_lowercase()));
        policy
    }

    /// Validates a requested name and returns its cleaned form
    ///
    /// The name is trimmed of surrounding whitespace before the length
    /// check. Content is screened both by the profanity filter and by
    /// the configured denylist.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidLength`] - empty after trimming, or too long
    /// * [`Error::Rejected`] - inappropriate content or a denied word
    pub fn validate(&self, name: &str) -> Result<String, Error> {
        let name = rustrict::trim_whitespace(name);
        let length = name.chars().count();
        if !(constants::name::MIN_LENGTH..=constants::name::MAX_LENGTH).contains(&length) {
            return Err(Error::InvalidLength);
        }
        if name.is_inappropriate() {
            return Err(Error::Rejected);
        }
        let lowered = name.to_lowercase();
        if lowered.split_whitespace().any(|w| self.denylist.contains(w)) {
            return Err(Error::Rejected);
        }
        Ok(name.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_plain_name() {
        let policy = NamePolicy::default();
        assert_eq!(policy.validate("Ana"), Ok("Ana".to_owned()));
    }

    #[test]
    fn test_validate_trims_whitespace() {
        let policy = NamePolicy::default();
        assert_eq!(policy.validate("  Bob  "), Ok("Bob".to_owned()));
    }

    #[test]
    fn test_validate_empty_name() {
        let policy = NamePolicy::default();
        assert_eq!(policy.validate(""), Err(Error::InvalidLength));
        assert_eq!(policy.validate("   "), Err(Error::InvalidLength));
    }

    #[test]
    fn test_validate_too_long() {
        let policy = NamePolicy::default();
        let long = "a".repeat(constants::name::MAX_LENGTH + 1);
        assert_eq!(policy.validate(&long), Err(Error::InvalidLength));
    }

    #[test]
    fn test_validate_max_length_allowed() {
        let policy = NamePolicy::default();
        let max = "a".repeat(constants::name::MAX_LENGTH);
        assert_eq!(policy.validate(&max), Ok(max));
    }

    #[test]
    fn test_validate_rejects_reserved_words() {
        let policy = NamePolicy::default();
        assert_eq!(policy.validate("admin"), Err(Error::Rejected));
        assert_eq!(policy.validate("The Admin"), Err(Error::Rejected));
    }

    #[test]
    fn test_validate_rejects_profanity() {
        let policy = NamePolicy::default();
        for name in ["fuck", "shit"] {
            assert_eq!(
                policy.validate(name),
                Err(Error::Rejected),
                "expected '{name}' to be rejected"
            );
        }
    }

    #[test]
    fn test_validate_custom_denylist() {
        let policy = NamePolicy::with_denied(["Banned".to_owned()]);
        assert_eq!(policy.validate("banned"), Err(Error::Rejected));
        assert_eq!(policy.validate("BANNED word"), Err(Error::Rejected));
        assert!(policy.validate("allowed").is_ok());
    }

    #[test]
    fn test_denylist_matches_whole_words_only() {
        let policy = NamePolicy::with_denied(["ban".to_owned()]);
        assert!(policy.validate("banana").is_ok());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::InvalidLength.to_string(),
            "name must be between 1 and 15 characters"
        );
        assert_eq!(Error::Rejected.to_string(), "name contains a disallowed word");
    }
}
