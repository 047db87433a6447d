//! Safety gate for destructive requests.
//!
//! Requests matching a destructive phrase are blocked until a human
//! explicitly confirms them. The gate never produces a task and is checked
//! before every other classifier layer.

use serde::{Deserialize, Serialize};

use super::error::EngineError;

/// Destructive phrase list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyGate {
    /// Phrases matched against the normalized request text
    #[serde(default = "default_blocked_phrases")]
    pub blocked_phrases: Vec<String>,
}

fn default_blocked_phrases() -> Vec<String> {
    [
        "delete everything",
        "delete all",
        "clear all",
        "clear everything",
        "erase everything",
        "erase all",
        "wipe",
        "remove all sheets",
        "delete all sheets",
        "drop all",
        "reset the workbook",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

impl Default for SafetyGate {
    fn default() -> Self {
        Self {
            blocked_phrases: default_blocked_phrases(),
        }
    }
}

impl SafetyGate {
    /// Return the first blocked phrase contained in `normalized`
    pub fn matched_phrase(&self, normalized: &str) -> Option<&str> {
        self.blocked_phrases
            .iter()
            .map(String::as_str)
            .find(|phrase| normalized.contains(phrase))
    }

    /// Check a normalized request against the gate
    pub fn check(&self, normalized: &str) -> Result<(), EngineError> {
        match self.matched_phrase(normalized) {
            Some(phrase) => Err(EngineError::SafetyBlocked {
                phrase: phrase.to_string(),
            }),
            None => Ok(()),
        }
    }
}
