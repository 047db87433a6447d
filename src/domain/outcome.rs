//! Outcomes returned to callers of `Orchestrator::submit`.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::task::TaskResult;

/// Classifier layer that resolved a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionLayer {
    /// Layer 1: trivial read-only phrase
    Pattern,

    /// Layer 2: destructive phrase requiring confirmation
    SafetyGate,

    /// Layer 3: previously recorded decision
    DecisionCache,

    /// Layer 4: unambiguous single-tool rule
    Rule,

    /// Layer 5: external reasoning
    Reasoning,

    /// Not classified: a versioned snapshot was replayed
    Replay,
}

impl DecisionLayer {
    /// Layer number (replays report 0)
    pub fn number(self) -> u8 {
        match self {
            Self::Pattern => 1,
            Self::SafetyGate => 2,
            Self::DecisionCache => 3,
            Self::Rule => 4,
            Self::Reasoning => 5,
            Self::Replay => 0,
        }
    }
}

impl fmt::Display for DecisionLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pattern => "pattern",
            Self::SafetyGate => "safety_gate",
            Self::DecisionCache => "decision_cache",
            Self::Rule => "rule",
            Self::Reasoning => "reasoning",
            Self::Replay => "replay",
        };
        write!(f, "{} ({})", name, self.number())
    }
}

/// What happened to a request after classification.
///
/// Each variant is a distinct user-visible state; they never collapse into
/// one generic error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// Blocked by the safety gate, pending explicit human confirmation
    Blocked { reason: String },

    /// Decision carried no tool calls
    Answered { text: String },

    /// Every task executed and succeeded
    Succeeded { results: Vec<TaskResult> },

    /// At least one task executed and failed
    Failed { results: Vec<TaskResult> },

    /// Short-circuited: a task signature is recurrent and no replay was possible
    RecurringFailure { signature: String, replay_error: String },

    /// A previously successful decision was replayed
    Replayed {
        source_id: u64,
        success: bool,
        results: Vec<TaskResult>,
    },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        match self {
            Self::Answered { .. } | Self::Succeeded { .. } => true,
            Self::Replayed { success, .. } => *success,
            Self::Blocked { .. } | Self::Failed { .. } | Self::RecurringFailure { .. } => false,
        }
    }

    pub fn results(&self) -> &[TaskResult] {
        match self {
            Self::Succeeded { results } | Self::Failed { results } | Self::Replayed { results, .. } => {
                results
            }
            _ => &[],
        }
    }

    /// One-line summary stored as the ledger's result text
    pub fn summary(&self) -> String {
        match self {
            Self::Blocked { reason } => format!("blocked pending confirmation: {}", reason),
            Self::Answered { text } => text.clone(),
            Self::Succeeded { results } => format!("succeeded: {}", summarize(results)),
            Self::Failed { results } => format!("failed: {}", summarize(results)),
            Self::RecurringFailure {
                signature,
                replay_error,
            } => format!("recurring failure {}: {}", signature, replay_error),
            Self::Replayed {
                source_id,
                success,
                results,
            } => format!(
                "replayed #{} ({}): {}",
                source_id,
                if *success { "succeeded" } else { "failed" },
                summarize(results)
            ),
        }
    }
}

fn summarize(results: &[TaskResult]) -> String {
    results
        .iter()
        .map(|r| match &r.error {
            None => format!("{} -> {}", r.tool_name, r.payload),
            Some(e) => format!("{} !! {}", r.tool_name, e),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Response to a submitted request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Ledger id recorded for this cycle
    pub snapshot_id: u64,

    pub layer: DecisionLayer,

    /// Decision text, absent when the safety gate blocked the request
    pub decision_text: Option<String>,

    pub outcome: ExecutionOutcome,
}
