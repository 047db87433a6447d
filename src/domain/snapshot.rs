//! Snapshot types: the per-cycle decision view and the replayable
//! versioned record of a completed cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::mode::{OperationMode, ReasoningBudget};
use super::status::{CacheStatus, HealthReport, Stats};

/// Immutable view of engine state captured at the start of a cycle.
///
/// Handed to the reasoning layer so its decision is based on one coherent
/// view while workers keep mutating the live counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionSnapshot {
    pub timestamp: DateTime<Utc>,
    pub mode: OperationMode,
    pub stats: Stats,
    pub health: HealthReport,
    pub cache: CacheStatus,
    pub pending_tasks: usize,
    pub available_tools: Vec<String>,
    pub budget: ReasoningBudget,
}

/// Replayable record of one orchestration cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedSnapshot {
    /// Strictly increasing, never reused
    pub id: u64,

    pub timestamp: DateTime<Utc>,

    pub request_text: String,

    /// Decision text as produced by the classifier (empty if blocked)
    pub decision_text: String,

    /// Human-readable summary of the outcome
    pub result_text: String,

    pub success: bool,

    /// Mode in effect when the cycle ran
    pub mode: OperationMode,

    /// Signature of the cycle's tasks (empty when no tasks ran)
    pub task_signature: String,

    /// How many replays separate this entry from the original decision
    pub replay_count: u32,
}

impl VersionedSnapshot {
    /// Age relative to `now`
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.timestamp)
    }
}

/// A completed cycle waiting to be appended to the ledger.
///
/// The ledger assigns the id and timestamp on append.
#[derive(Debug, Clone, Default)]
pub struct CycleRecord {
    pub request_text: String,
    pub decision_text: String,
    pub result_text: String,
    pub success: bool,
    pub mode: OperationMode,
    pub task_signature: String,
    pub replay_count: u32,
}
