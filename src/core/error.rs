//! Engine error taxonomy.

use thiserror::Error;

use crate::domain::OperationMode;

/// Errors surfaced by the orchestration engine
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Executor call failed; retryable by the caller, never by a worker
    #[error("Tool '{tool}' failed: {message}")]
    TransientExecution { tool: String, message: String },

    /// Destructive request blocked by the safety gate
    #[error("Blocked pending confirmation: request matches '{phrase}'")]
    SafetyBlocked { phrase: String },

    /// Replay validation failed
    #[error("Snapshot {id} cannot be replayed: {reason}")]
    InvalidSnapshotContext { id: u64, reason: ReplayRejection },

    /// Queue or ledger full; resolved by evicting the oldest entry
    #[error("Capacity exceeded ({capacity}), oldest entry evicted")]
    CapacityExceeded { capacity: usize },

    #[error("Snapshot {0} not found")]
    SnapshotNotFound(u64),

    #[error("Reasoning failed: {0}")]
    Reasoning(String),

    #[error("Engine is not accepting work (not started or shut down)")]
    ShuttingDown,
}

/// Why a versioned snapshot failed replay validation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReplayRejection {
    #[error("no successful snapshot recorded for signature {0}")]
    NoCandidate(String),

    #[error("source cycle did not succeed")]
    SourceFailed,

    #[error("recorded in {recorded} mode, engine is in {current} mode")]
    ModeMismatch {
        recorded: OperationMode,
        current: OperationMode,
    },

    #[error("snapshot is {age_hours}h old (limit {limit_hours}h)")]
    TooOld { age_hours: i64, limit_hours: i64 },

    #[error("success rate {rate:.2} is below {floor:.2}")]
    Unhealthy { rate: f64, floor: f64 },
}
