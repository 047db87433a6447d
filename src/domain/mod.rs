//! Domain types for the sheetops engine.
//!
//! This module contains the core data structures:
//! - Task: Dispatchable tool calls and their results
//! - Mode: System-wide degradation state
//! - Snapshot: Per-cycle decision views and versioned cycle records
//! - Outcome: What callers get back from a submitted request
//! - Tools: The static tool catalog

pub mod mode;
pub mod outcome;
pub mod snapshot;
pub mod status;
pub mod task;
pub mod tools;

// Re-export commonly used types
pub use mode::{ModeProfile, OperationMode, ReasoningBudget};
pub use outcome::{DecisionLayer, ExecutionOutcome, SubmitResponse};
pub use snapshot::{CycleRecord, DecisionSnapshot, VersionedSnapshot};
pub use status::{CacheStatus, FailureStats, HealthReport, SnapshotStats, Stats};
pub use task::{Arguments, Priority, Task, TaskKind, TaskResult};
pub use tools::{ToolSpec, ToolTier};
