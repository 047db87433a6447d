//! Core orchestration logic.
//!
//! This module contains:
//! - Classifier: Five-layer request classification (plus the safety gate)
//! - Dispatcher/Worker: Priority queue and bounded worker pool
//! - ResultCache: TTL + tag-invalidated cache of query results
//! - FailureLedger: Failure memoization and recurrence detection
//! - ModeController: Success-rate driven operation modes
//! - SnapshotLedger: Versioned, replayable record of every cycle
//! - Orchestrator: Main execution engine

pub mod cache;
pub mod classifier;
pub mod decision;
pub mod dispatcher;
pub mod error;
pub mod failures;
pub mod ledger;
pub mod mode;
pub mod orchestrator;
pub mod safety;
pub mod signature;
pub mod stats;
pub mod worker;

// Re-export commonly used types
pub use cache::ResultCache;
pub use classifier::{normalize, Classification, Classifier, DecisionCache};
pub use dispatcher::Dispatcher;
pub use error::{EngineError, ReplayRejection};
pub use failures::{FailureLedger, FailureRecord};
pub use ledger::{ReplayPolicy, SnapshotLedger};
pub use mode::{ModeController, ModeSettings, ModeTable, Transition};
pub use orchestrator::{Orchestrator, SweepReport};
pub use safety::SafetyGate;
pub use signature::{cache_key, failure_signature};
pub use stats::StatsCollector;
pub use worker::Worker;
