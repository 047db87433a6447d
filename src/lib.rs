//! sheetops - Resilient orchestration for spreadsheet automation
//!
//! Routes natural-language spreadsheet requests through a layered
//! classifier, executes the resulting tool calls on a bounded priority
//! worker pool, and keeps the system usable as the executor degrades.
//!
//! # Architecture
//!
//! Every request is one orchestration cycle:
//! - A decision snapshot captures engine state once per cycle
//! - The classifier resolves the request (pattern, safety gate, decision
//!   cache, rules, reasoning) into decision text
//! - Tasks run on the worker pool, reading through a tag-invalidated
//!   result cache and feeding the failure ledger and rolling stats
//! - The cycle is appended to a capped, replayable snapshot ledger
//!
//! # Modules
//!
//! - `adapters`: Executor and reasoner collaborators (HTTP, Fabric)
//! - `core`: Orchestration logic (Classifier, Dispatcher, Cache, Ledgers)
//! - `domain`: Data structures (Task, Mode, Snapshot, Outcome)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run one request
//! sheetops submit "list the sheets"
//!
//! # Interactive session, exporting the ledger on exit
//! sheetops --audit audit.jsonl repl
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{Executor, Reasoner};
pub use config::EngineConfig;
pub use core::{EngineError, Orchestrator};
pub use domain::{DecisionLayer, ExecutionOutcome, OperationMode, SubmitResponse};
