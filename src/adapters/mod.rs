//! Adapter interfaces for external collaborators.
//!
//! The engine consumes two capabilities: an executor that performs the
//! real spreadsheet operation, and a reasoner consulted only by the last
//! classifier layer.

pub mod fabric;
pub mod http;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{Arguments, DecisionSnapshot};

pub use fabric::FabricReasoner;
pub use http::HttpExecutor;

/// Performs automation operations.
///
/// Must tolerate concurrent calls for distinct tool/argument pairs. No
/// isolation is provided for calls that touch overlapping ranges.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Human-readable executor name
    fn name(&self) -> &str;

    /// Run a tool and return its payload
    async fn execute(&self, tool_name: &str, arguments: &Arguments) -> Result<String>;
}

/// Produces decision text for requests no fast-path layer could resolve
#[async_trait]
pub trait Reasoner: Send + Sync {
    fn name(&self) -> &str;

    /// Decide how to handle `request` given one coherent view of the engine
    async fn decide(&self, request: &str, snapshot: &DecisionSnapshot) -> Result<String>;
}
