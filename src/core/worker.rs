//! Per-task execution logic run by pool workers.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::adapters::Executor;
use crate::domain::{Task, TaskKind, TaskResult};

use super::cache::ResultCache;
use super::error::EngineError;
use super::failures::FailureLedger;
use super::signature::{failure_signature, invalidation_tags};
use super::stats::StatsCollector;

/// Executes one task against the executor and records its effects on the
/// cache, the failure ledger and the aggregate stats.
pub struct Worker {
    executor: Arc<dyn Executor>,
    cache: Arc<ResultCache>,
    failures: Arc<FailureLedger>,
    stats: Arc<StatsCollector>,
}

impl Worker {
    pub fn new(
        executor: Arc<dyn Executor>,
        cache: Arc<ResultCache>,
        failures: Arc<FailureLedger>,
        stats: Arc<StatsCollector>,
    ) -> Self {
        Self {
            executor,
            cache,
            failures,
            stats,
        }
    }

    /// Run a task once. Workers never retry.
    pub async fn run(&self, task: &Task) -> TaskResult {
        let started = Instant::now();

        if task.is_query() {
            if let Some(payload) = self.cache.get(&task.tool_name, &task.arguments) {
                debug!(tool = %task.tool_name, "Served from result cache");
                let duration = started.elapsed();
                self.stats.record(true, duration);
                return TaskResult::success(task, payload, duration).from_cache();
            }
        }

        let signature = failure_signature(&task.tool_name, &task.arguments);
        let result = self
            .executor
            .execute(&task.tool_name, &task.arguments)
            .await;
        let duration = started.elapsed();

        match result {
            Ok(payload) => {
                match task.kind {
                    TaskKind::Query => {
                        self.cache
                            .set(&task.tool_name, &task.arguments, payload.clone());
                    }
                    TaskKind::Action => {
                        self.cache
                            .invalidate(&invalidation_tags(&task.tool_name, &task.arguments));
                    }
                }
                self.failures.record_success(&signature);
                self.stats.record(true, duration);

                debug!(
                    tool = %task.tool_name,
                    duration_ms = duration.as_millis() as u64,
                    "Task completed"
                );
                TaskResult::success(task, payload, duration)
            }
            Err(e) => {
                let error = EngineError::TransientExecution {
                    tool: task.tool_name.clone(),
                    message: format!("{:#}", e),
                };
                let record = self.failures.record_failure(&signature, &error.to_string());
                self.stats.record(false, duration);

                warn!(
                    tool = %task.tool_name,
                    %signature,
                    fail_count = record.fail_count,
                    error = %e,
                    "Task failed"
                );
                TaskResult::failure(task, error.to_string(), duration)
            }
        }
    }
}
