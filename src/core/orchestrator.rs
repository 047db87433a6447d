//! Main orchestrator for request execution.
//!
//! Owns every engine subsystem and runs one orchestration cycle per
//! submitted request: snapshot, classify, gate on recurrence, dispatch,
//! record. Background loops (dispatcher, mode ticker, maintenance sweep)
//! share a single cancellation token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{Executor, Reasoner};
use crate::config::EngineConfig;
use crate::domain::{
    CacheStatus, CycleRecord, DecisionLayer, DecisionSnapshot, ExecutionOutcome, FailureStats,
    HealthReport, ModeProfile, OperationMode, SnapshotStats, Stats, SubmitResponse, Task,
    TaskResult, VersionedSnapshot,
};

use super::cache::ResultCache;
use super::classifier::{Classifier, DecisionCache};
use super::decision::{self, ParsedDecision};
use super::dispatcher::Dispatcher;
use super::error::{EngineError, ReplayRejection};
use super::failures::FailureLedger;
use super::ledger::{ReplayPolicy, SnapshotLedger};
use super::mode::{ModeController, Transition};
use super::signature::{cycle_signature, failure_signature};
use super::stats::{evaluate_health, StatsCollector};
use super::worker::Worker;

/// Entries removed by one maintenance sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub cache_entries: usize,
    pub decisions: usize,
    pub failure_records: usize,
}

/// The orchestration engine
pub struct Orchestrator {
    config: EngineConfig,
    stats: Arc<StatsCollector>,
    cache: Arc<ResultCache>,
    failures: Arc<FailureLedger>,
    dispatcher: Arc<Dispatcher>,
    worker: Arc<Worker>,
    mode: Arc<ModeController>,
    classifier: Arc<Classifier>,
    ledger: Arc<SnapshotLedger>,
    replay_policy: ReplayPolicy,
    shutdown: CancellationToken,
    started: AtomicBool,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Build an engine. Nothing runs until [`Orchestrator::start`].
    pub fn new(
        config: EngineConfig,
        executor: Arc<dyn Executor>,
        reasoner: Arc<dyn Reasoner>,
    ) -> Self {
        let stats = Arc::new(StatsCollector::new(config.stats_window));
        let cache = Arc::new(ResultCache::new(Duration::from_secs(
            config.modes.normal.cache_ttl_seconds,
        )));
        let failures = Arc::new(FailureLedger::new(config.recurrence_threshold));
        let dispatcher = Arc::new(Dispatcher::new(
            config.modes.normal.workers,
            config.queue_capacity,
        ));
        let worker = Arc::new(Worker::new(
            executor,
            cache.clone(),
            failures.clone(),
            stats.clone(),
        ));
        let mode = Arc::new(ModeController::new(
            config.modes.clone(),
            stats.clone(),
            dispatcher.clone(),
            cache.clone(),
        ));
        let classifier = Arc::new(Classifier::new(
            config.safety.clone(),
            config.decision_ttl(),
            reasoner,
        ));
        let ledger = Arc::new(SnapshotLedger::new(config.ledger_capacity));
        let replay_policy = config.replay_policy();

        Self {
            config,
            stats,
            cache,
            failures,
            dispatcher,
            worker,
            mode,
            classifier,
            ledger,
            replay_policy,
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
            background: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Spawn the dispatcher, the mode ticker and the maintenance sweep.
    /// Must be called from within a tokio runtime. Calling it twice is a no-op.
    pub fn start(&self) {
        if self.shutdown.is_cancelled() {
            warn!("Engine already shut down, not restarting");
            return;
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut handles = self.background.lock().unwrap_or_else(|e| e.into_inner());

        handles.push(tokio::spawn(
            self.dispatcher
                .clone()
                .run(self.worker.clone(), self.shutdown.clone()),
        ));

        handles.push(tokio::spawn(
            self.mode
                .clone()
                .run(self.config.mode_tick_interval(), self.shutdown.clone()),
        ));

        let cache = self.cache.clone();
        let classifier = self.classifier.clone();
        let failures = self.failures.clone();
        let failure_ttl = self.config.failure_ttl();
        let period = self.config.sweep_interval();
        let token = self.shutdown.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        sweep(&cache, classifier.decision_cache(), &failures, failure_ttl);
                    }
                }
            }
        }));

        info!(
            mode = %self.mode.mode(),
            workers = self.dispatcher.worker_limit(),
            "Engine started"
        );
    }

    /// Stop accepting work and wait for background loops to finish.
    /// In-flight executor calls complete on their own.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.dispatcher.close();

        let handles: Vec<_> = {
            let mut guard = self.background.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        info!("Engine stopped");
    }

    fn ensure_accepting(&self) -> Result<(), EngineError> {
        if !self.started.load(Ordering::SeqCst)
            || self.shutdown.is_cancelled()
            || !self.dispatcher.is_open()
        {
            return Err(EngineError::ShuttingDown);
        }
        Ok(())
    }

    /// Run one orchestration cycle for a request
    #[instrument(skip(self), fields(mode = %self.mode.mode()))]
    pub async fn submit(&self, request: &str) -> Result<SubmitResponse, EngineError> {
        self.ensure_accepting()?;

        let snapshot = self.capture_snapshot();
        let classification = self.classifier.classify(request, &snapshot).await?;
        let layer = classification.layer;
        let mode = snapshot.mode;

        if classification.is_blocked() {
            let phrase = classification.blocked_phrase.unwrap_or_default();
            let reason = EngineError::SafetyBlocked { phrase }.to_string();
            info!(%reason, "Request blocked by safety gate");

            let outcome = ExecutionOutcome::Blocked { reason };
            let entry = self.ledger.append(CycleRecord {
                request_text: request.to_string(),
                result_text: outcome.summary(),
                success: false,
                mode,
                ..Default::default()
            });
            return Ok(SubmitResponse {
                snapshot_id: entry.id,
                layer,
                decision_text: None,
                outcome,
            });
        }

        let decision_text = classification.decision_text.unwrap_or_default();
        let parsed = decision::parse(&decision_text);

        if parsed.is_answer() {
            let outcome = ExecutionOutcome::Answered {
                text: decision_text.clone(),
            };
            if classification.cacheable {
                self.classifier.remember(request, &decision_text);
            }
            let entry = self.ledger.append(CycleRecord {
                request_text: request.to_string(),
                decision_text: decision_text.clone(),
                result_text: outcome.summary(),
                success: true,
                mode,
                ..Default::default()
            });
            debug!(snapshot_id = entry.id, %layer, "Answered without tasks");
            return Ok(SubmitResponse {
                snapshot_id: entry.id,
                layer,
                decision_text: Some(decision_text),
                outcome,
            });
        }

        let (tasks, mut rejected) = self.admit(parsed, layer, &snapshot);
        let signature = cycle_signature(&tasks);

        if let Some(recurrent) = tasks
            .iter()
            .map(|t| failure_signature(&t.tool_name, &t.arguments))
            .find(|sig| self.failures.is_recurrent(sig))
        {
            return Ok(self
                .recover(request, &decision_text, &signature, &recurrent, layer, mode)
                .await);
        }

        let mut results = self.dispatch(tasks).await;
        results.append(&mut rejected);

        let success = results.iter().all(|r| r.success);
        let outcome = if success {
            ExecutionOutcome::Succeeded { results }
        } else {
            ExecutionOutcome::Failed { results }
        };

        if classification.cacheable && outcome.is_success() {
            self.classifier.remember(request, &decision_text);
        }

        let entry = self.ledger.append(CycleRecord {
            request_text: request.to_string(),
            decision_text: decision_text.clone(),
            result_text: outcome.summary(),
            success,
            mode,
            task_signature: signature,
            replay_count: 0,
        });
        info!(snapshot_id = entry.id, %layer, success, "Cycle complete");

        Ok(SubmitResponse {
            snapshot_id: entry.id,
            layer,
            decision_text: Some(decision_text),
            outcome,
        })
    }

    /// Split parsed calls into dispatchable tasks and immediate rejections.
    ///
    /// Unknown tools are always rejected. Mode restrictions apply only to
    /// decisions from the reasoning layer.
    fn admit(
        &self,
        parsed: ParsedDecision,
        layer: DecisionLayer,
        snapshot: &DecisionSnapshot,
    ) -> (Vec<Task>, Vec<TaskResult>) {
        let mut rejected: Vec<TaskResult> = parsed
            .unknown_tools
            .into_iter()
            .map(|tool| {
                let error = format!("unknown tool '{}'", tool);
                TaskResult::rejected(tool, error)
            })
            .collect();

        if layer != DecisionLayer::Reasoning {
            return (parsed.tasks, rejected);
        }

        let mut tasks = Vec::with_capacity(parsed.tasks.len());
        for task in parsed.tasks {
            if snapshot.available_tools.iter().any(|t| *t == task.tool_name) {
                tasks.push(task);
            } else {
                warn!(tool = %task.tool_name, mode = %snapshot.mode, "Tool not permitted");
                let error = format!("tool not permitted in {} mode", snapshot.mode.name());
                rejected.push(TaskResult::failure(&task, error, Duration::ZERO));
            }
        }
        (tasks, rejected)
    }

    /// Recovery path for a cycle that contains a recurrent signature.
    ///
    /// Replays the latest valid successful decision for the cycle signature,
    /// or reports the cycle as a recurring failure. Never executes the new
    /// decision.
    async fn recover(
        &self,
        request: &str,
        decision_text: &str,
        signature: &str,
        recurrent: &str,
        layer: DecisionLayer,
        mode: OperationMode,
    ) -> SubmitResponse {
        warn!(%signature, %recurrent, "Recurrent signature, entering recovery");

        match self.replay_candidate(signature, mode) {
            Ok(source) => {
                info!(source_id = source.id, "Replaying last successful decision");
                self.replay_from(&source, request).await
            }
            Err(rejection) => {
                let replay_error = rejection.to_string();
                warn!(%signature, %replay_error, "Replay unavailable");

                let outcome = ExecutionOutcome::RecurringFailure {
                    signature: recurrent.to_string(),
                    replay_error,
                };
                let entry = self.ledger.append(CycleRecord {
                    request_text: request.to_string(),
                    decision_text: decision_text.to_string(),
                    result_text: outcome.summary(),
                    success: false,
                    mode,
                    task_signature: signature.to_string(),
                    replay_count: 0,
                });
                SubmitResponse {
                    snapshot_id: entry.id,
                    layer,
                    decision_text: Some(decision_text.to_string()),
                    outcome,
                }
            }
        }
    }

    fn replay_candidate(
        &self,
        signature: &str,
        mode: OperationMode,
    ) -> Result<VersionedSnapshot, ReplayRejection> {
        let candidate = self
            .ledger
            .latest_success(signature)
            .ok_or_else(|| ReplayRejection::NoCandidate(signature.to_string()))?;

        self.replay_policy
            .validate(&candidate, mode, self.stats.success_rate(), Utc::now())?;

        Ok(candidate)
    }

    /// Re-execute a recorded decision without classification and record
    /// the result as a new ledger entry.
    async fn replay_from(&self, source: &VersionedSnapshot, request: &str) -> SubmitResponse {
        let parsed = decision::parse(&source.decision_text);
        let signature = cycle_signature(&parsed.tasks);

        let mut rejected: Vec<TaskResult> = parsed
            .unknown_tools
            .into_iter()
            .map(|tool| {
                let error = format!("unknown tool '{}'", tool);
                TaskResult::rejected(tool, error)
            })
            .collect();
        let mut results = self.dispatch(parsed.tasks).await;
        results.append(&mut rejected);

        let success = results.iter().all(|r| r.success);
        let outcome = ExecutionOutcome::Replayed {
            source_id: source.id,
            success,
            results,
        };

        let entry = self.ledger.append(CycleRecord {
            request_text: request.to_string(),
            decision_text: source.decision_text.clone(),
            result_text: outcome.summary(),
            success,
            mode: self.mode.mode(),
            task_signature: signature,
            replay_count: source.replay_count + 1,
        });
        info!(
            snapshot_id = entry.id,
            source_id = source.id,
            replay_count = entry.replay_count,
            success,
            "Replay complete"
        );

        SubmitResponse {
            snapshot_id: entry.id,
            layer: DecisionLayer::Replay,
            decision_text: Some(source.decision_text.clone()),
            outcome,
        }
    }

    /// Replay a recorded decision by ledger id after validating it
    #[instrument(skip(self))]
    pub async fn replay_decision(&self, snapshot_id: u64) -> Result<SubmitResponse, EngineError> {
        self.ensure_accepting()?;

        let source = self
            .ledger
            .get(snapshot_id)
            .ok_or(EngineError::SnapshotNotFound(snapshot_id))?;

        self.replay_policy
            .validate(&source, self.mode.mode(), self.stats.success_rate(), Utc::now())
            .map_err(|reason| EngineError::InvalidSnapshotContext {
                id: snapshot_id,
                reason,
            })?;

        let request = source.request_text.clone();
        Ok(self.replay_from(&source, &request).await)
    }

    /// Enqueue tasks and wait for every result, in task order
    async fn dispatch(&self, tasks: Vec<Task>) -> Vec<TaskResult> {
        let mut waiting: Vec<(Task, Option<oneshot::Receiver<TaskResult>>)> =
            Vec::with_capacity(tasks.len());

        for task in tasks {
            match self.dispatcher.enqueue(task.clone()) {
                Ok(rx) => waiting.push((task, Some(rx))),
                Err(e) => {
                    warn!(tool = %task.tool_name, error = %e, "Enqueue rejected");
                    waiting.push((task, None));
                }
            }
        }

        let mut results = Vec::with_capacity(waiting.len());
        for (task, rx) in waiting {
            let result = match rx {
                Some(rx) => match rx.await {
                    Ok(result) => result,
                    Err(_) => {
                        TaskResult::failure(&task, EngineError::ShuttingDown.to_string(), Duration::ZERO)
                    }
                },
                None => TaskResult::failure(&task, EngineError::ShuttingDown.to_string(), Duration::ZERO),
            };
            results.push(result);
        }
        results
    }

    // ------------------------------------------------------------------
    // Admin API
    // ------------------------------------------------------------------

    pub fn get_stats(&self) -> Stats {
        self.stats.snapshot(
            self.dispatcher.active_workers(),
            self.dispatcher.is_running(),
        )
    }

    pub fn health_check(&self) -> HealthReport {
        let stats = self.get_stats();
        evaluate_health(&stats, self.dispatcher.probe(), self.config.pending_timeout())
    }

    pub fn get_cache_status(&self) -> CacheStatus {
        self.cache.status()
    }

    /// Drop every cached result and cached decision
    pub fn clear_cache(&self) {
        self.cache.clear();
        self.classifier.decision_cache().clear();
        info!("Caches cleared");
    }

    pub fn get_failure_stats(&self) -> FailureStats {
        self.failures.stats()
    }

    pub fn get_operation_mode(&self) -> OperationMode {
        self.mode.mode()
    }

    pub fn get_operation_mode_name(&self) -> &'static str {
        self.mode.mode().name()
    }

    pub fn mode_profile(&self) -> ModeProfile {
        self.mode.profile()
    }

    /// Admin override: run the mode controller's evaluation now instead of
    /// waiting for the next tick.
    ///
    /// Goes through the same `ModeController::tick` as the timer, so the
    /// rate thresholds and idempotent apply still hold. Never called from
    /// the Submit path; callers use it to force a re-evaluation (tests,
    /// operators).
    pub fn evaluate_mode(&self) -> Option<Transition> {
        self.mode.tick()
    }

    /// Capture a fresh, immutable view of the engine
    pub fn get_decision_snapshot(&self) -> DecisionSnapshot {
        self.capture_snapshot()
    }

    fn capture_snapshot(&self) -> DecisionSnapshot {
        let profile = self.mode.profile();
        let stats = self.get_stats();
        let health = evaluate_health(&stats, self.dispatcher.probe(), self.config.pending_timeout());

        DecisionSnapshot {
            timestamp: Utc::now(),
            mode: profile.mode,
            stats,
            health,
            cache: self.cache.status(),
            pending_tasks: self.dispatcher.pending(),
            available_tools: profile.permitted_tools,
            budget: profile.budget,
        }
    }

    pub fn get_snapshot_stats(&self) -> SnapshotStats {
        self.ledger.stats()
    }

    pub fn ledger(&self) -> &SnapshotLedger {
        &self.ledger
    }

    pub fn decision_cache(&self) -> &DecisionCache {
        self.classifier.decision_cache()
    }

    /// Run one maintenance sweep immediately
    pub fn run_maintenance(&self) -> SweepReport {
        sweep(
            &self.cache,
            self.classifier.decision_cache(),
            &self.failures,
            self.config.failure_ttl(),
        )
    }
}

fn sweep(
    cache: &ResultCache,
    decisions: &DecisionCache,
    failures: &FailureLedger,
    failure_ttl: Duration,
) -> SweepReport {
    let now = Utc::now();
    let report = SweepReport {
        cache_entries: cache.sweep_at(now),
        decisions: decisions.sweep_at(now),
        failure_records: failures.expire_older_than(failure_ttl, now),
    };
    debug!(
        cache_entries = report.cache_entries,
        decisions = report.decisions,
        failure_records = report.failure_records,
        "Maintenance sweep"
    );
    report
}
