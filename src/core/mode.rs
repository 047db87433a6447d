//! Operation mode controller.
//!
//! On a fixed timer the controller reads the rolling success rate, maps it
//! to a mode and, on a transition, applies that mode's profile: worker pool
//! size, cache TTL, permitted tools and reasoning budget. Modes never change
//! inside a task's execution, only at tick boundaries.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::{ModeProfile, OperationMode};

use super::cache::ResultCache;
use super::dispatcher::Dispatcher;
use super::stats::StatsCollector;

/// Worker count and cache TTL for one mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeSettings {
    pub workers: usize,
    pub cache_ttl_seconds: u64,
}

/// Per-mode settings table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeTable {
    #[serde(default = "default_normal")]
    pub normal: ModeSettings,

    #[serde(default = "default_degraded")]
    pub degraded: ModeSettings,

    #[serde(default = "default_critical")]
    pub critical: ModeSettings,
}

fn default_normal() -> ModeSettings {
    ModeSettings {
        workers: 5,
        cache_ttl_seconds: 300,
    }
}
fn default_degraded() -> ModeSettings {
    ModeSettings {
        workers: 3,
        cache_ttl_seconds: 600,
    }
}
fn default_critical() -> ModeSettings {
    ModeSettings {
        workers: 1,
        cache_ttl_seconds: 1800,
    }
}

impl Default for ModeTable {
    fn default() -> Self {
        Self {
            normal: default_normal(),
            degraded: default_degraded(),
            critical: default_critical(),
        }
    }
}

impl ModeTable {
    pub fn profile(&self, mode: OperationMode) -> ModeProfile {
        let settings = match mode {
            OperationMode::Normal => self.normal,
            OperationMode::Degraded => self.degraded,
            OperationMode::Critical => self.critical,
        };
        ModeProfile::new(
            mode,
            settings.workers,
            Duration::from_secs(settings.cache_ttl_seconds),
        )
    }
}

#[derive(Debug, Clone)]
struct ModeState {
    profile: ModeProfile,
    last_rate: f64,
    last_evaluated: Option<DateTime<Utc>>,
    transitions: u64,
}

/// A mode change applied at a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: OperationMode,
    pub to: OperationMode,
}

pub struct ModeController {
    state: RwLock<ModeState>,
    table: ModeTable,
    stats: Arc<StatsCollector>,
    dispatcher: Arc<Dispatcher>,
    cache: Arc<ResultCache>,
}

impl ModeController {
    /// Create a controller in Normal mode and push the Normal profile to
    /// the dispatcher and cache.
    pub fn new(
        table: ModeTable,
        stats: Arc<StatsCollector>,
        dispatcher: Arc<Dispatcher>,
        cache: Arc<ResultCache>,
    ) -> Self {
        let profile = table.profile(OperationMode::Normal);
        dispatcher.set_worker_limit(profile.workers);
        cache.set_ttl(profile.cache_ttl);

        Self {
            state: RwLock::new(ModeState {
                profile,
                last_rate: 1.0,
                last_evaluated: None,
                transitions: 0,
            }),
            table,
            stats,
            dispatcher,
            cache,
        }
    }

    pub fn mode(&self) -> OperationMode {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .profile
            .mode
    }

    /// Effective configuration for the current mode
    pub fn profile(&self) -> ModeProfile {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .profile
            .clone()
    }

    pub fn transitions(&self) -> u64 {
        self.state.read().unwrap_or_else(|e| e.into_inner()).transitions
    }

    pub fn last_evaluated(&self) -> Option<DateTime<Utc>> {
        self.state.read().unwrap_or_else(|e| e.into_inner()).last_evaluated
    }

    /// Evaluate the rolling success rate and apply the resulting mode
    pub fn tick(&self) -> Option<Transition> {
        let rate = self.stats.success_rate();
        let target = OperationMode::from_success_rate(rate);

        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.last_rate = rate;
            state.last_evaluated = Some(Utc::now());
        }
        debug!(rate, mode = %target, "Mode evaluated");

        self.apply(target)
    }

    /// Apply a mode. Applying the current mode again is a no-op.
    pub fn apply(&self, mode: OperationMode) -> Option<Transition> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let from = state.profile.mode;
        if from == mode {
            return None;
        }

        let profile = self.table.profile(mode);
        self.dispatcher.set_worker_limit(profile.workers);
        self.cache.set_ttl(profile.cache_ttl);

        info!(
            from = %from,
            to = %mode,
            rate = state.last_rate,
            workers = profile.workers,
            cache_ttl_secs = profile.cache_ttl.as_secs(),
            tools = profile.permitted_tools.len(),
            "Operation mode changed"
        );

        state.profile = profile;
        state.transitions += 1;
        Some(Transition { from, to: mode })
    }

    /// Tick on a fixed interval until `shutdown` is cancelled
    pub async fn run(self: Arc<Self>, period: Duration, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately; skip it so evaluation
        // happens one full period after start.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.tick();
                }
            }
        }
        debug!("Mode controller stopped");
    }
}
