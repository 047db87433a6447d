//! Read-only status reports exposed by the engine's admin API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate task statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub total_tasks: u64,
    pub success_tasks: u64,
    pub failed_tasks: u64,
    pub active_workers: usize,

    /// Mean task duration in milliseconds
    pub avg_task_duration_ms: f64,

    /// Rolling success rate over the recent window (0.0..=1.0)
    pub success_rate: f64,

    /// Whether the dispatcher is accepting work
    pub running: bool,
}

/// Result of a health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub workers_active: usize,
    pub total_tasks: u64,
    pub tasks_pending: usize,
    pub last_check: DateTime<Utc>,
    pub issues: Vec<String>,
}

/// Result cache status
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStatus {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub invalidations: u64,
    pub ttl_seconds: u64,
    pub last_sweep: Option<DateTime<Utc>>,
}

/// Failure ledger counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureStats {
    /// Signatures currently tracked
    pub total_memoized: usize,

    /// Sum of fail counts over tracked signatures
    pub total_failures: u64,

    pub recurrent_count: usize,
}

/// Versioned snapshot ledger counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotStats {
    pub live_entries: usize,
    pub capacity: usize,
    pub next_id: u64,
    pub evicted: u64,
    pub successful: usize,
    pub replayed: usize,
}
