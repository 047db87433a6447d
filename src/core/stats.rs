//! Aggregate task statistics and health evaluation.
//!
//! Counters live behind their own lock, separate from the cache, failure
//! and snapshot locks. The rolling window feeds the mode controller.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;

use crate::domain::{HealthReport, Stats};

/// Default number of recent results in the rolling window
pub const DEFAULT_WINDOW: usize = 100;

/// Success rate below which the engine reports itself unhealthy
pub const HEALTHY_SUCCESS_RATE: f64 = 0.70;

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    success: u64,
    failed: u64,
    total_duration: Duration,
    window: VecDeque<bool>,
}

pub struct StatsCollector {
    counters: Mutex<Counters>,
    window_size: usize,
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl StatsCollector {
    pub fn new(window_size: usize) -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            window_size: window_size.max(1),
        }
    }

    /// Record one finished task
    pub fn record(&self, success: bool, duration: Duration) {
        let mut c = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        c.total += 1;
        if success {
            c.success += 1;
        } else {
            c.failed += 1;
        }
        c.total_duration += duration;

        c.window.push_back(success);
        while c.window.len() > self.window_size {
            c.window.pop_front();
        }
    }

    /// Rolling success rate; 1.0 with no samples
    pub fn success_rate(&self) -> f64 {
        let c = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        rolling_rate(&c.window)
    }

    /// Copy of the counters. Worker and running state are filled in by
    /// the caller, which owns the dispatcher.
    pub fn snapshot(&self, active_workers: usize, running: bool) -> Stats {
        let c = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        let avg = if c.total == 0 {
            0.0
        } else {
            c.total_duration.as_secs_f64() * 1000.0 / c.total as f64
        };

        Stats {
            total_tasks: c.total,
            success_tasks: c.success,
            failed_tasks: c.failed,
            active_workers,
            avg_task_duration_ms: avg,
            success_rate: rolling_rate(&c.window),
            running,
        }
    }
}

fn rolling_rate(window: &VecDeque<bool>) -> f64 {
    if window.is_empty() {
        return 1.0;
    }
    window.iter().filter(|s| **s).count() as f64 / window.len() as f64
}

/// Dispatcher state needed for a health check
#[derive(Debug, Clone, Copy)]
pub struct QueueProbe {
    pub pending: usize,
    pub oldest_pending_age: Option<Duration>,
    pub worker_limit: usize,
}

/// Evaluate health from a stats copy and a queue probe
pub fn evaluate_health(stats: &Stats, probe: QueueProbe, pending_timeout: Duration) -> HealthReport {
    let mut issues = Vec::new();

    if let Some(age) = probe.oldest_pending_age {
        if age > pending_timeout {
            issues.push(format!(
                "{} task(s) pending, oldest waiting {}s (timeout {}s)",
                probe.pending,
                age.as_secs(),
                pending_timeout.as_secs()
            ));
        }
    }

    if stats.total_tasks > 0 && stats.success_rate < HEALTHY_SUCCESS_RATE {
        issues.push(format!(
            "success rate {:.0}% below {:.0}%",
            stats.success_rate * 100.0,
            HEALTHY_SUCCESS_RATE * 100.0
        ));
    }

    if probe.worker_limit == 0 {
        issues.push("worker limit is zero".to_string());
    }
    if stats.active_workers > probe.worker_limit {
        issues.push(format!(
            "{} active workers exceed limit {}",
            stats.active_workers, probe.worker_limit
        ));
    }
    if stats.running && probe.pending > 0 && stats.active_workers == 0 {
        issues.push(format!("{} task(s) pending with no active workers", probe.pending));
    }
    if !stats.running && probe.pending > 0 {
        issues.push(format!("{} task(s) pending while dispatcher is stopped", probe.pending));
    }

    HealthReport {
        healthy: issues.is_empty(),
        workers_active: stats.active_workers,
        total_tasks: stats.total_tasks,
        tasks_pending: probe.pending,
        last_check: Utc::now(),
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(pending: usize) -> QueueProbe {
        QueueProbe {
            pending,
            oldest_pending_age: None,
            worker_limit: 5,
        }
    }

    #[test]
    fn test_empty_rate_is_full() {
        let stats = StatsCollector::default();
        assert_eq!(stats.success_rate(), 1.0);
    }

    #[test]
    fn test_rolling_window() {
        let stats = StatsCollector::new(4);
        for _ in 0..4 {
            stats.record(false, Duration::from_millis(10));
        }
        assert_eq!(stats.success_rate(), 0.0);

        stats.record(true, Duration::from_millis(10));
        stats.record(true, Duration::from_millis(10));
        assert_eq!(stats.success_rate(), 0.5);

        let snapshot = stats.snapshot(0, true);
        assert_eq!(snapshot.total_tasks, 6);
        assert_eq!(snapshot.failed_tasks, 4);
        assert!((snapshot.avg_task_duration_ms - 10.0).abs() < 0.001);
    }

    #[test]
    fn test_healthy_when_idle() {
        let stats = StatsCollector::default().snapshot(0, true);
        let report = evaluate_health(&stats, probe(0), Duration::from_secs(30));
        assert!(report.healthy);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_health_issues() {
        let collector = StatsCollector::default();
        collector.record(true, Duration::ZERO);
        collector.record(false, Duration::ZERO);
        let stats = collector.snapshot(0, true);

        let report = evaluate_health(
            &stats,
            QueueProbe {
                pending: 2,
                oldest_pending_age: Some(Duration::from_secs(45)),
                worker_limit: 5,
            },
            Duration::from_secs(30),
        );

        assert!(!report.healthy);
        assert_eq!(report.issues.len(), 3);
        assert!(report.issues.iter().any(|i| i.contains("success rate")));
        assert!(report.issues.iter().any(|i| i.contains("oldest waiting 45s")));
        assert!(report.issues.iter().any(|i| i.contains("no active workers")));
    }
}
