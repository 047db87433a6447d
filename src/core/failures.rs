//! Failure memoization.
//!
//! Tracks consecutive failures per call signature. At the threshold the
//! signature becomes recurrent and further attempts are short-circuited.
//! A success deletes the record outright; there is no partial decay.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::FailureStats;

/// Failures needed to mark a signature recurrent
pub const DEFAULT_RECURRENCE_THRESHOLD: u32 = 3;

/// Failure history for one signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub signature: String,
    pub fail_count: u32,
    pub last_failure: DateTime<Utc>,
    pub last_error: String,
    pub recurrent: bool,
}

pub struct FailureLedger {
    records: RwLock<HashMap<String, FailureRecord>>,
    threshold: u32,
}

impl Default for FailureLedger {
    fn default() -> Self {
        Self::new(DEFAULT_RECURRENCE_THRESHOLD)
    }
}

impl FailureLedger {
    pub fn new(threshold: u32) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            threshold: threshold.max(1),
        }
    }

    pub fn is_recurrent(&self, signature: &str) -> bool {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(signature)
            .map(|r| r.recurrent)
            .unwrap_or(false)
    }

    pub fn get(&self, signature: &str) -> Option<FailureRecord> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(signature)
            .cloned()
    }

    /// Record a failure; returns the updated record
    pub fn record_failure(&self, signature: &str, error: &str) -> FailureRecord {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let record = records
            .entry(signature.to_string())
            .or_insert_with(|| FailureRecord {
                signature: signature.to_string(),
                fail_count: 0,
                last_failure: Utc::now(),
                last_error: String::new(),
                recurrent: false,
            });

        record.fail_count += 1;
        record.last_failure = Utc::now();
        record.last_error = error.to_string();

        if !record.recurrent && record.fail_count >= self.threshold {
            record.recurrent = true;
            warn!(
                signature,
                fail_count = record.fail_count,
                error,
                "Signature marked as recurring failure"
            );
        }

        record.clone()
    }

    /// Clear the record for a signature after a success
    pub fn record_success(&self, signature: &str) {
        let removed = self
            .records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(signature);

        if let Some(record) = removed {
            if record.recurrent {
                info!(signature, "Recurring failure cleared by success");
            }
        }
    }

    /// Delete records whose last failure is older than `max_age`
    pub fn expire_older_than(&self, max_age: Duration, now: DateTime<Utc>) -> usize {
        let max_age = match chrono::Duration::from_std(max_age) {
            Ok(d) => d,
            Err(_) => return 0,
        };

        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let before = records.len();
        records.retain(|_, r| now.signed_duration_since(r.last_failure) <= max_age);
        before - records.len()
    }

    pub fn stats(&self) -> FailureStats {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        FailureStats {
            total_memoized: records.len(),
            total_failures: records.values().map(|r| r.fail_count as u64).sum(),
            recurrent_count: records.values().filter(|r| r.recurrent).count(),
        }
    }
}
