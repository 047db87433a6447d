//! Versioned snapshot ledger.
//!
//! Append-only, capped record of every orchestration cycle. Entries carry
//! the decision text that produced them so a previously successful decision
//! can be replayed verbatim when its signature starts failing repeatedly.
//!
//! - Ids are strictly increasing and never reused
//! - Eviction of the oldest id happens under the same write lock as the insert
//! - Entries can be exported to / loaded from JSONL for offline audit

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::domain::{CycleRecord, OperationMode, SnapshotStats, VersionedSnapshot};

use super::error::ReplayRejection;

pub const DEFAULT_LEDGER_CAPACITY: usize = 1000;

struct LedgerInner {
    entries: BTreeMap<u64, VersionedSnapshot>,
    next_id: u64,
    evicted: u64,
}

pub struct SnapshotLedger {
    inner: RwLock<LedgerInner>,
    capacity: usize,
}

impl Default for SnapshotLedger {
    fn default() -> Self {
        Self::new(DEFAULT_LEDGER_CAPACITY)
    }
}

impl SnapshotLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(LedgerInner {
                entries: BTreeMap::new(),
                next_id: 1,
                evicted: 0,
            }),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a completed cycle, evicting the oldest entry if the ledger is full
    pub fn append(&self, record: CycleRecord) -> VersionedSnapshot {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        let id = inner.next_id;
        inner.next_id += 1;

        let snapshot = VersionedSnapshot {
            id,
            timestamp: Utc::now(),
            request_text: record.request_text,
            decision_text: record.decision_text,
            result_text: record.result_text,
            success: record.success,
            mode: record.mode,
            task_signature: record.task_signature,
            replay_count: record.replay_count,
        };

        while inner.entries.len() >= self.capacity {
            if let Some((oldest, _)) = inner.entries.pop_first() {
                inner.evicted += 1;
                debug!(evicted_id = oldest, "Ledger full, evicted oldest snapshot");
            }
        }
        inner.entries.insert(id, snapshot.clone());

        snapshot
    }

    pub fn get(&self, id: u64) -> Option<VersionedSnapshot> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.entries.get(&id).cloned()
    }

    /// Most recent successful entry for a task signature
    pub fn latest_success(&self, signature: &str) -> Option<VersionedSnapshot> {
        if signature.is_empty() {
            return None;
        }
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .entries
            .values()
            .rev()
            .find(|s| s.success && s.task_signature == signature)
            .cloned()
    }

    /// All live entries ordered by id
    pub fn entries(&self) -> Vec<VersionedSnapshot> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.entries.values().cloned().collect()
    }

    /// The last `n` entries, newest last
    pub fn recent(&self, n: usize) -> Vec<VersionedSnapshot> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let skip = inner.entries.len().saturating_sub(n);
        inner.entries.values().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> SnapshotStats {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        SnapshotStats {
            live_entries: inner.entries.len(),
            capacity: self.capacity,
            next_id: inner.next_id,
            evicted: inner.evicted,
            successful: inner.entries.values().filter(|s| s.success).count(),
            replayed: inner.entries.values().filter(|s| s.replay_count > 0).count(),
        }
    }

    /// Write all live entries to `path` as JSONL, replacing its contents
    pub async fn export_jsonl(&self, path: &Path) -> Result<usize> {
        let entries = self.entries();

        let mut file = File::create(path)
            .await
            .with_context(|| format!("Failed to create audit file: {}", path.display()))?;

        for entry in &entries {
            let json = serde_json::to_string(entry).context("Failed to serialize snapshot")?;
            file.write_all(format!("{}\n", json).as_bytes())
                .await
                .context("Failed to write snapshot")?;
        }
        file.flush().await.context("Failed to flush audit file")?;

        Ok(entries.len())
    }

    /// Append a single entry to a JSONL audit file
    pub async fn append_jsonl(path: &Path, entry: &VersionedSnapshot) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open audit file: {}", path.display()))?;

        let json = serde_json::to_string(entry).context("Failed to serialize snapshot")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write snapshot")?;
        file.flush().await.context("Failed to flush audit file")?;

        Ok(())
    }

    /// Load a JSONL audit file into a fresh ledger with the given capacity.
    ///
    /// Entries are ordered by id; if the file holds more than `capacity`
    /// entries only the newest survive. The next id continues after the
    /// highest id seen.
    pub async fn load_jsonl(path: &Path, capacity: usize) -> Result<Self> {
        let file = File::open(path)
            .await
            .with_context(|| format!("Failed to open audit file: {}", path.display()))?;

        let mut lines = BufReader::new(file).lines();
        let mut loaded = BTreeMap::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let entry: VersionedSnapshot = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse snapshot: {}", line))?;
            loaded.insert(entry.id, entry);
        }

        let ledger = Self::new(capacity);
        {
            let mut inner = ledger.inner.write().unwrap_or_else(|e| e.into_inner());
            inner.next_id = loaded.keys().next_back().map_or(1, |id| id + 1);
            while loaded.len() > ledger.capacity {
                loaded.pop_first();
                inner.evicted += 1;
            }
            inner.entries = loaded;
        }

        Ok(ledger)
    }
}

/// Limits a snapshot must satisfy before its decision may be replayed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayPolicy {
    pub max_age: Duration,
    pub min_success_rate: f64,
}

impl Default for ReplayPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::hours(24),
            min_success_rate: 0.5,
        }
    }
}

impl ReplayPolicy {
    /// Check a candidate against the current engine state
    pub fn validate(
        &self,
        snapshot: &VersionedSnapshot,
        current_mode: OperationMode,
        success_rate: f64,
        now: DateTime<Utc>,
    ) -> Result<(), ReplayRejection> {
        if !snapshot.success {
            return Err(ReplayRejection::SourceFailed);
        }

        if snapshot.mode != OperationMode::Normal && snapshot.mode != current_mode {
            return Err(ReplayRejection::ModeMismatch {
                recorded: snapshot.mode,
                current: current_mode,
            });
        }

        let age = snapshot.age(now);
        if age >= self.max_age {
            return Err(ReplayRejection::TooOld {
                age_hours: age.num_hours(),
                limit_hours: self.max_age.num_hours(),
            });
        }

        if success_rate < self.min_success_rate {
            return Err(ReplayRejection::Unhealthy {
                rate: success_rate,
                floor: self.min_success_rate,
            });
        }

        Ok(())
    }
}
