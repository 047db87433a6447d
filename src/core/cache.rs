//! Tag-indexed cache of read-only tool results.
//!
//! Entries are stored only for successful queries and carry a tag set
//! derived from the call (`tool:`, `sheet:`, `workbook:`, `range:`). A
//! successful action invalidates every entry sharing a scoping tag with it.
//! `tool:` tags never take part in invalidation.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::{Arguments, CacheStatus};

use super::signature::{cache_key, derive_tags, is_scoping_tag, tag_matches};

/// A cached query result
#[derive(Debug)]
pub struct CacheEntry {
    pub key: String,
    pub payload: String,
    pub error: Option<String>,
    pub tags: BTreeSet<String>,
    pub stored_at: DateTime<Utc>,
    pub ttl: Duration,
    pub access_count: AtomicU64,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.stored_at);
        age.to_std().map(|age| age > self.ttl).unwrap_or(false)
    }
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    last_sweep: Option<DateTime<Utc>>,
}

/// Result cache with its own reader/writer lock
pub struct ResultCache {
    inner: RwLock<CacheInner>,
    ttl_secs: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(CacheInner::default()),
            ttl_secs: AtomicU64::new(ttl.as_secs()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// TTL applied to newly stored entries
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs.load(Ordering::Relaxed))
    }

    pub fn set_ttl(&self, ttl: Duration) {
        self.ttl_secs.store(ttl.as_secs(), Ordering::Relaxed);
    }

    /// Look up a cached payload. Expired entries count as misses.
    pub fn get(&self, tool_name: &str, args: &Arguments) -> Option<String> {
        let key = cache_key(tool_name, args);
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());

        match inner.entries.get(&key) {
            Some(entry) if !entry.is_expired(Utc::now()) => {
                entry.access_count.fetch_add(1, Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.payload.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a query result under its derived tags
    pub fn set(&self, tool_name: &str, args: &Arguments, payload: String) {
        let key = cache_key(tool_name, args);
        let entry = CacheEntry {
            key: key.clone(),
            payload,
            error: None,
            tags: derive_tags(tool_name, args),
            stored_at: Utc::now(),
            ttl: self.ttl(),
            access_count: AtomicU64::new(0),
        };

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.entries.insert(key, entry);
    }

    /// Remove every entry sharing a scoping tag with `tags`.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate(&self, tags: &BTreeSet<String>) -> usize {
        let scoping: Vec<&String> = tags.iter().filter(|t| is_scoping_tag(t)).collect();
        if scoping.is_empty() {
            return 0;
        }

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, entry| {
                !scoping
                    .iter()
                    .any(|tag| entry.tags.iter().any(|t| tag_matches(tag, t)))
            });
        let removed = before - inner.entries.len();
        drop(inner);

        if removed > 0 {
            self.invalidations.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, tags = ?scoping, "Invalidated cached results");
        }
        removed
    }

    /// Remove entries older than their TTL
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    /// Remove entries that are expired as of `now`
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        inner.last_sweep = Some(now);
        before - inner.entries.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status(&self) -> CacheStatus {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        CacheStatus {
            entries: inner.entries.len(),
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            invalidations: self.invalidations.load(Ordering::Relaxed),
            ttl_seconds: self.ttl().as_secs(),
            last_sweep: inner.last_sweep,
        }
    }
}
