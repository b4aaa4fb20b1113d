//! TTL- and size-bounded in-memory cache store
//!
//! Entries expire lazily: a read past the TTL deletes the entry and reports
//! a miss. A periodic sweep (driven by the adapter's background task) purges
//! expired entries that are never read again. When the store grows past
//! `max_size`, an eviction pass trims it down to `floor(max_size * 0.8)`,
//! removing lowest-score entries first where
//! `score = last_accessed_ms + access_count * 1000` — a deliberately simple
//! recency+frequency hybrid, not strict LRU.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A single cached response
#[derive(Debug, Clone)]
struct CacheEntry {
    data: serde_json::Value,
    stored_at: Instant,
    ttl: Duration,
    last_accessed: Instant,
    access_count: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) > self.ttl
    }
}

/// Counters describing cache effectiveness
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired: u64,
    pub hit_rate: f64,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    default_ttl: Duration,
    max_size: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    expired: u64,
}

/// Thread-safe cache store keyed by derived operation keys.
pub struct CacheStore {
    inner: Mutex<CacheInner>,
}

impl CacheStore {
    /// Create a store with the given default TTL and size bound
    pub fn new(default_ttl: Duration, max_size: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                default_ttl,
                max_size,
                hits: 0,
                misses: 0,
                evictions: 0,
                expired: 0,
            }),
        }
    }

    /// Replace the TTL and size bound (applied to subsequent writes)
    pub fn reconfigure(&self, default_ttl: Duration, max_size: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.default_ttl = default_ttl;
        inner.max_size = max_size;
    }

    /// Look up a key. Expired entries are deleted on detection and count
    /// as misses.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();

        let expired = matches!(inner.entries.get(key), Some(entry) if entry.is_expired(now));
        if expired {
            inner.entries.remove(key);
            inner.expired += 1;
        }

        let data = if expired {
            None
        } else if let Some(entry) = inner.entries.get_mut(key) {
            entry.last_accessed = now;
            entry.access_count += 1;
            Some(entry.data.clone())
        } else {
            None
        };

        match data {
            Some(data) => {
                inner.hits += 1;
                Some(data)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Store a value under the configured default TTL, evicting if the
    /// store grows past its size bound.
    pub fn set(&self, key: &str, data: serde_json::Value) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let ttl = inner.default_ttl;

        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                data,
                stored_at: now,
                ttl,
                last_accessed: now,
                access_count: 0,
            },
        );

        if inner.entries.len() > inner.max_size {
            let target = (inner.max_size as f64 * 0.8).floor() as usize;
            let removed = Self::evict_to(&mut inner, target);
            tracing::debug!(removed, target, "cache eviction pass");
        }
    }

    /// Remove expired entries without requiring a read. Returns the number
    /// purged. Called by the adapter's background sweep.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        let purged = before - inner.entries.len();
        inner.expired += purged as u64;
        purged
    }

    /// Drop every entry
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    /// Check if the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of effectiveness counters
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        let total = inner.hits + inner.misses;
        CacheStats {
            entries: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expired: inner.expired,
            hit_rate: if total > 0 {
                inner.hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    /// Evict lowest-score entries until exactly `target` remain.
    fn evict_to(inner: &mut CacheInner, target: usize) -> usize {
        let excess = inner.entries.len().saturating_sub(target);
        if excess == 0 {
            return 0;
        }

        // Snapshot scores, then remove the `excess` lowest. The epoch-based
        // recency term keeps the arithmetic in plain u64 millis.
        let epoch = inner
            .entries
            .values()
            .map(|e| e.last_accessed)
            .min()
            .unwrap_or_else(Instant::now);

        let mut scored: Vec<(String, u64)> = inner
            .entries
            .iter()
            .map(|(key, entry)| {
                let recency_ms = entry.last_accessed.duration_since(epoch).as_millis() as u64;
                (key.clone(), recency_ms + entry.access_count * 1000)
            })
            .collect();
        scored.sort_by_key(|(_, score)| *score);

        for (key, _) in scored.into_iter().take(excess) {
            inner.entries.remove(&key);
            inner.evictions += 1;
        }
        excess
    }
}
