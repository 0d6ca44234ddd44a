//! L1 Cache - In-Process Hot Tier
//!
//! Bounded per-region cache of encoded values. Entries expire a fixed time
//! after they were written, and once the entry count reaches the high
//! watermark the configured policy picks victims until the low watermark is
//! reached.
//!
//! # Design
//!
//! - `ShardedMap` with [`SHARD_COUNT`] shards for low lock contention
//! - Entries are shared as `Arc<CacheEntry>` so access tracking on a read is
//!   visible to the evictor
//! - Eviction is serialized by a single mutex; lookups never take it

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use super::entry::CacheEntry;
use super::policy::EvictionPolicy;
use super::shard::ShardedMap;
use super::SHARD_COUNT;
use crate::config::RegionSettings;

/// L1 configuration
#[derive(Debug, Clone)]
pub struct LocalConfig {
    /// Maximum number of entries
    pub capacity: usize,
    /// Time-to-live from write
    pub ttl: Duration,
    /// Eviction policy
    pub policy: EvictionPolicy,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            capacity: 5000,
            ttl: Duration::from_secs(120),
            policy: EvictionPolicy::default(),
        }
    }
}

impl From<&RegionSettings> for LocalConfig {
    fn from(settings: &RegionSettings) -> Self {
        Self {
            capacity: settings.l1_capacity,
            ttl: settings.l1_ttl,
            policy: EvictionPolicy::from_kind(settings.eviction),
        }
    }
}

/// L1 statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct LocalStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub evictions: u64,
    pub expirations: u64,
}

/// L1 cache
pub struct LocalCache {
    storage: ShardedMap<Arc<CacheEntry>>,
    config: LocalConfig,
    eviction_lock: Mutex<()>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl LocalCache {
    /// Create a new L1 cache
    pub fn new(config: LocalConfig) -> Self {
        Self {
            storage: ShardedMap::new(SHARD_COUNT),
            config,
            eviction_lock: Mutex::new(()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Get the encoded value for `key`
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let Some(entry) = self.storage.get(key) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if entry.is_expired() {
            // Only drop the entry we looked at; a concurrent writer may have replaced it
            if self
                .storage
                .remove_if(key, |current| Arc::ptr_eq(current, &entry))
                .is_some()
            {
                self.expirations.fetch_add(1, Ordering::Relaxed);
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        entry.record_access();
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.data().clone())
    }

    /// Check for a live entry without touching statistics
    pub fn contains(&self, key: &str) -> bool {
        self.storage
            .get(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false)
    }

    /// Insert or replace an entry
    pub fn put(&self, key: &str, data: Bytes) {
        if self.config.capacity == 0 {
            return;
        }

        let is_new = !self.storage.contains_key(key);
        if is_new && self.storage.len() >= self.config.policy.high_mark(self.config.capacity) {
            self.evict();
        }

        self.storage
            .insert(key.to_string(), Arc::new(CacheEntry::new(data, self.config.ttl)));

        // Concurrent inserts can race past the high mark; never stay above capacity
        if self.storage.len() > self.config.capacity {
            self.evict();
        }
    }

    /// Remove an entry, returning whether a live one was present
    pub fn remove(&self, key: &str) -> bool {
        self.storage
            .remove(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false)
    }

    /// Remove every entry whose key starts with `prefix`
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        self.storage.retain(|key, _| !key.starts_with(prefix))
    }

    /// Remove every entry
    pub fn clear(&self) -> usize {
        self.storage.clear()
    }

    /// Evict down to the low watermark
    ///
    /// Expired entries go first, then the highest policy scores.
    /// Returns the number of entries removed.
    pub fn evict(&self) -> usize {
        let _guard = self.eviction_lock.lock();

        let capacity = self.config.capacity;
        let len = self.storage.len();
        if len < self.config.policy.high_mark(capacity) && len <= capacity {
            return 0;
        }
        let target = self.config.policy.low_mark(capacity);
        let to_remove = len.saturating_sub(target);

        let mut candidates: Vec<(String, f64, Arc<CacheEntry>)> = self
            .storage
            .snapshot()
            .into_iter()
            .map(|(key, entry)| {
                let score = if entry.is_expired() {
                    f64::INFINITY
                } else {
                    self.config
                        .policy
                        .calculate_score(entry.metadata.idle(), entry.metadata.access_count())
                };
                (key, score, entry)
            })
            .collect();

        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut removed = 0;
        let mut expired = 0;
        for (key, score, entry) in candidates.into_iter().take(to_remove) {
            if self
                .storage
                .remove_if(&key, |current| Arc::ptr_eq(current, &entry))
                .is_some()
            {
                removed += 1;
                if score.is_infinite() {
                    expired += 1;
                }
            }
        }

        self.evictions
            .fetch_add((removed - expired) as u64, Ordering::Relaxed);
        self.expirations.fetch_add(expired as u64, Ordering::Relaxed);
        debug!(
            removed,
            expired,
            remaining = self.storage.len(),
            policy = %self.config.policy.name,
            "L1 eviction pass"
        );
        removed
    }

    /// Number of stored entries (may include entries not yet reaped)
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Configuration
    pub fn config(&self) -> &LocalConfig {
        &self.config
    }

    /// Hit ratio over all lookups
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Statistics snapshot
    pub fn stats(&self) -> LocalStats {
        LocalStats {
            entries: self.len(),
            capacity: self.config.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            hit_ratio: self.hit_ratio(),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
