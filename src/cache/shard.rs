//! Sharded Concurrent Map
//!
//! String-keyed map split into a power-of-two number of shards, each behind
//! its own `parking_lot::RwLock`. Readers of different shards never contend
//! and a writer only blocks its own shard.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use parking_lot::RwLock;

/// Sharded map keyed by string
pub struct ShardedMap<V> {
    shards: Box<[RwLock<HashMap<String, V>>]>,
    mask: usize,
}

impl<V: Clone> ShardedMap<V> {
    /// Create a map with `shards` shards (rounded up to a power of two)
    pub fn new(shards: usize) -> Self {
        let count = shards.max(1).next_power_of_two();
        let shards = (0..count)
            .map(|_| RwLock::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            mask: count - 1,
        }
    }

    #[inline]
    fn shard(&self, key: &str) -> &RwLock<HashMap<String, V>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize & self.mask]
    }

    /// Get a clone of the value for `key`
    pub fn get(&self, key: &str) -> Option<V> {
        self.shard(key).read().get(key).cloned()
    }

    /// Check whether `key` is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.shard(key).read().contains_key(key)
    }

    /// Insert a value, returning the previous one
    pub fn insert(&self, key: String, value: V) -> Option<V> {
        self.shard(&key).write().insert(key, value)
    }

    /// Remove a key
    pub fn remove(&self, key: &str) -> Option<V> {
        self.shard(key).write().remove(key)
    }

    /// Remove a key only while `predicate` holds for its current value
    pub fn remove_if(&self, key: &str, predicate: impl FnOnce(&V) -> bool) -> Option<V> {
        let mut shard = self.shard(key).write();
        match shard.get(key) {
            Some(value) if predicate(value) => shard.remove(key),
            _ => None,
        }
    }

    /// Keep only entries for which `keep` returns true, returning the count removed
    pub fn retain(&self, mut keep: impl FnMut(&str, &V) -> bool) -> usize {
        let mut removed = 0;
        for shard in self.shards.iter() {
            let mut shard = shard.write();
            let before = shard.len();
            shard.retain(|k, v| keep(k, v));
            removed += before - shard.len();
        }
        removed
    }

    /// Clone every entry out of the map, one shard at a time
    pub fn snapshot(&self) -> Vec<(String, V)> {
        let mut entries = Vec::with_capacity(self.len());
        for shard in self.shards.iter() {
            let shard = shard.read();
            entries.extend(shard.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        entries
    }

    /// Total entries across all shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }

    /// Remove every entry, returning the count removed
    pub fn clear(&self) -> usize {
        self.shards
            .iter()
            .map(|s| {
                let mut shard = s.write();
                let n = shard.len();
                shard.clear();
                n
            })
            .sum()
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
