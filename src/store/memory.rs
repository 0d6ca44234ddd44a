//! In-process store
//!
//! Redis-compatible semantics over a DashMap: lazy TTL expiry, integer
//! counters stored as decimal strings, sorted sets, WRONGTYPE errors.
//! Used by tests and by single-instance deployments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::KeyValueStore;
use crate::error::{Error, Result};

const WRONG_TYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

#[derive(Debug, Clone)]
enum StoredValue {
    Bytes(Bytes),
    Sorted(HashMap<String, f64>),
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn new(value: StoredValue) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }
}

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Live keys
    pub keys: usize,
    /// Read operations
    pub reads: u64,
    /// Write operations
    pub writes: u64,
    /// Delete operations
    pub deletes: u64,
}

/// In-memory store
#[derive(Default)]
pub struct InMemoryStore {
    entries: DashMap<String, StoredEntry>,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every operation fails with `TierUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Get statistics
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            keys: self.entries.iter().filter(|e| !e.is_expired()).count(),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::l2_unavailable("in-memory store marked unavailable"));
        }
        Ok(())
    }

    fn record_read(&self) -> Result<()> {
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn record_write(&self) -> Result<()> {
        self.check_available()?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn record_delete(&self) -> Result<()> {
        self.check_available()?;
        self.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Clone out a live entry, dropping it if it has expired
    fn live(&self, key: &str) -> Option<StoredEntry> {
        let entry = self.entries.get(key).map(|e| e.clone())?;
        if entry.is_expired() {
            self.entries.remove_if(key, |_, e| e.is_expired());
            return None;
        }
        Some(entry)
    }

    /// Sorted set members of a live key, highest score first
    fn sorted_members(&self, key: &str) -> Result<Vec<(String, f64)>> {
        match self.live(key) {
            None => Ok(Vec::new()),
            Some(StoredEntry {
                value: StoredValue::Sorted(members),
                ..
            }) => {
                let mut members: Vec<(String, f64)> = members.into_iter().collect();
                // Equal scores fall back to reverse lexicographic order, as ZREVRANGE does
                members.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| b.0.cmp(&a.0))
                });
                Ok(members)
            }
            Some(_) => Err(Error::Store(WRONG_TYPE.to_string())),
        }
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.record_read()?;
        match self.live(key) {
            None => Ok(None),
            Some(StoredEntry {
                value: StoredValue::Bytes(data),
                ..
            }) => Ok(Some(data)),
            Some(_) => Err(Error::Store(WRONG_TYPE.to_string())),
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.record_write()?;
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                value: StoredValue::Bytes(value),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.record_delete()?;
        Ok(self
            .entries
            .remove(key)
            .map(|(_, e)| !e.is_expired())
            .unwrap_or(false))
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<usize> {
        self.record_delete()?;
        let mut removed = 0;
        self.entries.retain(|key, entry| {
            if key.starts_with(prefix) {
                if !entry.is_expired() {
                    removed += 1;
                }
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.record_read()?;
        Ok(self.live(key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.record_write()?;
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired() => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64> {
        self.record_write()?;
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoredEntry::new(StoredValue::Bytes(Bytes::from_static(b"0"))));
        if entry.is_expired() {
            *entry = StoredEntry::new(StoredValue::Bytes(Bytes::from_static(b"0")));
        }

        let current = match &entry.value {
            StoredValue::Bytes(data) => std::str::from_utf8(data)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| {
                    Error::Store("ERR value is not an integer or out of range".to_string())
                })?,
            StoredValue::Sorted(_) => return Err(Error::Store(WRONG_TYPE.to_string())),
        };

        let updated = current
            .checked_add(delta)
            .ok_or_else(|| Error::Store("ERR increment or decrement would overflow".to_string()))?;
        entry.value = StoredValue::Bytes(Bytes::from(updated.to_string()));
        Ok(updated)
    }

    async fn zincr_by(&self, key: &str, member: &str, delta: f64) -> Result<f64> {
        self.record_write()?;
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoredEntry::new(StoredValue::Sorted(HashMap::new())));
        if entry.is_expired() {
            *entry = StoredEntry::new(StoredValue::Sorted(HashMap::new()));
        }

        match &mut entry.value {
            StoredValue::Sorted(members) => {
                let score = members.entry(member.to_string()).or_insert(0.0);
                *score += delta;
                Ok(*score)
            }
            StoredValue::Bytes(_) => Err(Error::Store(WRONG_TYPE.to_string())),
        }
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        self.record_write()?;
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoredEntry::new(StoredValue::Sorted(HashMap::new())));
        if entry.is_expired() {
            *entry = StoredEntry::new(StoredValue::Sorted(HashMap::new()));
        }

        match &mut entry.value {
            StoredValue::Sorted(members) => {
                members.insert(member.to_string(), score);
                Ok(())
            }
            StoredValue::Bytes(_) => Err(Error::Store(WRONG_TYPE.to_string())),
        }
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        self.record_read()?;
        match self.live(key) {
            None => Ok(None),
            Some(StoredEntry {
                value: StoredValue::Sorted(members),
                ..
            }) => Ok(members.get(member).copied()),
            Some(_) => Err(Error::Store(WRONG_TYPE.to_string())),
        }
    }

    async fn zrev_range_top_k(&self, key: &str, k: usize) -> Result<Vec<(String, f64)>> {
        self.record_read()?;
        let mut members = self.sorted_members(key)?;
        members.truncate(k);
        Ok(members)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.record_read()?;
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix) && !e.value().is_expired())
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// =============================================================================
// Tests
// =============================================================================
