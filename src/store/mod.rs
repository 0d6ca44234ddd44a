//! Shared Key-Value Store (L2)
//!
//! The store is the durable, cross-instance tier. Everything that is not a
//! plain key/value cache entry (counters, leaderboards) lives here directly.
//!
//! # Key Layout
//!
//! ```text
//! <region>::<key>                  tiered cache entries
//! <ranking-name>                   leaderboard sorted sets
//! <entity>:<id>:<counter-name>     raw counters
//! ```
//!
//! The layout is the wire contract with every other process sharing the
//! store, so it must not change.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

mod memory;
mod remote;

pub use self::memory::{InMemoryStore, StoreStats};
pub use self::remote::RedisStore;

/// Separator between region name and logical key
pub const REGION_SEPARATOR: &str = "::";

/// Build the store key of a tiered cache entry
pub fn region_key(region: &str, key: &str) -> String {
    format!("{}{}{}", region, REGION_SEPARATOR, key)
}

/// Prefix shared by every entry of a region
pub fn region_prefix(region: &str) -> String {
    format!("{}{}", region, REGION_SEPARATOR)
}

/// Build the store key of a raw counter
pub fn counter_key(entity: &str, id: &str, counter: &str) -> String {
    format!("{}:{}:{}", entity, id, counter)
}

/// Shared store contract
///
/// Implementations provide their own concurrency control; callers issue
/// independent requests without client-side locking.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a value
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Set a value with a time-to-live
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    /// Delete a key, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete every key starting with `prefix`, returning the count removed
    async fn delete_by_prefix(&self, prefix: &str) -> Result<usize> {
        let keys = self.keys_with_prefix(prefix).await?;
        let mut removed = 0;
        for key in keys {
            if self.delete(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Check whether a key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Reset the time-to-live of an existing key
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Atomically add `delta` to an integer key (missing keys start at 0)
    async fn increment(&self, key: &str, delta: i64) -> Result<i64>;

    /// Atomically add `delta` to a sorted-set member's score
    async fn zincr_by(&self, key: &str, member: &str, delta: f64) -> Result<f64>;

    /// Set a sorted-set member's score
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;

    /// Score of a sorted-set member
    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>>;

    /// Up to `k` members with the highest scores, highest first
    async fn zrev_range_top_k(&self, key: &str, k: usize) -> Result<Vec<(String, f64)>>;

    /// Every key starting with `prefix` (an empty prefix matches all keys)
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Connectivity probe
    async fn ping(&self) -> Result<()>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

// =============================================================================
// Tests
// =============================================================================
