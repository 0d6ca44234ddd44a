//! Tiered Cache
//!
//! One named region backed by an in-process L1 and, when reachable, the
//! shared L2 store. Both tiers hold the same JSON-encoded bytes under the
//! key `<region>::<key>`.
//!
//! # Read Path
//!
//! ```text
//! L1 hit  -> return
//! L1 miss -> L2 hit  -> back-fill L1 -> return
//!            L2 miss -> single-flight loader -> write L1 then L2 -> return
//! ```
//!
//! L2 failures on the read path degrade to a miss. A value that does not
//! decode as the requested type is a miss; bytes that are not JSON at all
//! are also removed from both tiers.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::flight::{self, FlightFailure, Role, SingleFlight};
use super::local::{LocalCache, LocalConfig, LocalStats};
use super::metrics::{LatencyTracker, MetricsSnapshot, RegionMetrics};
use crate::config::RegionSettings;
use crate::error::{Error, Result};
use crate::store::{region_key, region_prefix, KeyValueStore};

/// Tiers a region operates with, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierMode {
    /// L1 in front of the shared store
    FullTiered,
    /// Process-local only
    L1Only,
}

impl std::fmt::Display for TierMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TierMode::FullTiered => write!(f, "full-tiered"),
            TierMode::L1Only => write!(f, "l1-only"),
        }
    }
}

/// Second tier of a region
#[derive(Clone)]
pub enum RemoteTier {
    /// Shared store is available
    Store(Arc<dyn KeyValueStore>),
    /// No shared store
    Disabled,
}

impl RemoteTier {
    pub fn mode(&self) -> TierMode {
        match self {
            RemoteTier::Store(_) => TierMode::FullTiered,
            RemoteTier::Disabled => TierMode::L1Only,
        }
    }
}

/// Warmth of a region's L1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionState {
    /// Nothing cached locally
    Cold,
    /// A warmup step is populating the region
    Warming,
    /// Holding entries
    Warm,
}

/// Result of evicting one key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvictOutcome {
    /// A live L1 entry was removed
    pub l1_removed: bool,
    /// An L2 entry was removed
    pub l2_removed: bool,
    /// L2 could not be reached; the entry may still be present there
    pub l2_failed: bool,
}

/// Region statistics
#[derive(Debug, Clone, Serialize)]
pub struct RegionStats {
    pub name: String,
    pub mode: TierMode,
    pub state: RegionState,
    pub in_flight: usize,
    pub local: LocalStats,
    pub metrics: MetricsSnapshot,
}

/// Marks a region as warming while held
pub struct WarmingGuard {
    cache: Arc<TieredCache>,
}

impl Drop for WarmingGuard {
    fn drop(&mut self) {
        self.cache.warming.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Two-tier cache for one region
pub struct TieredCache {
    name: String,
    settings: RegionSettings,
    l1: LocalCache,
    remote: RemoteTier,
    flights: SingleFlight,
    metrics: RegionMetrics,
    warming: AtomicUsize,
}

fn encode<T: Serialize>(value: &T) -> serde_json::Result<Bytes> {
    serde_json::to_vec(value).map(Bytes::from)
}

impl TieredCache {
    /// Create a region
    pub fn new(name: impl Into<String>, settings: RegionSettings, remote: RemoteTier) -> Self {
        let name = name.into();
        info!(
            region = %name,
            mode = %remote.mode(),
            l1_capacity = settings.l1_capacity,
            "Creating cache region"
        );
        Self {
            l1: LocalCache::new(LocalConfig::from(&settings)),
            name,
            settings,
            remote,
            flights: SingleFlight::new(),
            metrics: RegionMetrics::new(),
            warming: AtomicUsize::new(0),
        }
    }

    /// Region name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> TierMode {
        self.remote.mode()
    }

    pub fn settings(&self) -> &RegionSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &RegionMetrics {
        &self.metrics
    }

    /// Store key of `key` in this region
    pub fn store_key(&self, key: &str) -> String {
        region_key(&self.name, key)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Look up `key` in L1 then L2; a miss in both returns `None`
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let full = self.store_key(key);
        let bytes = self.lookup(&full).await?;
        self.decode_or_discard(&full, &bytes).await
    }

    /// Check whether `key` is cached in either tier
    pub async fn contains(&self, key: &str) -> bool {
        let full = self.store_key(key);
        if self.l1.contains(&full) {
            return true;
        }
        match &self.remote {
            RemoteTier::Store(store) => self
                .remote_call("exists", store.exists(&full))
                .await
                .unwrap_or(false),
            RemoteTier::Disabled => false,
        }
    }

    /// Read-through lookup using the region's load timeout
    pub async fn get_or_load<T, F, Fut, E>(&self, key: &str, loader: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
        E: Display,
    {
        self.get_or_load_with_timeout(key, self.settings.load_timeout, loader)
            .await
    }

    /// Read-through lookup
    ///
    /// On a miss in both tiers, exactly one concurrent caller runs `loader`;
    /// the others wait for its outcome. A present value is written to L1 and
    /// then L2. An absent value is not cached. Errors and timeouts are
    /// delivered to every waiter and nothing is cached.
    pub async fn get_or_load_with_timeout<T, F, Fut, E>(
        &self,
        key: &str,
        timeout: Duration,
        loader: F,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
        E: Display,
    {
        let full = self.store_key(key);

        if let Some(bytes) = self.lookup(&full).await {
            if let Some(value) = self.decode_or_discard(&full, &bytes).await {
                return Ok(Some(value));
            }
        }

        let guard = match self.flights.join(&full) {
            Role::Follower(rx) => {
                self.metrics.record_coalesced_wait();
                debug!(region = %self.name, key = %key, "Waiting for in-flight load");
                return match tokio::time::timeout(timeout, flight::wait(rx)).await {
                    Ok(Ok(Some(bytes))) => Ok(Some(serde_json::from_slice(&bytes)?)),
                    Ok(Ok(None)) => Ok(None),
                    Ok(Err(failure)) => Err(self.flight_error(key, failure)),
                    Err(_) => {
                        self.metrics.record_load_timeout();
                        Err(self.flight_error(key, FlightFailure::Timeout(timeout)))
                    }
                };
            }
            Role::Leader(guard) => guard,
        };

        // A previous leader may have finished between our lookup and join
        if let Some(bytes) = self.l1.get(&full) {
            if let Ok(value) = serde_json::from_slice::<T>(&bytes) {
                guard.complete(Ok(Some(bytes)));
                return Ok(Some(value));
            }
        }

        let tracker = LatencyTracker::start();
        let outcome = tokio::time::timeout(timeout, loader()).await;

        let failure = match outcome {
            Ok(Ok(Some(value))) => {
                self.metrics.record_load(tracker.elapsed());
                match encode(&value) {
                    Ok(bytes) => {
                        self.write_through(&full, bytes.clone()).await;
                        guard.complete(Ok(Some(bytes)));
                        return Ok(Some(value));
                    }
                    Err(e) => FlightFailure::Load(format!("failed to encode value: {}", e)),
                }
            }
            Ok(Ok(None)) => {
                self.metrics.record_load(tracker.elapsed());
                debug!(region = %self.name, key = %key, "Loader found no value");
                guard.complete(Ok(None));
                return Ok(None);
            }
            Ok(Err(e)) => FlightFailure::Load(e.to_string()),
            Err(_) => {
                self.metrics.record_load_timeout();
                FlightFailure::Timeout(timeout)
            }
        };

        self.metrics.record_load_failure();
        warn!(region = %self.name, key = %key, error = ?failure, "Load failed");
        guard.complete(Err(failure.clone()));
        Err(self.flight_error(key, failure))
    }

    /// L1 then L2, back-filling L1 on an L2 hit
    async fn lookup(&self, full: &str) -> Option<Bytes> {
        if let Some(bytes) = self.l1.get(full) {
            return Some(bytes);
        }

        let RemoteTier::Store(store) = &self.remote else {
            return None;
        };

        let tracker = LatencyTracker::start();
        match self.remote_call("get", store.get(full)).await {
            Ok(Some(bytes)) => {
                self.metrics.record_l2_read_latency(tracker.elapsed());
                self.metrics.record_l2_hit();
                self.metrics.record_backfill();
                self.l1.put(full, bytes.clone());
                Some(bytes)
            }
            Ok(None) => {
                self.metrics.record_l2_read_latency(tracker.elapsed());
                self.metrics.record_l2_miss();
                None
            }
            Err(e) => {
                self.metrics.record_l2_error();
                warn!(region = %self.name, key = %full, error = %e, "L2 read failed, treating as miss");
                None
            }
        }
    }

    /// Decode, removing the entry from both tiers if it is not JSON
    async fn decode_or_discard<T: DeserializeOwned>(&self, full: &str, bytes: &Bytes) -> Option<T> {
        match serde_json::from_slice(bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                self.metrics.record_decode_failure();
                // Valid JSON of another shape belongs to some other reader
                if serde_json::from_slice::<serde_json::Value>(bytes).is_ok() {
                    debug!(region = %self.name, key = %full, error = %e, "Entry does not match requested type");
                    return None;
                }
                warn!(region = %self.name, key = %full, error = %e, "Discarding undecodable entry");
                self.evict_full(full).await;
                None
            }
        }
    }

    fn flight_error(&self, key: &str, failure: FlightFailure) -> Error {
        match failure {
            FlightFailure::Load(reason) => Error::LoadFailed {
                key: self.store_key(key),
                reason,
            },
            FlightFailure::Timeout(after) => Error::Timeout {
                operation: format!("load {}", self.store_key(key)),
                after,
            },
            FlightFailure::Cancelled => Error::LoadFailed {
                key: self.store_key(key),
                reason: "load was cancelled".to_string(),
            },
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Write `value` to L1 then L2
    ///
    /// Fails only if the value cannot be encoded. An unreachable L2 is logged
    /// and the value stays in L1.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = encode(value)?;
        self.write_through(&self.store_key(key), bytes).await;
        Ok(())
    }

    async fn write_through(&self, full: &str, bytes: Bytes) {
        self.metrics.record_write();
        self.l1.put(full, bytes.clone());

        if let RemoteTier::Store(store) = &self.remote {
            let tracker = LatencyTracker::start();
            match self
                .remote_call("set", store.set(full, bytes, self.settings.l2_ttl))
                .await
            {
                Ok(()) => self.metrics.record_l2_write_latency(tracker.elapsed()),
                Err(e) => {
                    self.metrics.record_l2_error();
                    warn!(region = %self.name, key = %full, error = %e, "L2 write failed, value kept in L1 only");
                }
            }
        }
    }

    /// Remove `key` from L1 then L2
    ///
    /// A failed L2 delete is retried once, then reported in the outcome.
    pub async fn evict(&self, key: &str) -> EvictOutcome {
        self.evict_full(&self.store_key(key)).await
    }

    async fn evict_full(&self, full: &str) -> EvictOutcome {
        self.metrics.record_eviction();
        let mut outcome = EvictOutcome {
            l1_removed: self.l1.remove(full),
            ..EvictOutcome::default()
        };

        if let RemoteTier::Store(store) = &self.remote {
            let mut attempt = self.remote_call("delete", store.delete(full)).await;
            if attempt.is_err() {
                attempt = self.remote_call("delete", store.delete(full)).await;
            }
            match attempt {
                Ok(removed) => outcome.l2_removed = removed,
                Err(e) => {
                    self.metrics.record_l2_error();
                    outcome.l2_failed = true;
                    warn!(region = %self.name, key = %full, error = %e, "L2 delete failed, entry may be stale until it expires");
                }
            }
        }

        debug!(region = %self.name, key = %full, ?outcome, "Evicted");
        outcome
    }

    /// Empty the region in both tiers, returning the number of L2 keys removed
    ///
    /// L1 is always cleared; an L2 failure is returned after that.
    pub async fn clear(&self) -> Result<usize> {
        let local = self.l1.clear();
        let remote = match &self.remote {
            RemoteTier::Store(store) => {
                self.remote_call("delete_by_prefix", store.delete_by_prefix(&region_prefix(&self.name)))
                    .await?
            }
            RemoteTier::Disabled => 0,
        };
        info!(region = %self.name, local, remote, "Cleared region");
        Ok(remote)
    }

    /// Drop L1 entries whose store key starts with `prefix`
    pub fn clear_local_prefix(&self, prefix: &str) -> usize {
        self.l1.remove_prefix(prefix)
    }

    /// Drop every L1 entry
    pub fn clear_local(&self) -> usize {
        self.l1.clear()
    }

    // =========================================================================
    // State
    // =========================================================================

    pub fn state(&self) -> RegionState {
        if self.warming.load(Ordering::Acquire) > 0 {
            RegionState::Warming
        } else if self.l1.is_empty() {
            RegionState::Cold
        } else {
            RegionState::Warm
        }
    }

    /// Mark the region as warming until the guard is dropped
    pub fn begin_warming(self: &Arc<Self>) -> WarmingGuard {
        self.warming.fetch_add(1, Ordering::AcqRel);
        WarmingGuard {
            cache: Arc::clone(self),
        }
    }

    pub fn stats(&self) -> RegionStats {
        RegionStats {
            name: self.name.clone(),
            mode: self.mode(),
            state: self.state(),
            in_flight: self.flights.len(),
            local: self.l1.stats(),
            metrics: self.metrics.snapshot(),
        }
    }

    /// Bound a store call by the region's store timeout
    async fn remote_call<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.settings.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation: format!("store {}", operation),
                after: self.settings.store_timeout,
            }),
        }
    }
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("name", &self.name)
            .field("mode", &self.mode())
            .field("entries", &self.l1.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
