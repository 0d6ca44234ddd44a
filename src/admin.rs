//! Administrative Surface
//!
//! Operations meant for operators rather than request handling: status,
//! manual warmup, destructive clears, and read-only leaderboard and counter
//! queries. Callers are responsible for authorization.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::cache::{RegionStats, TieredCacheRegistry};
use crate::error::{Error, Result};
use crate::ranking::{CounterStore, RankedMember, RankingStore};
use crate::warmup::{WarmupCoordinator, WarmupReport};

/// Cache status
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    /// Backend of the shared store, if any
    pub store: Option<&'static str>,
    /// Whether the shared store answered a ping
    pub store_reachable: bool,
    /// Presence of each well-known key
    pub keys: BTreeMap<String, bool>,
    /// Per-region statistics
    pub regions: Vec<RegionStats>,
}

/// Administrative operations
pub struct CacheAdmin {
    registry: Arc<TieredCacheRegistry>,
    coordinator: Arc<WarmupCoordinator>,
    rankings: Option<RankingStore>,
    counters: Option<CounterStore>,
}

impl CacheAdmin {
    pub fn new(coordinator: Arc<WarmupCoordinator>) -> Self {
        let registry = Arc::clone(coordinator.registry());
        let settings = Arc::new(registry.settings().clone());
        let (rankings, counters) = match registry.store() {
            Some(store) => (
                Some(RankingStore::new(Arc::clone(store), Arc::clone(&settings))),
                Some(CounterStore::new(Arc::clone(store), settings.counter_ttl)),
            ),
            None => (None, None),
        };
        Self {
            registry,
            coordinator,
            rankings,
            counters,
        }
    }

    fn rankings(&self) -> Result<&RankingStore> {
        self.rankings
            .as_ref()
            .ok_or_else(|| Error::l2_unavailable("no shared store configured"))
    }

    fn counters(&self) -> Result<&CounterStore> {
        self.counters
            .as_ref()
            .ok_or_else(|| Error::l2_unavailable("no shared store configured"))
    }

    /// Presence of the well-known keys plus region statistics
    pub async fn status(&self) -> Result<CacheStatus> {
        let mut keys = BTreeMap::new();
        let (store_name, reachable) = match self.registry.store() {
            Some(store) => {
                let reachable = store.ping().await.is_ok();
                for key in &self.registry.settings().status_keys {
                    let present = if reachable { store.exists(key).await? } else { false };
                    keys.insert(key.clone(), present);
                }
                (Some(store.name()), reachable)
            }
            None => {
                for key in &self.registry.settings().status_keys {
                    keys.insert(key.clone(), false);
                }
                (None, false)
            }
        };

        Ok(CacheStatus {
            store: store_name,
            store_reachable: reachable,
            keys,
            regions: self.registry.stats(),
        })
    }

    /// Run every warmup step now
    pub async fn warmup(&self) -> WarmupReport {
        self.coordinator.run_manual_warmup().await
    }

    /// Delete everything in the shared store and every L1
    pub async fn clear_all(&self) -> Result<usize> {
        let removed = self.coordinator.clear_all().await?;
        info!(removed, "Admin cleared all cache data");
        Ok(removed)
    }

    /// Delete every key starting with `prefix` in both tiers
    pub async fn clear_by_prefix(&self, prefix: &str) -> Result<usize> {
        let removed = self.registry.clear_by_prefix(prefix).await?;
        info!(prefix = %prefix, removed, "Admin cleared cache prefix");
        Ok(removed)
    }

    /// Current top `k` of a leaderboard; a cold leaderboard reads as empty
    pub async fn top_k(&self, ranking: &str, k: usize) -> Result<Vec<RankedMember>> {
        let top = self.rankings()?.peek(ranking, k).await?;
        if top.is_empty() {
            warn!(ranking = %ranking, "Ranking is empty or expired");
        }
        Ok(top)
    }

    /// Value of one counter
    pub async fn counter(&self, entity: &str, id: &str, counter: &str) -> Result<i64> {
        self.counters()?.get(entity, id, counter).await
    }

    /// Statistics of every region
    pub fn region_stats(&self) -> Vec<RegionStats> {
        self.registry.stats()
    }
}

// =============================================================================
// Tests
// =============================================================================
