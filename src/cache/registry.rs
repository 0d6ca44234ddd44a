//! Cache Region Registry
//!
//! Hands out one [`TieredCache`] per region name. The tier mode of a region
//! is decided once, when it is first requested: if the shared store answers
//! a ping the region is fully tiered, otherwise it runs L1-only for the rest
//! of its life.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use super::tiered::{EvictOutcome, RegionStats, RemoteTier, TieredCache};
use crate::config::CacheSettings;
use crate::error::{Error, Result};
use crate::store::KeyValueStore;

/// Registry of cache regions
pub struct TieredCacheRegistry {
    settings: CacheSettings,
    store: Option<Arc<dyn KeyValueStore>>,
    regions: DashMap<String, Arc<TieredCache>>,
}

impl TieredCacheRegistry {
    /// Registry whose regions use `store` as L2 when it is reachable
    pub fn new(settings: CacheSettings, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            settings,
            store: Some(store),
            regions: DashMap::new(),
        }
    }

    /// Registry with no shared store; every region is L1-only
    pub fn local_only(settings: CacheSettings) -> Self {
        Self {
            settings,
            store: None,
            regions: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Shared store, if one was configured
    pub fn store(&self) -> Option<&Arc<dyn KeyValueStore>> {
        self.store.as_ref()
    }

    /// Get the region named `name`, creating it on first use
    ///
    /// Concurrent first requests may both probe the store, but only one
    /// region instance is ever published.
    pub async fn cache_for(&self, name: &str) -> Arc<TieredCache> {
        if let Some(cache) = self.get(name) {
            return cache;
        }

        let settings = self.settings.region(name);
        let remote = self.resolve_remote(name, settings.store_timeout).await;

        let entry = self
            .regions
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(TieredCache::new(name, settings, remote)));
        Arc::clone(entry.value())
    }

    async fn resolve_remote(&self, name: &str, timeout: std::time::Duration) -> RemoteTier {
        let Some(store) = &self.store else {
            return RemoteTier::Disabled;
        };

        match tokio::time::timeout(timeout, store.ping()).await {
            Ok(Ok(())) => RemoteTier::Store(Arc::clone(store)),
            Ok(Err(e)) => {
                warn!(region = %name, error = %e, "Shared store unavailable, region falls back to L1 only");
                RemoteTier::Disabled
            }
            Err(_) => {
                warn!(region = %name, ?timeout, "Shared store ping timed out, region falls back to L1 only");
                RemoteTier::Disabled
            }
        }
    }

    /// Get an existing region without creating it
    pub fn get(&self, name: &str) -> Option<Arc<TieredCache>> {
        self.regions.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Names of all regions created so far, sorted
    pub fn region_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.regions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn regions(&self) -> Vec<Arc<TieredCache>> {
        self.regions.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Remove one key of one region from both tiers
    pub async fn evict(&self, region: &str, key: &str) -> EvictOutcome {
        self.cache_for(region).await.evict(key).await
    }

    /// Remove every entry whose store key starts with `prefix`
    ///
    /// Local entries of every region are dropped first; then the shared store
    /// is swept. Returns the number of shared-store keys removed.
    pub async fn clear_by_prefix(&self, prefix: &str) -> Result<usize> {
        if prefix.is_empty() {
            return Err(Error::Config(
                "refusing to clear an empty prefix; use clear_all".to_string(),
            ));
        }

        let local: usize = self
            .regions()
            .iter()
            .map(|cache| cache.clear_local_prefix(prefix))
            .sum();

        let remote = match &self.store {
            Some(store) => store.delete_by_prefix(prefix).await?,
            None => 0,
        };

        info!(prefix = %prefix, local, remote, "Cleared by prefix");
        Ok(remote)
    }

    /// Empty one region in both tiers
    pub async fn clear_region(&self, name: &str) -> Result<usize> {
        self.cache_for(name).await.clear().await
    }

    /// Empty every region's L1, then the entire shared store
    ///
    /// The shared store may hold keys owned by other processes; this removes
    /// them too.
    pub async fn clear_all(&self) -> Result<usize> {
        let local: usize = self.regions().iter().map(|cache| cache.clear_local()).sum();

        let remote = match &self.store {
            Some(store) => store.delete_by_prefix("").await?,
            None => 0,
        };

        warn!(local, remote, "Cleared all cache data");
        Ok(remote)
    }

    /// Statistics of every region, sorted by name
    pub fn stats(&self) -> Vec<RegionStats> {
        let mut stats: Vec<RegionStats> = self.regions().iter().map(|c| c.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TierMode;
    use crate::store::InMemoryStore;
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn registry(store: &Arc<InMemoryStore>) -> TieredCacheRegistry {
        TieredCacheRegistry::new(CacheSettings::default(), store.clone() as Arc<dyn KeyValueStore>)
    }

    #[tokio::test]
    async fn test_same_region_same_instance() {
        let store = Arc::new(InMemoryStore::new());
        let registry = registry(&store);

        let a = registry.cache_for("posts").await;
        let b = registry.cache_for("posts").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.mode(), TierMode::FullTiered);
        assert_eq!(registry.region_names(), vec!["posts".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_creation_yields_one_instance() {
        let store = Arc::new(InMemoryStore::new());
        let registry = Arc::new(registry(&store));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.cache_for("tags").await })
            })
            .collect();

        let mut caches = Vec::new();
        for handle in handles {
            caches.push(handle.await.unwrap());
        }
        assert!(caches.iter().all(|c| Arc::ptr_eq(c, &caches[0])));
    }

    #[tokio::test]
    async fn test_unreachable_store_means_l1_only() {
        let store = Arc::new(InMemoryStore::new());
        store.set_unavailable(true);
        let registry = registry(&store);

        let cache = registry.cache_for("posts").await;
        assert_eq!(cache.mode(), TierMode::L1Only);

        // Mode is fixed even after the store recovers
        store.set_unavailable(false);
        assert_eq!(registry.cache_for("posts").await.mode(), TierMode::L1Only);
        assert_eq!(registry.cache_for("users").await.mode(), TierMode::FullTiered);
    }

    #[tokio::test]
    async fn test_local_only_registry() {
        let registry = TieredCacheRegistry::local_only(CacheSettings::default());
        assert!(registry.store().is_none());
        assert_eq!(registry.cache_for("posts").await.mode(), TierMode::L1Only);
        assert_eq!(registry.clear_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clear_by_prefix_spans_tiers() {
        let store = Arc::new(InMemoryStore::new());
        let registry = registry(&store);
        let posts = registry.cache_for("posts").await;

        posts.put("page:0:10", &vec![1, 2]).await.unwrap();
        posts.put("page:1:10", &vec![3]).await.unwrap();
        posts.put("42", &"keep").await.unwrap();
        store
            .set("posts::page:9:10", bytes::Bytes::from_static(b"[]"), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(registry.clear_by_prefix("posts::page:").await.unwrap(), 3);
        assert_eq!(posts.get::<Vec<u32>>("page:0:10").await, None);
        assert_eq!(posts.get::<String>("42").await, Some("keep".to_string()));

        assert_matches!(registry.clear_by_prefix("").await, Err(Error::Config(_)));
    }

    #[tokio::test]
    async fn test_evict_through_registry() {
        let store = Arc::new(InMemoryStore::new());
        let registry = registry(&store);
        registry.cache_for("posts").await.put("1", &1u32).await.unwrap();

        let outcome = registry.evict("posts", "1").await;
        assert!(outcome.l1_removed && outcome.l2_removed);
    }

    #[tokio::test]
    async fn test_clear_all_and_stats() {
        let store = Arc::new(InMemoryStore::new());
        let registry = registry(&store);
        registry.cache_for("b").await.put("1", &1u32).await.unwrap();
        registry.cache_for("a").await.put("1", &1u32).await.unwrap();
        store
            .set("foreign", bytes::Bytes::from_static(b"x"), Duration::from_secs(60))
            .await
            .unwrap();

        let stats = registry.stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].name, "a");

        assert_eq!(registry.clear_all().await.unwrap(), 3);
        assert!(!store.exists("foreign").await.unwrap());
        assert_eq!(registry.cache_for("a").await.get::<u32>("1").await, None);
    }
}
