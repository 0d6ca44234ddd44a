//! Counters and Hot-Item Tracking
//!
//! A counter (`<entity>:<id>:<counter>`) is the source of truth for one
//! item's count. [`HotItemTracker`] bumps the counter and then mirrors the
//! new value into a leaderboard, which is only an index over the counters
//! and may briefly lag them.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::leaderboard::{RankedMember, RankingStore};
use crate::config::{CacheSettings, HOT_POSTS, POPULAR_TAGS};
use crate::error::{Error, Result};
use crate::store::{counter_key, KeyValueStore};

/// Integer counters in the shared store
#[derive(Clone)]
pub struct CounterStore {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl CounterStore {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Add `delta` to a counter and refresh its TTL, returning the new value
    pub async fn increment(&self, entity: &str, id: &str, counter: &str, delta: i64) -> Result<i64> {
        let key = counter_key(entity, id, counter);
        let value = self.store.increment(&key, delta).await?;
        self.store.expire(&key, self.ttl).await?;
        Ok(value)
    }

    /// Current value; a missing counter reads as zero
    pub async fn get(&self, entity: &str, id: &str, counter: &str) -> Result<i64> {
        let key = counter_key(entity, id, counter);
        match self.store.get(&key).await? {
            None => Ok(0),
            Some(raw) => std::str::from_utf8(&raw)
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .ok_or_else(|| Error::Store(format!("counter {} is not an integer", key))),
        }
    }

    /// Delete a counter
    pub async fn remove(&self, entity: &str, id: &str, counter: &str) -> Result<bool> {
        self.store.delete(&counter_key(entity, id, counter)).await
    }
}

/// Counter mirrored into a leaderboard
#[derive(Clone)]
pub struct HotItemTracker {
    counters: CounterStore,
    rankings: RankingStore,
    entity: String,
    counter: String,
    ranking: String,
}

impl HotItemTracker {
    pub fn new(
        counters: CounterStore,
        rankings: RankingStore,
        entity: impl Into<String>,
        counter: impl Into<String>,
        ranking: impl Into<String>,
    ) -> Self {
        Self {
            counters,
            rankings,
            entity: entity.into(),
            counter: counter.into(),
            ranking: ranking.into(),
        }
    }

    /// Post views feeding the hot posts leaderboard
    pub fn post_views(store: Arc<dyn KeyValueStore>, settings: Arc<CacheSettings>) -> Self {
        Self::new(
            CounterStore::new(Arc::clone(&store), settings.counter_ttl),
            RankingStore::new(store, settings),
            "post",
            "views",
            HOT_POSTS,
        )
    }

    /// Tag usage feeding the popular tags leaderboard
    pub fn tag_usage(store: Arc<dyn KeyValueStore>, settings: Arc<CacheSettings>) -> Self {
        Self::new(
            CounterStore::new(Arc::clone(&store), settings.counter_ttl),
            RankingStore::new(store, settings),
            "tag",
            "usage",
            POPULAR_TAGS,
        )
    }

    pub fn ranking(&self) -> &str {
        &self.ranking
    }

    /// Count one event for `id`, returning the counter's new value
    pub async fn record(&self, id: &str) -> Result<i64> {
        self.record_delta(id, 1).await
    }

    /// Add `delta` (possibly negative) to the counter for `id` and mirror it
    ///
    /// The counter never drops below zero. The leaderboard mirror is best
    /// effort; a failed mirror write is logged and corrected by the next
    /// event for the same item.
    pub async fn record_delta(&self, id: &str, delta: i64) -> Result<i64> {
        let mut value = self
            .counters
            .increment(&self.entity, id, &self.counter, delta)
            .await?;
        if value < 0 {
            value = self
                .counters
                .increment(&self.entity, id, &self.counter, -value)
                .await?;
        }

        if let Err(e) = self.rankings.set_score(&self.ranking, id, value as f64).await {
            warn!(ranking = %self.ranking, id = %id, error = %e, "Failed to mirror counter into ranking");
        } else {
            debug!(ranking = %self.ranking, id = %id, value, "Recorded hit");
        }
        Ok(value)
    }

    /// Authoritative count for `id`
    pub async fn count(&self, id: &str) -> Result<i64> {
        self.counters.get(&self.entity, id, &self.counter).await
    }

    /// Top `k` items, rebuilding a cold leaderboard from `rebuild`
    pub async fn top<F, Fut, E>(&self, k: usize, rebuild: F) -> Result<Vec<RankedMember>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Vec<(String, f64)>, E>>,
        E: Display,
    {
        self.rankings.top_k_with_scores(&self.ranking, k, rebuild).await
    }
}

/// Seed scores from creation times, newest first
///
/// Keeps the `limit` most recent items and scores each by its creation time
/// in epoch seconds. This ranks by recency rather than popularity; it is only
/// a starting point until real counts flow in through [`HotItemTracker::record`].
pub fn seed_by_recency<I, S>(items: I, limit: usize) -> Vec<(String, f64)>
where
    I: IntoIterator<Item = (S, DateTime<Utc>)>,
    S: Into<String>,
{
    let mut items: Vec<(String, DateTime<Utc>)> =
        items.into_iter().map(|(id, at)| (id.into(), at)).collect();
    items.sort_by(|a, b| b.1.cmp(&a.1));
    items
        .into_iter()
        .take(limit)
        .map(|(id, at)| (id, at.timestamp() as f64))
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
