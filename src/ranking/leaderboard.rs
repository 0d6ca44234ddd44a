//! Leaderboards
//!
//! Descending-score rankings kept in shared-store sorted sets. Every write
//! refreshes the leaderboard's TTL, so an idle leaderboard eventually expires
//! and is rebuilt from the authoritative store on its next read.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::CacheSettings;
use crate::error::{Error, Result};
use crate::store::KeyValueStore;

/// One leaderboard position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedMember {
    pub member: String,
    pub score: f64,
}

impl From<(String, f64)> for RankedMember {
    fn from((member, score): (String, f64)) -> Self {
        Self { member, score }
    }
}

/// Leaderboards over the shared store
#[derive(Clone)]
pub struct RankingStore {
    store: Arc<dyn KeyValueStore>,
    settings: Arc<CacheSettings>,
}

impl RankingStore {
    pub fn new(store: Arc<dyn KeyValueStore>, settings: Arc<CacheSettings>) -> Self {
        Self { store, settings }
    }

    async fn touch(&self, name: &str) -> Result<()> {
        self.store.expire(name, self.settings.ranking(name).ttl).await?;
        Ok(())
    }

    /// Add `delta` to a member's score, returning the new score
    pub async fn increment(&self, name: &str, member: &str, delta: f64) -> Result<f64> {
        let score = self.store.zincr_by(name, member, delta).await?;
        self.touch(name).await?;
        debug!(ranking = %name, member = %member, score, "Incremented ranking");
        Ok(score)
    }

    /// Set a member's score outright
    pub async fn set_score(&self, name: &str, member: &str, score: f64) -> Result<()> {
        self.store.zadd(name, member, score).await?;
        self.touch(name).await
    }

    /// Current score of a member
    pub async fn score(&self, name: &str, member: &str) -> Result<Option<f64>> {
        self.store.zscore(name, member).await
    }

    /// Check whether the leaderboard exists
    pub async fn exists(&self, name: &str) -> Result<bool> {
        self.store.exists(name).await
    }

    /// Drop the leaderboard; the next `top_k` rebuilds it
    pub async fn invalidate(&self, name: &str) -> Result<bool> {
        let removed = self.store.delete(name).await?;
        debug!(ranking = %name, removed, "Invalidated ranking");
        Ok(removed)
    }

    /// Insert seed scores
    ///
    /// Seeds overwrite existing scores for the same member, so repeating a
    /// rebuild with the same seeds leaves the leaderboard unchanged.
    pub async fn rebuild(&self, name: &str, seeds: Vec<(String, f64)>) -> Result<usize> {
        let count = seeds.len();
        for (member, score) in &seeds {
            self.store.zadd(name, member, *score).await?;
        }
        if count > 0 {
            self.touch(name).await?;
        }
        info!(ranking = %name, members = count, "Rebuilt ranking");
        Ok(count)
    }

    /// Top `k` members without rebuilding a missing leaderboard
    pub async fn peek(&self, name: &str, k: usize) -> Result<Vec<RankedMember>> {
        let top = self.store.zrev_range_top_k(name, k).await?;
        Ok(top.into_iter().map(RankedMember::from).collect())
    }

    /// Top `k` member names, highest score first
    pub async fn top_k<F, Fut, E>(&self, name: &str, k: usize, rebuild: F) -> Result<Vec<String>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Vec<(String, f64)>, E>>,
        E: Display,
    {
        let top = self.top_k_with_scores(name, k, rebuild).await?;
        Ok(top.into_iter().map(|m| m.member).collect())
    }

    /// Top `k` members with scores
    ///
    /// A missing leaderboard is rebuilt from `rebuild` before reading.
    pub async fn top_k_with_scores<F, Fut, E>(
        &self,
        name: &str,
        k: usize,
        rebuild: F,
    ) -> Result<Vec<RankedMember>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Vec<(String, f64)>, E>>,
        E: Display,
    {
        if k == 0 {
            return Ok(Vec::new());
        }

        let top = self.peek(name, k).await?;
        if !top.is_empty() {
            return Ok(top);
        }

        debug!(ranking = %name, "Ranking is cold, rebuilding");
        let seeds = rebuild().await.map_err(|e| Error::LoadFailed {
            key: name.to_string(),
            reason: e.to_string(),
        })?;
        self.rebuild(name, seeds).await?;
        self.peek(name, k).await
    }
}

// =============================================================================
// Tests
// =============================================================================
