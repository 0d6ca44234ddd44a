//! L1 Eviction Policies
//!
//! Once a region's L1 reaches its high watermark, entries are ranked by an
//! eviction score and removed until the low watermark is reached.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Selectable eviction policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Least recently used
    Lru,
    /// Least frequently used
    Lfu,
    /// Recency and frequency combined
    #[default]
    LruK,
}

/// Eviction policy configuration
#[derive(Debug, Clone)]
pub struct EvictionPolicy {
    /// Name of the policy
    pub name: String,
    /// Fill ratio that triggers eviction
    pub high_watermark: f64,
    /// Fill ratio eviction stops at
    pub low_watermark: f64,
    /// Entries accessed at least this often are evicted last (0 = off)
    pub min_access_count: u32,
    /// Weight for recency in eviction score (0.0 - 1.0)
    pub recency_weight: f64,
    /// Weight for frequency in eviction score (0.0 - 1.0)
    pub frequency_weight: f64,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::lru_k()
    }
}

impl EvictionPolicy {
    /// LRU-K eviction policy (default)
    ///
    /// Balances recency and frequency, penalizing infrequently accessed items.
    pub fn lru_k() -> Self {
        Self {
            name: "LRU-K".to_string(),
            high_watermark: 0.90,
            low_watermark: 0.80,
            min_access_count: 0,
            recency_weight: 0.5,
            frequency_weight: 0.5,
        }
    }

    /// Pure LRU eviction policy
    pub fn lru() -> Self {
        Self {
            name: "LRU".to_string(),
            recency_weight: 1.0,
            frequency_weight: 0.0,
            ..Self::lru_k()
        }
    }

    /// LFU eviction policy
    pub fn lfu() -> Self {
        Self {
            name: "LFU".to_string(),
            recency_weight: 0.0,
            frequency_weight: 1.0,
            ..Self::lru_k()
        }
    }

    /// Policy for a configured kind
    pub fn from_kind(kind: PolicyKind) -> Self {
        match kind {
            PolicyKind::Lru => Self::lru(),
            PolicyKind::Lfu => Self::lfu(),
            PolicyKind::LruK => Self::lru_k(),
        }
    }

    /// Calculate eviction score for an entry
    ///
    /// Higher score = more likely to evict
    pub fn calculate_score(&self, idle: Duration, access_count: u32) -> f64 {
        let idle_score = idle.as_secs_f64() / 60.0;
        let freq_score = 1.0 / (access_count as f64 + 1.0);

        let score = self.recency_weight * idle_score + self.frequency_weight * freq_score;
        if self.should_protect(access_count) {
            score / 10.0
        } else {
            score
        }
    }

    /// Check if an entry should be protected (evicted last)
    pub fn should_protect(&self, access_count: u32) -> bool {
        access_count >= self.min_access_count && self.min_access_count > 0
    }

    /// Entry count that triggers eviction
    pub fn high_mark(&self, capacity: usize) -> usize {
        ((capacity as f64 * self.high_watermark) as usize)
            .max(1)
            .min(capacity)
    }

    /// Entry count eviction stops at
    pub fn low_mark(&self, capacity: usize) -> usize {
        ((capacity as f64 * self.low_watermark) as usize).min(capacity.saturating_sub(1))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_kinds() {
        assert_eq!(EvictionPolicy::from_kind(PolicyKind::Lru).name, "LRU");
        assert_eq!(EvictionPolicy::from_kind(PolicyKind::Lfu).name, "LFU");
        assert_eq!(EvictionPolicy::from_kind(PolicyKind::LruK).name, "LRU-K");
        assert_eq!(PolicyKind::default(), PolicyKind::LruK);
    }

    #[test]
    fn test_lru_prefers_idle_entries() {
        let policy = EvictionPolicy::lru();
        let idle = policy.calculate_score(Duration::from_secs(600), 100);
        let fresh = policy.calculate_score(Duration::from_secs(1), 1);
        assert!(idle > fresh);
    }

    #[test]
    fn test_lfu_prefers_rare_entries() {
        let policy = EvictionPolicy::lfu();
        let rare = policy.calculate_score(Duration::from_secs(1), 1);
        let popular = policy.calculate_score(Duration::from_secs(600), 50);
        assert!(rare > popular);
    }

    #[test]
    fn test_lru_k_combines_both() {
        let policy = EvictionPolicy::lru_k();
        let low_score = policy.calculate_score(Duration::from_secs(5), 100);
        let high_score = policy.calculate_score(Duration::from_secs(3600), 1);
        assert!(high_score > low_score, "Old/rare should have higher eviction score");
    }

    #[test]
    fn test_protection() {
        let mut policy = EvictionPolicy::lru();
        policy.min_access_count = 5;

        assert!(!policy.should_protect(3));
        assert!(policy.should_protect(5));

        let protected = policy.calculate_score(Duration::from_secs(600), 5);
        let unprotected = policy.calculate_score(Duration::from_secs(600), 4);
        assert!(protected < unprotected);
    }

    #[test]
    fn test_watermarks() {
        let policy = EvictionPolicy::lru_k();
        assert_eq!(policy.high_mark(5000), 4500);
        assert_eq!(policy.low_mark(5000), 4000);

        // Tiny capacities still evict at least one entry
        assert_eq!(policy.high_mark(1), 1);
        assert_eq!(policy.low_mark(1), 0);
        assert!(policy.low_mark(2) < policy.high_mark(2) || policy.high_mark(2) == 1);
    }
}
