//! Cache Invalidation
//!
//! Maps "entity changed" events to the cache entries derived from that
//! entity: the entity's own entry, listing pages that may contain it, and
//! leaderboards that rank it.
//!
//! Invalidation is best effort. Each action is attempted even if an earlier
//! one failed; failures are logged and listed in the report.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::TieredCacheRegistry;
use crate::config::HOT_POSTS;
use crate::ranking::{CounterStore, RankingStore};
use crate::store::region_prefix;

/// Events that invalidate cached data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationEvent {
    /// An entity was created or updated
    EntityChanged { entity: String, id: String },
    /// An entity was deleted
    EntityDeleted { entity: String, id: String },
}

impl InvalidationEvent {
    pub fn changed(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::EntityChanged {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn deleted(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::EntityDeleted {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn entity(&self) -> &str {
        match self {
            Self::EntityChanged { entity, .. } | Self::EntityDeleted { entity, .. } => entity,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::EntityChanged { id, .. } | Self::EntityDeleted { id, .. } => id,
        }
    }
}

/// What to invalidate when an entity changes
#[derive(Debug, Clone, Default)]
pub struct InvalidationRule {
    /// Regions holding the entity under its id
    pub evict_regions: Vec<String>,
    /// Store-key prefixes of derived entries (listing pages, searches)
    pub clear_prefixes: Vec<String>,
    /// Leaderboards to drop so they rebuild on next read
    pub drop_rankings: Vec<String>,
    /// Counters removed when the entity is deleted
    pub counters: Vec<String>,
}

impl InvalidationRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evict_region(mut self, region: impl Into<String>) -> Self {
        self.evict_regions.push(region.into());
        self
    }

    pub fn clear_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.clear_prefixes.push(prefix.into());
        self
    }

    pub fn drop_ranking(mut self, ranking: impl Into<String>) -> Self {
        self.drop_rankings.push(ranking.into());
        self
    }

    pub fn counter(mut self, counter: impl Into<String>) -> Self {
        self.counters.push(counter.into());
        self
    }

    /// Rule for blog posts
    ///
    /// A post appears in its own entry, in paged listings, in author pages
    /// and in search results; the hot posts leaderboard ranks it.
    pub fn post() -> Self {
        Self::new()
            .evict_region("posts")
            .clear_prefix(format!("{}page:", region_prefix("posts")))
            .clear_prefix(format!("{}authorPage:", region_prefix("posts")))
            .clear_prefix(region_prefix("searchResults"))
            .drop_ranking(HOT_POSTS)
            .counter("views")
    }
}

/// Summary of one handled event
#[derive(Debug, Clone, Default, Serialize)]
pub struct InvalidationReport {
    pub evicted: usize,
    pub prefix_keys_cleared: usize,
    pub rankings_dropped: usize,
    pub counters_removed: usize,
    pub errors: Vec<String>,
}

impl InvalidationReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Applies invalidation rules
pub struct Invalidator {
    registry: Arc<TieredCacheRegistry>,
    rankings: Option<RankingStore>,
    counters: Option<CounterStore>,
    rules: HashMap<String, InvalidationRule>,
}

impl Invalidator {
    /// Invalidator with no rules
    pub fn new(registry: Arc<TieredCacheRegistry>) -> Self {
        Self {
            registry,
            rankings: None,
            counters: None,
            rules: HashMap::new(),
        }
    }

    /// Invalidator with the built-in `post` rule, wired to the registry's store
    pub fn with_default_rules(registry: Arc<TieredCacheRegistry>) -> Self {
        let settings = Arc::new(registry.settings().clone());
        let store = registry.store().cloned();
        let mut invalidator = Self::new(registry);
        if let Some(store) = store {
            invalidator.rankings = Some(RankingStore::new(Arc::clone(&store), Arc::clone(&settings)));
            invalidator.counters = Some(CounterStore::new(store, settings.counter_ttl));
        }
        invalidator.with_rule("post", InvalidationRule::post())
    }

    pub fn with_rankings(mut self, rankings: RankingStore) -> Self {
        self.rankings = Some(rankings);
        self
    }

    pub fn with_counters(mut self, counters: CounterStore) -> Self {
        self.counters = Some(counters);
        self
    }

    pub fn with_rule(mut self, entity: impl Into<String>, rule: InvalidationRule) -> Self {
        self.rules.insert(entity.into(), rule);
        self
    }

    pub fn rule(&self, entity: &str) -> Option<&InvalidationRule> {
        self.rules.get(entity)
    }

    /// Apply the rule for the event's entity; entities without a rule are ignored
    pub async fn handle(&self, event: &InvalidationEvent) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        let Some(rule) = self.rules.get(event.entity()) else {
            debug!(entity = %event.entity(), "No invalidation rule");
            return report;
        };
        let id = event.id();

        for region in &rule.evict_regions {
            let outcome = self.registry.evict(region, id).await;
            if outcome.l1_removed || outcome.l2_removed {
                report.evicted += 1;
            }
            if outcome.l2_failed {
                report.errors.push(format!("evict {}::{}: shared store unavailable", region, id));
            }
        }

        for prefix in &rule.clear_prefixes {
            match self.registry.clear_by_prefix(prefix).await {
                Ok(removed) => report.prefix_keys_cleared += removed,
                Err(e) => report.errors.push(format!("clear {}: {}", prefix, e)),
            }
        }

        if let Some(rankings) = &self.rankings {
            for ranking in &rule.drop_rankings {
                match rankings.invalidate(ranking).await {
                    Ok(true) => report.rankings_dropped += 1,
                    Ok(false) => {}
                    Err(e) => report.errors.push(format!("drop {}: {}", ranking, e)),
                }
            }
        }

        if let (InvalidationEvent::EntityDeleted { entity, .. }, Some(counters)) = (event, &self.counters) {
            for counter in &rule.counters {
                match counters.remove(entity, id, counter).await {
                    Ok(true) => report.counters_removed += 1,
                    Ok(false) => {}
                    Err(e) => report.errors.push(format!("remove counter {}: {}", counter, e)),
                }
            }
        }

        if report.is_clean() {
            debug!(entity = %event.entity(), id = %id, ?report, "Invalidated");
        } else {
            warn!(entity = %event.entity(), id = %id, errors = ?report.errors, "Invalidation incomplete");
        }
        report
    }
}

// =============================================================================
// Tests
// =============================================================================
