//! tiercache - Tiered Caching and Popularity Ranking
//!
//! A two-tier cache (in-process L1 in front of a shared Redis L2) with
//! read-through loading, write-through propagation, back-fill on L2 hits and
//! prefix invalidation, plus score-ranked "hot item" leaderboards built on
//! sorted sets.
//!
//! # Architecture
//!
//! ```text
//!   caller ──▶ TieredCacheRegistry ──▶ TieredCache ──▶ L1 ──▶ L2 ──▶ loader
//!                                                      │
//!   HotItemTracker ──▶ CounterStore ─┐                 │
//!                  └─▶ RankingStore ─┴──▶ KeyValueStore (Redis / in-memory)
//!
//!   WarmupCoordinator, Invalidator, CacheAdmin sit beside the registry
//! ```
//!
//! # Modules
//!
//! - [`cache`] - L1, tiered regions, single-flight loading, region registry
//! - [`store`] - Shared store trait with Redis and in-memory backends
//! - [`ranking`] - Leaderboards, counters and hot-item tracking
//! - [`warmup`] - Startup and on-demand warmup
//! - [`invalidation`] - Entity change events to cache invalidations
//! - [`admin`] - Operator-facing status, clears and queries
//! - [`config`] - Engine settings
//! - [`error`] - Error types

pub mod admin;
pub mod cache;
pub mod config;
pub mod error;
pub mod invalidation;
pub mod ranking;
pub mod store;
pub mod warmup;

// Re-export commonly used types
pub use admin::{CacheAdmin, CacheStatus};
pub use cache::{EvictOutcome, RegionState, TierMode, TieredCache, TieredCacheRegistry};
pub use config::{CacheSettings, RegionSettings, HOT_POSTS, POPULAR_TAGS};
pub use error::{Error, Result};
pub use invalidation::{InvalidationEvent, InvalidationRule, Invalidator};
pub use ranking::{CounterStore, HotItemTracker, RankedMember, RankingStore};
pub use store::{InMemoryStore, KeyValueStore, RedisStore};
pub use warmup::{LeaderboardRebuild, RegionPreload, WarmupCoordinator, WarmupReport, WarmupStep};
