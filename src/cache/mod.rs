//! Two-Tier Cache
//!
//! Named regions of cached values with an in-process L1 in front of the
//! shared L2 store.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TieredCacheRegistry                        │
//! │        region name -> TieredCache (created on first use)     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TieredCache "posts"   │  TieredCache "users"   │  ...       │
//! │  ┌──────────────────┐  │  ┌──────────────────┐  │            │
//! │  │ L1: LocalCache   │  │  │ L1: LocalCache   │  │            │
//! │  │ (64-way sharded) │  │  │ (64-way sharded) │  │            │
//! │  └────────┬─────────┘  │  └────────┬─────────┘  │            │
//! │           │ miss       │           │ miss       │            │
//! │  ┌────────▼─────────────────────────▼─────────┐ │            │
//! │  │        L2: KeyValueStore (Redis)           │ │            │
//! │  └────────┬───────────────────────────────────┘ │            │
//! │           │ miss                                              │
//! │     single-flight loader                                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Consistency
//!
//! - Writes and evictions touch L1 before L2
//! - L1 entries expire a fixed time after being written, so a stale L1 copy
//!   on another process lives at most one L1 TTL
//! - Absent values are never cached

mod entry;
mod flight;
mod local;
mod metrics;
mod policy;
mod registry;
mod shard;
mod tiered;

pub use entry::{CacheEntry, EntryMetadata};
pub use flight::{FlightFailure, SingleFlight};
pub use local::{LocalCache, LocalConfig, LocalStats};
pub use metrics::{LatencyTracker, MetricsSnapshot, RegionMetrics};
pub use policy::{EvictionPolicy, PolicyKind};
pub use registry::TieredCacheRegistry;
pub use shard::ShardedMap;
pub use tiered::{
    EvictOutcome, RegionState, RegionStats, RemoteTier, TierMode, TieredCache, WarmingGuard,
};

/// Number of L1 shards
pub const SHARD_COUNT: usize = 64;
