//! Popularity Rankings
//!
//! Leaderboards (hot posts, popular tags) and the raw counters that feed
//! them, stored directly in the shared store.

mod counter;
mod leaderboard;

pub use counter::{seed_by_recency, CounterStore, HotItemTracker};
pub use leaderboard::{RankedMember, RankingStore};
