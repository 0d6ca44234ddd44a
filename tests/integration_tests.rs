//! tiercache Integration Tests
//!
//! Cross-module scenarios over the in-memory store:
//! - Tiered read/write paths and single-flight loading
//! - Leaderboards, counters and warmup
//! - Invalidation of derived entries

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tiercache::{CacheSettings, InMemoryStore, KeyValueStore, TieredCacheRegistry};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Post {
    id: u64,
    title: String,
    author_id: u64,
}

fn post(id: u64) -> Post {
    Post {
        id,
        title: format!("Post {}", id),
        author_id: id % 3,
    }
}

fn shared_store() -> Arc<InMemoryStore> {
    Arc::new(InMemoryStore::new())
}

/// A registry as one application process would build it
fn process(store: &Arc<InMemoryStore>) -> Arc<TieredCacheRegistry> {
    Arc::new(TieredCacheRegistry::new(
        CacheSettings::default(),
        store.clone() as Arc<dyn KeyValueStore>,
    ))
}

// =============================================================================
// Tiered Cache
// =============================================================================

mod cache_tests {
    use super::*;
    use assert_matches::assert_matches;
    use tiercache::{Error, RegionSettings, RegionState, TierMode};

    #[tokio::test]
    async fn test_write_then_read() {
        let store = shared_store();
        let registry = process(&store);
        let posts = registry.cache_for("posts").await;

        posts.put("1", &post(1)).await.unwrap();
        assert_eq!(posts.get::<Post>("1").await, Some(post(1)));
        assert!(store.exists("posts::1").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight_loading() {
        let store = shared_store();
        let registry = process(&store);
        let posts = registry.cache_for("posts").await;
        let calls = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let posts = Arc::clone(&posts);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    posts
                        .get_or_load("42", || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            Ok::<_, String>(Some(post(42)))
                        })
                        .await
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), Some(post(42)));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(posts.metrics().coalesced_waits() > 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failing_loaders_share_error() {
        let store = shared_store();
        let registry = process(&store);
        let posts = registry.cache_for("posts").await;

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let posts = Arc::clone(&posts);
                tokio::spawn(async move {
                    posts
                        .get_or_load::<Post, _, _, _>("13", || async {
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            Err("database unavailable")
                        })
                        .await
                })
            })
            .collect();

        let mut messages = Vec::new();
        for handle in handles {
            let result = handle.await.unwrap();
            assert_matches!(result, Err(Error::LoadFailed { .. }));
            messages.push(result.unwrap_err().to_string());
        }
        assert!(messages.iter().all(|m| m == &messages[0]));
        assert!(messages[0].contains("database unavailable"));

        assert!(!posts.contains("13").await);
        assert!(!store.exists("posts::13").await.unwrap());
    }

    #[tokio::test]
    async fn test_timeout_releases_slot() {
        let store = shared_store();
        let registry = process(&store);
        let posts = registry.cache_for("posts").await;

        let slow: tiercache::Result<Option<Post>> = posts
            .get_or_load_with_timeout("5", Duration::from_millis(20), || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, String>(Some(post(5)))
            })
            .await;
        assert_matches!(slow, Err(Error::Timeout { .. }));

        let retry = posts
            .get_or_load("5", || async { Ok::<_, String>(Some(post(5))) })
            .await
            .unwrap();
        assert_eq!(retry, Some(post(5)));
    }

    #[tokio::test]
    async fn test_evict_then_get_is_absent() {
        let store = shared_store();
        let registry = process(&store);
        let posts = registry.cache_for("posts").await;

        posts.put("1", &post(1)).await.unwrap();
        let outcome = registry.evict("posts", "1").await;
        assert!(outcome.l1_removed && outcome.l2_removed && !outcome.l2_failed);
        assert_eq!(posts.get::<Post>("1").await, None);
    }

    #[tokio::test]
    async fn test_backfill_avoids_repeat_store_reads() {
        let store = shared_store();
        let writer = process(&store);
        let reader = process(&store);

        writer.cache_for("posts").await.put("7", &post(7)).await.unwrap();

        let posts = reader.cache_for("posts").await;
        let before = store.stats().reads;
        assert_eq!(posts.get::<Post>("7").await, Some(post(7)));
        assert_eq!(store.stats().reads, before + 1);

        // Served from the back-filled L1
        assert_eq!(posts.get::<Post>("7").await, Some(post(7)));
        assert_eq!(posts.get::<Post>("7").await, Some(post(7)));
        assert_eq!(store.stats().reads, before + 1);
        assert_eq!(posts.state(), RegionState::Warm);
    }

    #[tokio::test]
    async fn test_backfill_after_l1_expiry() {
        let store = shared_store();
        let mut settings = CacheSettings::default();
        settings.regions.insert(
            "posts".to_string(),
            RegionSettings {
                l1_ttl: Duration::from_millis(50),
                ..RegionSettings::default()
            },
        );
        let registry = TieredCacheRegistry::new(settings, store.clone() as Arc<dyn KeyValueStore>);
        let posts = registry.cache_for("posts").await;

        posts.put("11", &post(11)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        let before = store.stats().reads;
        assert_eq!(posts.get::<Post>("11").await, Some(post(11)));
        assert_eq!(store.stats().reads, before + 1);

        // Back-filled with a fresh L1 TTL
        assert_eq!(posts.get::<Post>("11").await, Some(post(11)));
        assert_eq!(store.stats().reads, before + 1);
    }

    #[tokio::test]
    async fn test_l1_capacity_bound() {
        let store = shared_store();
        let mut settings = CacheSettings::default();
        settings.regions.insert(
            "small".to_string(),
            RegionSettings {
                l1_capacity: 16,
                ..RegionSettings::default()
            },
        );
        let registry = TieredCacheRegistry::new(settings, store.clone() as Arc<dyn KeyValueStore>);
        let small = registry.cache_for("small").await;

        for i in 0..200u64 {
            small.put(&i.to_string(), &post(i)).await.unwrap();
        }
        let stats = small.stats();
        assert!(stats.local.entries <= 16);
        assert!(stats.local.evictions > 0);

        // Evicted from L1 but still in L2
        assert_eq!(small.get::<Post>("0").await, Some(post(0)));
    }

    #[tokio::test]
    async fn test_l1_only_fallback() {
        let store = shared_store();
        store.set_unavailable(true);
        let registry = process(&store);

        let posts = registry.cache_for("posts").await;
        assert_eq!(posts.mode(), TierMode::L1Only);

        posts.put("1", &post(1)).await.unwrap();
        assert_eq!(posts.get::<Post>("1").await, Some(post(1)));

        store.set_unavailable(false);
        assert!(!store.exists("posts::1").await.unwrap());
    }

    #[tokio::test]
    async fn test_store_outage_after_creation_degrades() {
        let store = shared_store();
        let registry = process(&store);
        let posts = registry.cache_for("posts").await;
        store.set_unavailable(true);

        let loaded = posts
            .get_or_load("3", || async { Ok::<_, String>(Some(post(3))) })
            .await
            .unwrap();
        assert_eq!(loaded, Some(post(3)));
        assert_eq!(posts.get::<Post>("3").await, Some(post(3)));
        assert!(posts.stats().metrics.l2_errors > 0);
    }

    #[tokio::test]
    async fn test_prefix_clear_across_processes() {
        let store = shared_store();
        let a = process(&store);
        let b = process(&store);

        a.cache_for("posts").await.put("page:0:10", &vec![1, 2]).await.unwrap();
        a.cache_for("posts").await.put("1", &post(1)).await.unwrap();

        let removed = b.clear_by_prefix("posts::page:").await.unwrap();
        assert_eq!(removed, 1);
        assert!(!store.exists("posts::page:0:10").await.unwrap());
        assert!(store.exists("posts::1").await.unwrap());
    }
}

// =============================================================================
// Rankings
// =============================================================================

mod ranking_tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;
    use tiercache::{RankingStore, HOT_POSTS};

    fn rankings(store: &Arc<InMemoryStore>) -> RankingStore {
        RankingStore::new(
            store.clone() as Arc<dyn KeyValueStore>,
            Arc::new(CacheSettings::default()),
        )
    }

    fn empty_seed() -> impl std::future::Future<Output = Result<Vec<(String, f64)>, String>> {
        async { Ok(Vec::new()) }
    }

    #[tokio::test]
    async fn test_top_k_is_idempotent() {
        let store = shared_store();
        let rankings = rankings(&store);
        for (member, delta) in [("a", 3.0), ("b", 7.0), ("c", 5.0)] {
            rankings.increment(HOT_POSTS, member, delta).await.unwrap();
        }

        let first = rankings.top_k(HOT_POSTS, 2, empty_seed).await.unwrap();
        let second = rankings.top_k(HOT_POSTS, 2, empty_seed).await.unwrap();
        assert_eq!(first, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(first, second);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Scores only grow under positive increments
        #[test]
        fn prop_increment_is_monotonic(deltas in proptest::collection::vec(0.5f64..100.0, 1..30)) {
            tokio_test::block_on(async {
                let store = shared_store();
                let rankings = rankings(&store);
                let mut previous = 0.0;
                for delta in &deltas {
                    let score = rankings.increment("r", "m", *delta).await.unwrap();
                    assert!(score > previous);
                    previous = score;
                }
                let expected: f64 = deltas.iter().sum();
                assert!((previous - expected).abs() < 1e-6);
            });
        }

        /// Top-K is sorted descending and agrees with the summed increments
        #[test]
        fn prop_top_k_orders_by_score(
            events in proptest::collection::vec((0u8..12, 1u32..50), 1..80),
            k in 1usize..15,
        ) {
            tokio_test::block_on(async {
                let store = shared_store();
                let rankings = rankings(&store);
                let mut totals: HashMap<String, f64> = HashMap::new();
                for (member, delta) in &events {
                    let member = member.to_string();
                    rankings.increment("r", &member, *delta as f64).await.unwrap();
                    *totals.entry(member).or_default() += *delta as f64;
                }

                let top = rankings.top_k_with_scores("r", k, empty_seed).await.unwrap();
                assert_eq!(top.len(), k.min(totals.len()));
                for pair in top.windows(2) {
                    assert!(pair[0].score >= pair[1].score);
                }
                for ranked in &top {
                    assert_eq!(totals[&ranked.member], ranked.score);
                }
                // Nothing outside the top-K outranks its last member
                if let Some(last) = top.last() {
                    let outranking = totals.values().filter(|s| **s > last.score).count();
                    assert!(outranking < top.len());
                }
            });
        }
    }
}

// =============================================================================
// Hot Posts Scenario
// =============================================================================

mod scenario_tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tiercache::ranking::seed_by_recency;
    use tiercache::{
        HotItemTracker, InvalidationEvent, Invalidator, LeaderboardRebuild, RegionPreload,
        WarmupCoordinator, HOT_POSTS,
    };

    fn recent_posts() -> Vec<(String, chrono::DateTime<Utc>)> {
        (1..=5)
            .map(|id| (id.to_string(), Utc.timestamp_opt(1_700_000_000 + id * 60, 0).unwrap()))
            .collect()
    }

    #[tokio::test]
    async fn test_posts_and_hot_posts() {
        let store = shared_store();
        let registry = process(&store);
        let settings = Arc::new(CacheSettings::default());
        let views = HotItemTracker::post_views(store.clone() as Arc<dyn KeyValueStore>, settings);
        let invalidator = Invalidator::with_default_rules(Arc::clone(&registry));
        let posts = registry.cache_for("posts").await;

        // Cold leaderboard rebuilds from the newest posts
        let hot = views
            .top(3, || async { Ok::<_, String>(seed_by_recency(recent_posts(), 10)) })
            .await
            .unwrap();
        let ids: Vec<_> = hot.iter().map(|m| m.member.as_str()).collect();
        assert_eq!(ids, vec!["5", "4", "3"]);

        // Reading a post counts a view; real counts replace the seed scores
        for _ in 0..3 {
            let loaded = posts
                .get_or_load("2", || async { Ok::<_, String>(Some(post(2))) })
                .await
                .unwrap();
            assert_eq!(loaded, Some(post(2)));
            views.record("2").await.unwrap();
        }
        assert_eq!(views.count("2").await.unwrap(), 3);
        assert_eq!(store.zscore(HOT_POSTS, "2").await.unwrap(), Some(3.0));

        // Editing the post drops its entry, listing pages and the leaderboard
        posts.put("page:0:10", &vec![post(2)]).await.unwrap();
        let report = invalidator.handle(&InvalidationEvent::changed("post", 2)).await;
        assert!(report.is_clean());
        assert_eq!(posts.get::<Post>("2").await, None);
        assert_eq!(posts.get::<Vec<Post>>("page:0:10").await, None);
        assert!(!store.exists(HOT_POSTS).await.unwrap());

        // The counter survives and re-seeds the leaderboard on the next view
        views.record("2").await.unwrap();
        assert_eq!(store.zscore(HOT_POSTS, "2").await.unwrap(), Some(4.0));
    }

    #[tokio::test]
    async fn test_startup_warmup_populates_cold_process() {
        let store = shared_store();
        let registry = process(&store);
        let settings = Arc::new(CacheSettings::default());
        let rankings = tiercache::RankingStore::new(store.clone() as Arc<dyn KeyValueStore>, settings);
        let loads = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&loads);

        let coordinator = Arc::new(
            WarmupCoordinator::new(Arc::clone(&registry))
                .with_step(RegionPreload::new(
                    Arc::clone(&registry),
                    "posts",
                    "page:0:10",
                    move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                        async { Ok::<_, String>(Some((1..=10).map(post).collect::<Vec<_>>())) }
                    },
                ))
                .with_step(LeaderboardRebuild::new(rankings.clone(), HOT_POSTS, 10, || async {
                    Ok::<_, String>(seed_by_recency(recent_posts(), 10))
                })),
        );

        let report = coordinator.spawn_startup_warmup().await.unwrap();
        assert!(report.is_success());
        assert!(rankings.exists(HOT_POSTS).await.unwrap());

        let page = registry
            .cache_for("posts")
            .await
            .get::<Vec<Post>>("page:0:10")
            .await
            .unwrap();
        assert_eq!(page.len(), 10);

        // A second process warms from L2 without calling the loader
        let other = process(&store);
        let again = WarmupCoordinator::new(Arc::clone(&other)).with_step(RegionPreload::new(
            other,
            "posts",
            "page:0:10",
            {
                let loads = Arc::clone(&loads);
                move || {
                    loads.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, String>(None::<Vec<Post>>) }
                }
            },
        ));
        assert!(again.run_manual_warmup().await.is_success());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }
}
