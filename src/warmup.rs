//! Cache Warmup
//!
//! Populates first-page result sets and leaderboards at startup and on
//! demand. Steps run one after another; a failing step is logged and the
//! remaining steps still run.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::cache::TieredCacheRegistry;
use crate::error::{Error, Result};
use crate::ranking::RankingStore;

/// One unit of warmup work
#[async_trait]
pub trait WarmupStep: Send + Sync {
    /// Name used in logs and reports
    fn name(&self) -> &str;

    /// Regions populated by this step
    fn regions(&self) -> Vec<String> {
        Vec::new()
    }

    async fn run(&self) -> Result<()>;
}

type ValueLoader =
    Box<dyn Fn() -> BoxFuture<'static, std::result::Result<Option<serde_json::Value>, String>> + Send + Sync>;

type SeedLoader =
    Box<dyn Fn() -> BoxFuture<'static, std::result::Result<Vec<(String, f64)>, String>> + Send + Sync>;

/// Loads one key of a region through the read-through path
pub struct RegionPreload {
    name: String,
    registry: Arc<TieredCacheRegistry>,
    region: String,
    key: String,
    loader: ValueLoader,
}

impl RegionPreload {
    pub fn new<F, Fut, T, E>(
        registry: Arc<TieredCacheRegistry>,
        region: impl Into<String>,
        key: impl Into<String>,
        loader: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Option<T>, E>> + Send + 'static,
        T: Serialize + Send + 'static,
        E: Display + Send + 'static,
    {
        let region = region.into();
        let key = key.into();
        let loader: ValueLoader = Box::new(move || {
            let fut = loader();
            Box::pin(async move {
                match fut.await {
                    Ok(Some(value)) => serde_json::to_value(value)
                        .map(Some)
                        .map_err(|e| e.to_string()),
                    Ok(None) => Ok(None),
                    Err(e) => Err(e.to_string()),
                }
            })
        });
        Self {
            name: format!("preload {}::{}", region, key),
            registry,
            region,
            key,
            loader,
        }
    }
}

#[async_trait]
impl WarmupStep for RegionPreload {
    fn name(&self) -> &str {
        &self.name
    }

    fn regions(&self) -> Vec<String> {
        vec![self.region.clone()]
    }

    async fn run(&self) -> Result<()> {
        let cache = self.registry.cache_for(&self.region).await;
        let value: Option<serde_json::Value> =
            cache.get_or_load(&self.key, || (self.loader)()).await?;
        info!(region = %self.region, key = %self.key, found = value.is_some(), "Preloaded");
        Ok(())
    }
}

/// Rebuilds a leaderboard from its seed source when it is cold
pub struct LeaderboardRebuild {
    name: String,
    rankings: RankingStore,
    ranking: String,
    limit: usize,
    seeds: SeedLoader,
}

impl LeaderboardRebuild {
    pub fn new<F, Fut, E>(rankings: RankingStore, ranking: impl Into<String>, limit: usize, seeds: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Vec<(String, f64)>, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let ranking = ranking.into();
        let seeds: SeedLoader = Box::new(move || {
            let fut = seeds();
            Box::pin(async move { fut.await.map_err(|e| e.to_string()) })
        });
        Self {
            name: format!("rebuild {}", ranking),
            rankings,
            ranking,
            limit,
            seeds,
        }
    }
}

#[async_trait]
impl WarmupStep for LeaderboardRebuild {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<()> {
        let top = self
            .rankings
            .top_k(&self.ranking, self.limit, || (self.seeds)())
            .await?;
        info!(ranking = %self.ranking, members = top.len(), "Ranking ready");
        Ok(())
    }
}

/// Arbitrary async step
pub struct FnStep {
    name: String,
    run: Box<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>,
}

impl FnStep {
    pub fn new<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(move || Box::pin(run())),
        }
    }
}

#[async_trait]
impl WarmupStep for FnStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<()> {
        (self.run)().await
    }
}

/// Outcome of one step
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub name: String,
    pub succeeded: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl StepOutcome {
    /// The step's failure as an error
    pub fn to_result(&self) -> Result<()> {
        match &self.error {
            None => Ok(()),
            Some(reason) => Err(Error::Internal(format!("{}: {}", self.name, reason))),
        }
    }
}

/// Outcome of one warmup run
#[derive(Debug, Clone, Serialize)]
pub struct WarmupReport {
    pub trigger: WarmupTrigger,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub steps: Vec<StepOutcome>,
}

impl WarmupReport {
    pub fn succeeded(&self) -> usize {
        self.steps.iter().filter(|s| s.succeeded).count()
    }

    pub fn failed(&self) -> usize {
        self.steps.len() - self.succeeded()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

/// What started a warmup run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmupTrigger {
    Startup,
    Manual,
}

/// Runs warmup steps
pub struct WarmupCoordinator {
    registry: Arc<TieredCacheRegistry>,
    steps: Vec<Arc<dyn WarmupStep>>,
    last_report: Mutex<Option<WarmupReport>>,
}

impl WarmupCoordinator {
    pub fn new(registry: Arc<TieredCacheRegistry>) -> Self {
        Self {
            registry,
            steps: Vec::new(),
            last_report: Mutex::new(None),
        }
    }

    /// Append a step; steps run in insertion order
    pub fn with_step(mut self, step: impl WarmupStep + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn registry(&self) -> &Arc<TieredCacheRegistry> {
        &self.registry
    }

    /// Run every step once, as at process start
    pub async fn run_startup_warmup(&self) -> WarmupReport {
        self.run(WarmupTrigger::Startup).await
    }

    /// Run the startup warmup on a background task
    pub fn spawn_startup_warmup(self: &Arc<Self>) -> JoinHandle<WarmupReport> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.run_startup_warmup().await })
    }

    /// Run every step on demand
    pub async fn run_manual_warmup(&self) -> WarmupReport {
        self.run(WarmupTrigger::Manual).await
    }

    /// Delete every key in the shared store and every L1 entry
    pub async fn clear_all(&self) -> Result<usize> {
        self.registry.clear_all().await
    }

    /// Report of the most recent run
    pub fn last_report(&self) -> Option<WarmupReport> {
        self.last_report.lock().clone()
    }

    async fn run(&self, trigger: WarmupTrigger) -> WarmupReport {
        let started_at = Utc::now();
        let start = Instant::now();
        info!(?trigger, steps = self.steps.len(), "Starting cache warmup");

        let mut outcomes = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            outcomes.push(self.run_step(step.as_ref()).await);
        }

        let report = WarmupReport {
            trigger,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            steps: outcomes,
        };
        info!(
            ?trigger,
            succeeded = report.succeeded(),
            failed = report.failed(),
            duration_ms = report.duration_ms,
            "Cache warmup finished"
        );
        *self.last_report.lock() = Some(report.clone());
        report
    }

    async fn run_step(&self, step: &dyn WarmupStep) -> StepOutcome {
        let mut guards = Vec::new();
        for region in step.regions() {
            guards.push(self.registry.cache_for(&region).await.begin_warming());
        }

        let start = Instant::now();
        let result = step.run().await;
        drop(guards);

        let duration_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(()) => {
                info!(step = %step.name(), duration_ms, "Warmup step done");
                StepOutcome {
                    name: step.name().to_string(),
                    succeeded: true,
                    error: None,
                    duration_ms,
                }
            }
            Err(e) => {
                error!(step = %step.name(), error = %e, "Warmup step failed");
                StepOutcome {
                    name: step.name().to_string(),
                    succeeded: false,
                    error: Some(e.to_string()),
                    duration_ms,
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RegionState;
    use crate::config::{CacheSettings, HOT_POSTS};
    use crate::store::{InMemoryStore, KeyValueStore};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn setup() -> (Arc<InMemoryStore>, Arc<TieredCacheRegistry>, RankingStore) {
        let store = Arc::new(InMemoryStore::new());
        let settings = CacheSettings::default();
        let registry = Arc::new(TieredCacheRegistry::new(
            settings.clone(),
            store.clone() as Arc<dyn KeyValueStore>,
        ));
        let rankings = RankingStore::new(store.clone() as Arc<dyn KeyValueStore>, Arc::new(settings));
        (store, registry, rankings)
    }

    #[tokio::test]
    async fn test_failing_step_does_not_stop_others() {
        let (_, registry, rankings) = setup();
        let coordinator = WarmupCoordinator::new(Arc::clone(&registry))
            .with_step(FnStep::new("broken", || async {
                Err(Error::Internal("boom".to_string()))
            }))
            .with_step(RegionPreload::new(
                Arc::clone(&registry),
                "posts",
                "page:0:10",
                || async { Ok::<_, String>(Some(vec![1, 2, 3])) },
            ))
            .with_step(LeaderboardRebuild::new(rankings.clone(), HOT_POSTS, 10, || async {
                Ok::<_, String>(vec![("1".to_string(), 1.0)])
            }));

        let report = coordinator.run_startup_warmup().await;
        assert_eq!(report.trigger, WarmupTrigger::Startup);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert!(report.steps[0].to_result().is_err());

        let cache = registry.cache_for("posts").await;
        assert_eq!(cache.get::<Vec<u32>>("page:0:10").await, Some(vec![1, 2, 3]));
        assert_eq!(cache.state(), RegionState::Warm);
        assert!(rankings.exists(HOT_POSTS).await.unwrap());
        assert!(coordinator.last_report().is_some());
    }

    #[tokio::test]
    async fn test_manual_warmup_keeps_live_rankings() {
        let (_, registry, rankings) = setup();
        rankings.increment(HOT_POSTS, "9", 50.0).await.unwrap();
        let seeds = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&seeds);

        let coordinator = WarmupCoordinator::new(registry).with_step(LeaderboardRebuild::new(
            rankings.clone(),
            HOT_POSTS,
            10,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, String>(vec![("1".to_string(), 1.0)]) }
            },
        ));

        let report = coordinator.run_manual_warmup().await;
        assert!(report.is_success());
        assert_eq!(report.trigger, WarmupTrigger::Manual);
        assert_eq!(seeds.load(Ordering::SeqCst), 0);
        assert_eq!(rankings.score(HOT_POSTS, "9").await.unwrap(), Some(50.0));
    }

    #[tokio::test]
    async fn test_spawned_startup_warmup() {
        let (_, registry, _) = setup();
        let coordinator = Arc::new(WarmupCoordinator::new(Arc::clone(&registry)).with_step(
            RegionPreload::new(registry, "tags", "all", || async {
                Ok::<_, String>(Some("rust"))
            }),
        ));

        let report = coordinator.spawn_startup_warmup().await.unwrap();
        assert!(report.is_success());
        assert_eq!(coordinator.step_names(), vec!["preload tags::all".to_string()]);
    }

    #[tokio::test]
    async fn test_clear_all() {
        let (store, registry, _) = setup();
        registry.cache_for("posts").await.put("1", &1u32).await.unwrap();
        let coordinator = WarmupCoordinator::new(registry);

        assert_eq!(coordinator.clear_all().await.unwrap(), 1);
        assert_eq!(store.stats().keys, 0);
    }
}
