//! The engine facade: wires the cache, locks, pools, services and jobs
//! together and exposes the surface the HTTP layer calls.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::{CacheName, FeedCache};
use crate::config::Config;
use crate::error::Result;
use crate::executor::DualPoolExecutor;
use crate::jobs::CacheWarmer;
use crate::locks::DeviceLockRegistry;
use crate::models::{ActivityDraft, PersonalizedFeed, TimeContext, TrendingSnapshot, UserSegment};
use crate::services::feed::{FeedRanker, FeedRequest};
use crate::services::{ActivityRecorder, ContextClassifier, TrendingScorer};
use crate::store::{ActivityStore, ShopDirectory};

pub struct FeedEngine {
    config: Config,
    cache: Arc<FeedCache>,
    executor: Arc<DualPoolExecutor>,
    recorder: ActivityRecorder,
    classifier: Arc<ContextClassifier>,
    scorer: Arc<TrendingScorer>,
    ranker: Arc<FeedRanker>,
    warmer: Arc<CacheWarmer>,
    jobs: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl FeedEngine {
    /// Wire up every component. Must be called from within a tokio runtime
    /// (the executor spawns its CPU workers immediately).
    pub fn new(
        config: Config,
        activity_store: Arc<dyn ActivityStore>,
        directory: Arc<dyn ShopDirectory>,
    ) -> Self {
        let cache = Arc::new(FeedCache::new(&config.cache));
        let locks = Arc::new(DeviceLockRegistry::new());
        let executor = Arc::new(DualPoolExecutor::new(config.pools.clone()));

        let scorer = Arc::new(TrendingScorer::new(
            Arc::clone(&activity_store),
            Arc::clone(&cache),
            config.trending.clone(),
        ));
        let classifier = Arc::new(ContextClassifier::new(
            Arc::clone(&activity_store),
            Arc::clone(&cache),
            config.segments.clone(),
        ));
        let recorder = ActivityRecorder::new(
            activity_store,
            locks,
            Arc::clone(&executor),
            Arc::clone(&classifier),
            Arc::clone(&cache),
        );
        let ranker = Arc::new(FeedRanker::new(
            Arc::clone(&directory),
            Arc::clone(&scorer),
            Arc::clone(&classifier),
            Arc::clone(&cache),
            config.feed.clone(),
        ));
        let warmer = Arc::new(CacheWarmer::new(
            Arc::clone(&ranker),
            Arc::clone(&scorer),
            directory,
            config.jobs.clone(),
        ));

        info!("feed engine assembled");
        FeedEngine {
            config,
            cache,
            executor,
            recorder,
            classifier,
            scorer,
            ranker,
            warmer,
            jobs: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Kick off the background jobs the configuration enables: the one-shot
    /// home feed warmup and the periodic trending refresh.
    pub fn start(&self) {
        let mut jobs = self.jobs.lock().expect("jobs lock poisoned");

        if self.config.jobs.warmup_enabled {
            let warmer = Arc::clone(&self.warmer);
            jobs.push(tokio::spawn(async move {
                warmer.warm_home_cache(Utc::now()).await;
            }));
        }
        if self.config.jobs.trending_refresh_enabled {
            let warmer = Arc::clone(&self.warmer);
            jobs.push(tokio::spawn(warmer.run_trending_refresh()));
        }
        info!(jobs = jobs.len(), "background jobs started");
    }

    /// Fire-and-continue interaction recording.
    pub async fn record(&self, draft: ActivityDraft) -> Result<()> {
        self.recorder.record(draft).await
    }

    /// Interaction recording with durability confirmation.
    pub async fn record_awaited(&self, draft: ActivityDraft) -> Result<()> {
        self.recorder.record_awaited(draft).await
    }

    /// Attribute a device's anonymous history to a user after login. Returns
    /// the number of events touched.
    pub async fn bind_device_history(&self, device_id: &str, user_id: i64) -> Result<u64> {
        self.recorder.bind_device_history(device_id, user_id).await
    }

    /// Remove a retired device's lock entry.
    pub fn retire_device(&self, device_id: &str) -> Result<()> {
        self.recorder.retire_device(device_id)
    }

    /// Build the four-section personalized feed for the current clock.
    pub async fn build_feed(&self, request: &FeedRequest) -> Result<PersonalizedFeed> {
        self.build_feed_at(request, Utc::now()).await
    }

    /// Deterministic-clock variant, used by tests and replay tooling.
    pub async fn build_feed_at(
        &self,
        request: &FeedRequest,
        now: DateTime<Utc>,
    ) -> Result<PersonalizedFeed> {
        self.ranker.build_feed(request, now).await
    }

    /// Trending score and growth rate for one shop.
    pub async fn trending_snapshot(&self, shop_id: i64) -> Result<TrendingSnapshot> {
        self.scorer.snapshot(shop_id, Utc::now()).await
    }

    /// The caller's engagement segment.
    pub async fn segment_for_user(&self, user_id: i64) -> UserSegment {
        self.classifier.classify_segment(user_id, Utc::now()).await
    }

    /// The current meal-period context.
    pub fn time_context(&self) -> TimeContext {
        self.classifier.classify_time(Utc::now())
    }

    /// Tracked device locks, for the metrics endpoint.
    pub fn device_lock_count(&self) -> usize {
        self.recorder.device_lock_count()
    }

    /// Approximate entries in one cache bucket, for the metrics endpoint.
    pub fn cache_entry_count(&self, name: CacheName) -> u64 {
        self.cache.entry_count(name)
    }

    /// Outstanding persistence tasks.
    pub fn io_in_flight(&self) -> usize {
        self.executor.io_in_flight()
    }

    /// Stop background jobs, then drain the pools within the configured
    /// shutdown timeout. Idempotent.
    pub async fn shutdown(&self) {
        let jobs = {
            let mut guard = self.jobs.lock().expect("jobs lock poisoned");
            std::mem::take(&mut *guard)
        };
        for handle in jobs {
            handle.abort();
        }
        self.executor.shutdown().await;
        info!("feed engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryActivityStore, MemoryShopDirectory};
    use std::time::Duration;

    fn engine() -> (Arc<MemoryActivityStore>, FeedEngine) {
        let activity = Arc::new(MemoryActivityStore::new());
        let directory = Arc::new(MemoryShopDirectory::new());
        let engine = FeedEngine::new(
            Config::default(),
            activity.clone() as Arc<dyn ActivityStore>,
            directory as Arc<dyn ShopDirectory>,
        );
        (activity, engine)
    }

    #[tokio::test]
    async fn test_record_reaches_store_after_shutdown_drain() {
        let (activity, engine) = engine();
        engine
            .record(ActivityDraft {
                device_id: "dev-1".to_string(),
                user_id: None,
                activity_type: "VIEW_SHOP".to_string(),
                target_id: Some(1),
                query: None,
                latitude: None,
                longitude: None,
                occurred_at: None,
            })
            .await
            .unwrap();

        // Shutdown drains the I/O pool, so the append must have landed
        engine.shutdown().await;
        assert_eq!(activity.event_count(), 1);
        assert_eq!(engine.io_in_flight(), 0);
    }

    #[tokio::test]
    async fn test_start_and_shutdown_do_not_hang() {
        let (_activity, engine) = engine();
        engine.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Warmup populated the default home feed
        assert_eq!(engine.cache_entry_count(CacheName::HomeShops), 1);
        engine.shutdown().await;
        // Second shutdown is a no-op
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_segment_defaults_for_unknown_user() {
        let (_activity, engine) = engine();
        assert_eq!(engine.segment_for_user(404).await, UserSegment::Casual);
    }
}
