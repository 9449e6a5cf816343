//! Pre-populates hot cache buckets so the first readers after a deploy do
//! not all pay the cold-compute cost. Warmup is strictly best-effort: any
//! failure is logged and swallowed, the engine starts regardless.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::config::JobsConfig;
use crate::services::feed::{FeedRanker, FeedRequest};
use crate::services::trending::TrendingScorer;
use crate::store::ShopDirectory;

pub struct CacheWarmer {
    ranker: Arc<FeedRanker>,
    scorer: Arc<TrendingScorer>,
    directory: Arc<dyn ShopDirectory>,
    config: JobsConfig,
}

impl CacheWarmer {
    pub fn new(
        ranker: Arc<FeedRanker>,
        scorer: Arc<TrendingScorer>,
        directory: Arc<dyn ShopDirectory>,
        config: JobsConfig,
    ) -> Self {
        CacheWarmer {
            ranker,
            scorer,
            directory,
            config,
        }
    }

    /// One-shot startup warm of the default home feed.
    pub async fn warm_home_cache(&self, now: DateTime<Utc>) {
        match self.ranker.build_feed(&FeedRequest::default(), now).await {
            Ok(feed) => {
                info!(
                    for_you = feed.for_you_now.items.len(),
                    trending = feed.trending_nearby.items.len(),
                    "home feed cache warmed"
                );
            }
            Err(e) => {
                warn!(error = %e, "home feed warmup failed, serving cold");
            }
        }
    }

    /// Recompute the trending top-N for every township. Per-township failures
    /// are logged and skipped so one bad bucket never starves the rest.
    pub async fn refresh_trending(&self, now: DateTime<Utc>) {
        let townships = match self.directory.townships().await {
            Ok(townships) => townships,
            Err(e) => {
                warn!(error = %e, "township listing failed, skipping trending refresh");
                return;
            }
        };

        let mut refreshed = 0;
        for township in &townships {
            match self.directory.shops_in_township(township).await {
                Ok(bucket) => {
                    self.scorer.invalidate_township(township);
                    self.scorer.top_ids(township, &bucket, now).await;
                    refreshed += 1;
                }
                Err(e) => {
                    warn!(township, error = %e, "township refresh failed, keeping stale entry");
                }
            }
        }
        info!(refreshed, total = townships.len(), "trending buckets refreshed");
    }

    /// Periodic trending refresh loop. Runs until the owning task is aborted;
    /// the first tick fires immediately after startup.
    pub async fn run_trending_refresh(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.trending_refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.refresh_trending(Utc::now()).await;
        }
    }
}
