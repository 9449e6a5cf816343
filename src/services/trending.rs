//! Decaying popularity scores from recent event velocity.
//!
//! Each qualifying event contributes `weight(type) * exp(-age_hours /
//! half_life_hours)`: views weigh 1.0, high-intent conversions (directions,
//! call, share) several times more, and recency dominates through the decay.

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{CacheName, FeedCache};
use crate::config::TrendingConfig;
use crate::error::Result;
use crate::models::{ActivityType, ShopSummary, TrendingSnapshot};
use crate::store::ActivityStore;

const GROWTH_WINDOW_HOURS: f64 = 48.0;
const BASELINE_WINDOW_HOURS: f64 = 7.0 * 24.0;

/// Single event contribution after exponential decay.
pub fn decayed_contribution(weight: f64, age_hours: f64, half_life_hours: f64) -> f64 {
    weight * (-age_hours.max(0.0) / half_life_hours).exp()
}

pub struct TrendingScorer {
    store: Arc<dyn ActivityStore>,
    cache: Arc<FeedCache>,
    config: TrendingConfig,
}

impl TrendingScorer {
    pub fn new(store: Arc<dyn ActivityStore>, cache: Arc<FeedCache>, config: TrendingConfig) -> Self {
        TrendingScorer {
            store,
            cache,
            config,
        }
    }

    fn weight(&self, activity_type: ActivityType) -> f64 {
        if activity_type.is_conversion() {
            self.config.conversion_weight
        } else if activity_type == ActivityType::ViewShop {
            self.config.view_weight
        } else {
            0.0
        }
    }

    /// Decayed score over the default window. Zero qualifying events score
    /// exactly 0; the result is never negative.
    pub async fn score(&self, shop_id: i64, now: DateTime<Utc>) -> Result<f64> {
        self.score_in_window(shop_id, Duration::days(self.config.window_days), now)
            .await
    }

    /// Decayed score over an explicit window.
    pub async fn score_in_window(
        &self,
        shop_id: i64,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<f64> {
        let events = self
            .store
            .events_for_shop_since(shop_id, now - window)
            .await?;

        let mut score = 0.0;
        for event in &events {
            let weight = self.weight(event.activity_type);
            if weight == 0.0 {
                continue;
            }
            let age_hours = (now - event.occurred_at).num_seconds() as f64 / 3600.0;
            score += decayed_contribution(weight, age_hours, self.config.half_life_hours);
        }
        Ok(score)
    }

    /// Score with the newness boost applied: shops in their launch phase get
    /// extra velocity so new places can surface at all.
    pub async fn score_shop(&self, shop: &ShopSummary, now: DateTime<Utc>) -> Result<f64> {
        let base = self.score(shop.id, now).await?;
        Ok(base * newness_multiplier(shop.created_at, now))
    }

    /// Scores for a candidate set, computed concurrently. Per-shop failures
    /// degrade to 0.0 with a warning; a scoring error must never fail a feed
    /// read.
    pub async fn scores_for(
        &self,
        shops: &[ShopSummary],
        now: DateTime<Utc>,
    ) -> HashMap<i64, f64> {
        let scored = join_all(shops.iter().map(|shop| async move {
            let score = match self.score_shop(shop, now).await {
                Ok(score) => score,
                Err(e) => {
                    warn!(shop_id = shop.id, error = %e, "trending score failed, defaulting to 0");
                    0.0
                }
            };
            (shop.id, score)
        }))
        .await;
        scored.into_iter().collect()
    }

    /// Top-N shop ids by trending score within one spatial bucket, cached in
    /// the trendingShops bucket. These earn the TRENDING_NOW badge.
    pub async fn top_ids(
        &self,
        township: &str,
        bucket_shops: &[ShopSummary],
        now: DateTime<Utc>,
    ) -> HashSet<i64> {
        let key = format!("township:{township}");
        if let Some(ids) = self.cache.get::<Vec<i64>>(CacheName::TrendingShops, &key) {
            return ids.into_iter().collect();
        }

        let scores = self.scores_for(bucket_shops, now).await;
        let mut ranked: Vec<&ShopSummary> = bucket_shops.iter().collect();
        ranked.sort_by(|a, b| {
            let sa = scores.get(&a.id).copied().unwrap_or(0.0);
            let sb = scores.get(&b.id).copied().unwrap_or(0.0);
            sb.partial_cmp(&sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.rating_avg
                        .partial_cmp(&a.rating_avg)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.id.cmp(&b.id))
        });

        let ids: Vec<i64> = ranked
            .into_iter()
            .take(self.config.badge_top_n)
            .filter(|s| scores.get(&s.id).copied().unwrap_or(0.0) > 0.0)
            .map(|s| s.id)
            .collect();

        self.cache.put(CacheName::TrendingShops, &key, &ids);
        debug!(township, top = ids.len(), "trending bucket recomputed");
        ids.into_iter().collect()
    }

    /// Velocity ratio: weighted event volume over the trailing 48h against
    /// the 7-day baseline prorated to 48h. Returns 0 when there is no
    /// baseline to compare against.
    pub async fn growth_rate(&self, shop_id: i64, now: DateTime<Utc>) -> Result<f64> {
        let events = self
            .store
            .events_for_shop_since(shop_id, now - Duration::days(self.config.window_days))
            .await?;

        let mut recent = 0.0;
        let mut weekly = 0.0;
        for event in &events {
            let weight = self.weight(event.activity_type);
            if weight == 0.0 {
                continue;
            }
            let age_hours = (now - event.occurred_at).num_seconds() as f64 / 3600.0;
            weekly += weight;
            if age_hours <= GROWTH_WINDOW_HOURS {
                recent += weight;
            }
        }

        let baseline = weekly * (GROWTH_WINDOW_HOURS / BASELINE_WINDOW_HOURS);
        if baseline <= f64::EPSILON {
            return Ok(0.0);
        }
        Ok(recent / baseline)
    }

    /// Whether the shop qualifies for the RISING_STAR badge.
    pub async fn is_rising_star(&self, shop_id: i64, now: DateTime<Utc>) -> bool {
        match self.growth_rate(shop_id, now).await {
            Ok(rate) => rate >= self.config.rising_star_multiplier,
            Err(e) => {
                warn!(shop_id, error = %e, "growth rate failed, withholding badge");
                false
            }
        }
    }

    /// Read-only snapshot for the admin/analytics collaborator.
    pub async fn snapshot(&self, shop_id: i64, now: DateTime<Utc>) -> Result<TrendingSnapshot> {
        Ok(TrendingSnapshot {
            shop_id,
            score: self.score(shop_id, now).await?,
            growth_rate: self.growth_rate(shop_id, now).await?,
            computed_at: now,
        })
    }

    /// Drop the cached top-N for the township an event touched; the next feed
    /// read recomputes it.
    pub fn invalidate_township(&self, township: &str) {
        self.cache
            .invalidate(CacheName::TrendingShops, &format!("township:{township}"));
    }
}

/// Launch-phase velocity boost: 2.0x within 14 days of creation, 1.5x within
/// 30 days, 1.0x after.
pub fn newness_multiplier(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let days_old = (now - created_at).num_days();
    if days_old <= 14 {
        2.0
    } else if days_old <= 30 {
        1.5
    } else {
        1.0
    }
}
