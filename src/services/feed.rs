//! Personalized feed assembly.
//!
//! Builds the four-section home feed in one pass: a relevance-ranked
//! for-you section, trending nearby, a favorites-derived section, and
//! recently added shops. Every shop carries its badges, a relevance score in
//! [0, 100], and a human-readable match reason. A feed read never fails on a
//! degraded collaborator; missing signals drop to neutral defaults.

use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CacheName, FeedCache};
use crate::config::FeedConfig;
use crate::error::Result;
use crate::models::{
    FeedMetadata, FeedSection, FeedSectionType, PersonalizedFeed, ShopBadge, ShopFeedItem,
    ShopSummary, TimeContext, UserProfile,
};
use crate::services::context::{relevant_categories, ContextClassifier};
use crate::services::trending::TrendingScorer;
use crate::store::ShopDirectory;
use crate::utils::haversine_km;

const HOME_FEED_KEY: &str = "home:default";
const FALLBACK_POOL_SIZE: usize = 50;

const CATEGORY_MATCH_POINTS: f64 = 40.0;
const TIME_MATCH_POINTS: f64 = 25.0;
const DISTANCE_POINTS: f64 = 30.0;
const UNKNOWN_DISTANCE_POINTS: f64 = 15.0;
const RATING_POINTS: f64 = 30.0;

/// Feed read parameters as they arrive from the HTTP layer. Everything is
/// optional: an anonymous request without coordinates still gets a feed.
#[derive(Debug, Clone, Default)]
pub struct FeedRequest {
    pub user_id: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius_km: Option<f64>,
}

/// Why a shop was included, surfaced to the client verbatim.
fn time_match_reason(context: TimeContext) -> String {
    format!(
        "Perfect for {}",
        context.as_str().to_lowercase().replace('_', " ")
    )
}

/// Relevance blend: category affinity (favorite category 40, time-relevant
/// category 25), proximity (30 scaled by distance, 15 when unknown), rating
/// (30 scaled out of five stars). Clamped to [0, 100].
fn relevance_score(
    shop: &ShopSummary,
    favorite_categories: &[String],
    context: TimeContext,
    distance_km: Option<f64>,
) -> (f64, String) {
    let favorite_match = favorite_categories
        .iter()
        .any(|c| c.eq_ignore_ascii_case(&shop.category));
    let time_match = relevant_categories(context)
        .iter()
        .any(|c| c.eq_ignore_ascii_case(&shop.category));

    let (category_points, reason) = if favorite_match {
        (
            CATEGORY_MATCH_POINTS,
            "Matches your favorite categories".to_string(),
        )
    } else if time_match {
        (TIME_MATCH_POINTS, time_match_reason(context))
    } else if distance_km.is_some() {
        (0.0, "Close to you".to_string())
    } else {
        (0.0, "Recommended for you".to_string())
    };

    let distance_points = match distance_km {
        Some(d) => DISTANCE_POINTS / (1.0 + d.max(0.0)),
        None => UNKNOWN_DISTANCE_POINTS,
    };
    let rating_points = RATING_POINTS * (shop.rating_avg / 5.0).clamp(0.0, 1.0);

    let score = (category_points + distance_points + rating_points).clamp(0.0, 100.0);
    (score, reason)
}

/// Catalog-derived badges that need no activity data.
fn static_badges(config: &FeedConfig, shop: &ShopSummary, now: DateTime<Utc>) -> BTreeSet<ShopBadge> {
    let mut badges = BTreeSet::new();
    if shop.rating_avg >= config.hidden_gem_min_rating
        && shop.rating_count > 0
        && shop.rating_count <= config.hidden_gem_max_ratings
    {
        badges.insert(ShopBadge::HiddenGem);
    }
    if (now - shop.created_at).num_days() <= config.new_shop_days {
        badges.insert(ShopBadge::New);
    }
    if shop.rating_count >= config.crowd_favorite_min_ratings
        && shop.favorite_count >= config.crowd_favorite_min_favorites
    {
        badges.insert(ShopBadge::CrowdFavorite);
    }
    badges
}

fn respects_diet(profile: Option<&UserProfile>, shop: &ShopSummary) -> bool {
    match profile {
        Some(p) => (!p.halal_only || shop.halal) && (!p.vegetarian_only || shop.vegetarian),
        None => true,
    }
}

fn rank_descending(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// A section candidate before badge resolution.
struct Candidate {
    shop: ShopSummary,
    distance_km: Option<f64>,
    relevance: f64,
    trending: f64,
    reason: String,
}

pub struct FeedRanker {
    directory: Arc<dyn ShopDirectory>,
    scorer: Arc<TrendingScorer>,
    classifier: Arc<ContextClassifier>,
    cache: Arc<FeedCache>,
    config: FeedConfig,
}

impl FeedRanker {
    pub fn new(
        directory: Arc<dyn ShopDirectory>,
        scorer: Arc<TrendingScorer>,
        classifier: Arc<ContextClassifier>,
        cache: Arc<FeedCache>,
        config: FeedConfig,
    ) -> Self {
        FeedRanker {
            directory,
            scorer,
            classifier,
            cache,
            config,
        }
    }

    /// Assemble the full four-section feed.
    ///
    /// The fully-default variant (no user, no coordinates, no radius
    /// override) is served from the homeShops bucket; everything else is
    /// computed per request on top of the finer-grained caches underneath.
    pub async fn build_feed(
        &self,
        request: &FeedRequest,
        now: DateTime<Utc>,
    ) -> Result<PersonalizedFeed> {
        let default_home = request.user_id.is_none()
            && request.latitude.is_none()
            && request.radius_km.is_none();
        if default_home {
            if let Some(feed) = self
                .cache
                .get::<PersonalizedFeed>(CacheName::HomeShops, HOME_FEED_KEY)
            {
                return Ok(feed);
            }
        }

        let time_context = self.classifier.classify_time(now);
        let segment = match request.user_id {
            Some(user_id) => Some(self.classifier.classify_segment(user_id, now).await),
            None => None,
        };

        let location = match (request.latitude, request.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        };
        let radius_km = request.radius_km.unwrap_or(self.config.default_radius_km);

        let profile = match request.user_id {
            Some(user_id) => self.directory.user_profile(user_id).await?,
            None => None,
        };
        let favorites = match request.user_id {
            Some(user_id) => self.directory.favorite_shops(user_id).await.unwrap_or_else(|e| {
                warn!(user_id, error = %e, "favorites lookup failed, personalizing without them");
                Vec::new()
            }),
            None => Vec::new(),
        };

        let pool = self.candidate_pool(location, radius_km).await?;
        let trending_scores = self.scorer.scores_for(&pool, now).await;

        let for_you = self.for_you_section(&pool, profile.as_ref(), time_context, location);
        let trending = self.trending_section(&pool, &trending_scores, location);
        let favorites_section = self
            .favorites_section(&favorites, profile.as_ref(), time_context, location, &trending)
            .await?;
        let new_section = self.new_shops_section(location, now).await?;

        let feed = self
            .materialize(
                for_you,
                trending,
                favorites_section,
                new_section,
                FeedMetadata {
                    generated_at: now,
                    user_segment: segment,
                    time_context,
                    location_used: location.is_some(),
                    radius_km,
                },
                now,
            )
            .await;

        if default_home {
            self.cache.put(CacheName::HomeShops, HOME_FEED_KEY, &feed);
            info!("default home feed recomputed and cached");
        }
        Ok(feed)
    }

    /// Shops the location-aware sections draw from: a radius query around the
    /// caller, or the top-rated catalog slice when no coordinates were sent.
    async fn candidate_pool(
        &self,
        location: Option<(f64, f64)>,
        radius_km: f64,
    ) -> Result<Vec<ShopSummary>> {
        match location {
            Some((lat, lon)) => {
                // Coordinates rounded to ~100m so nearby readers share entries
                let key = format!("{lat:.3}:{lon:.3}:{radius_km:.1}");
                if let Some(shops) = self
                    .cache
                    .get::<Vec<ShopSummary>>(CacheName::NearbyShops, &key)
                {
                    return Ok(shops);
                }
                let shops = self.directory.shops_near(lat, lon, radius_km).await?;
                self.cache.put(CacheName::NearbyShops, &key, &shops);
                Ok(shops)
            }
            None => self.directory.top_rated(FALLBACK_POOL_SIZE).await,
        }
    }

    fn distance_for(&self, shop: &ShopSummary, location: Option<(f64, f64)>) -> Option<f64> {
        location.map(|(lat, lon)| haversine_km(lat, lon, shop.latitude, shop.longitude))
    }

    fn for_you_section(
        &self,
        pool: &[ShopSummary],
        profile: Option<&UserProfile>,
        context: TimeContext,
        location: Option<(f64, f64)>,
    ) -> Vec<Candidate> {
        let favorite_categories: &[String] = profile
            .map(|p| p.favorite_categories.as_slice())
            .unwrap_or(&[]);

        let mut candidates: Vec<Candidate> = pool
            .iter()
            .filter(|shop| respects_diet(profile, shop))
            .map(|shop| {
                let distance = self.distance_for(shop, location);
                let (relevance, reason) =
                    relevance_score(shop, favorite_categories, context, distance);
                Candidate {
                    shop: shop.clone(),
                    distance_km: distance,
                    relevance,
                    trending: 0.0,
                    reason,
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            rank_descending(a.relevance, b.relevance)
                .then(rank_descending(a.shop.rating_avg, b.shop.rating_avg))
                .then(a.shop.id.cmp(&b.shop.id))
        });
        candidates
    }

    fn trending_section(
        &self,
        pool: &[ShopSummary],
        scores: &HashMap<i64, f64>,
        location: Option<(f64, f64)>,
    ) -> Vec<Candidate> {
        let reason = if location.is_some() {
            "Trending in your area"
        } else {
            "Trending shops"
        };

        // Every in-radius shop is listed, quiet ones included; the rating and
        // id tie-breaks order the zero-score tail deterministically.
        let mut candidates: Vec<Candidate> = pool
            .iter()
            .map(|shop| Candidate {
                shop: shop.clone(),
                distance_km: self.distance_for(shop, location),
                relevance: 0.0,
                trending: scores.get(&shop.id).copied().unwrap_or(0.0),
                reason: reason.to_string(),
            })
            .collect();

        candidates.sort_by(|a, b| {
            rank_descending(a.trending, b.trending)
                .then(rank_descending(a.shop.rating_avg, b.shop.rating_avg))
                .then(a.shop.id.cmp(&b.shop.id))
        });
        candidates
    }

    /// Shops in the categories the user favorites, excluding the favorites
    /// themselves. Users with no favorites yet get the trending list instead
    /// of an empty section.
    async fn favorites_section(
        &self,
        favorites: &[ShopSummary],
        profile: Option<&UserProfile>,
        context: TimeContext,
        location: Option<(f64, f64)>,
        trending: &[Candidate],
    ) -> Result<Vec<Candidate>> {
        if favorites.is_empty() {
            return Ok(trending
                .iter()
                .map(|c| Candidate {
                    shop: c.shop.clone(),
                    distance_km: c.distance_km,
                    relevance: c.relevance,
                    trending: c.trending,
                    reason: "Trending shops".to_string(),
                })
                .collect());
        }

        let mut categories: Vec<String> =
            favorites.iter().map(|shop| shop.category.clone()).collect();
        if let Some(p) = profile {
            categories.extend(p.favorite_categories.iter().cloned());
        }
        categories.sort();
        categories.dedup();

        let favorite_ids: HashSet<i64> = favorites.iter().map(|shop| shop.id).collect();
        let similar = self.directory.shops_by_categories(&categories).await?;

        let mut candidates: Vec<Candidate> = similar
            .into_iter()
            .filter(|shop| !favorite_ids.contains(&shop.id) && respects_diet(profile, shop))
            .map(|shop| {
                let distance = self.distance_for(&shop, location);
                let (relevance, _) = relevance_score(&shop, &categories, context, distance);
                Candidate {
                    shop,
                    distance_km: distance,
                    relevance,
                    trending: 0.0,
                    reason: "Similar to your favorites".to_string(),
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            rank_descending(a.relevance, b.relevance)
                .then(rank_descending(a.shop.rating_avg, b.shop.rating_avg))
                .then(a.shop.id.cmp(&b.shop.id))
        });
        Ok(candidates)
    }

    async fn new_shops_section(
        &self,
        location: Option<(f64, f64)>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candidate>> {
        let since = now - Duration::days(self.config.new_shop_days);
        let mut recent = self.directory.recent_shops(since).await?;
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        Ok(recent
            .into_iter()
            .map(|shop| {
                let distance = self.distance_for(&shop, location);
                Candidate {
                    shop,
                    distance_km: distance,
                    relevance: 0.0,
                    trending: 0.0,
                    reason: if distance.is_some() {
                        "Recently added near you".to_string()
                    } else {
                        "Recently added".to_string()
                    },
                }
            })
            .collect())
    }

    /// Resolve badges for every shop emitted across the four sections, then
    /// cut each section down to the configured limit.
    async fn materialize(
        &self,
        for_you: Vec<Candidate>,
        trending: Vec<Candidate>,
        favorites: Vec<Candidate>,
        new_shops: Vec<Candidate>,
        metadata: FeedMetadata,
        now: DateTime<Utc>,
    ) -> PersonalizedFeed {
        let limit = self.config.section_limit;
        let emitted: Vec<&ShopSummary> = for_you
            .iter()
            .take(limit)
            .chain(trending.iter().take(limit))
            .chain(favorites.iter().take(limit))
            .chain(new_shops.iter().take(limit))
            .map(|c| &c.shop)
            .collect();
        let badges = self.badge_map(&emitted, now).await;

        let location_used = metadata.location_used;
        let description = metadata.time_context.description().to_string();
        PersonalizedFeed {
            for_you_now: self.section(
                FeedSectionType::ForYou,
                "For You Right Now",
                description,
                for_you,
                &badges,
            ),
            trending_nearby: self.section(
                FeedSectionType::TrendingNearby,
                "Trending Nearby",
                if location_used {
                    "What's popular around you".to_string()
                } else {
                    "What's popular right now".to_string()
                },
                trending,
                &badges,
            ),
            based_on_favorites: self.section(
                FeedSectionType::BasedOnFavorites,
                "Because You Favorited",
                "More places like the ones you love".to_string(),
                favorites,
                &badges,
            ),
            new_shops: self.section(
                FeedSectionType::NewShops,
                "New on the Scene",
                "Fresh places added recently".to_string(),
                new_shops,
                &badges,
            ),
            metadata,
        }
    }

    fn section(
        &self,
        section_type: FeedSectionType,
        title: &str,
        description: String,
        candidates: Vec<Candidate>,
        badges: &HashMap<i64, BTreeSet<ShopBadge>>,
    ) -> FeedSection {
        let total_count = candidates.len();
        let items: Vec<ShopFeedItem> = candidates
            .into_iter()
            .take(self.config.section_limit)
            .map(|c| {
                ShopFeedItem {
                    shop_id: c.shop.id,
                    name: c.shop.name,
                    category: c.shop.category,
                    sub_category: c.shop.sub_category,
                    township: c.shop.township,
                    rating_avg: c.shop.rating_avg,
                    rating_count: c.shop.rating_count,
                    distance_km: c.distance_km,
                    badges: badges.get(&c.shop.id).cloned().unwrap_or_default(),
                    relevance_score: c.relevance,
                    trending_score: c.trending,
                    match_reason: c.reason,
                }
            })
            .collect();

        debug!(
            section = ?section_type,
            emitted = items.len(),
            total = total_count,
            "feed section assembled"
        );
        FeedSection {
            section_type,
            title: title.to_string(),
            description,
            items,
            total_count,
        }
    }

    /// Trending and catalog badges for the emitted shops, one trending
    /// recompute per spatial bucket.
    async fn badge_map(
        &self,
        shops: &[&ShopSummary],
        now: DateTime<Utc>,
    ) -> HashMap<i64, BTreeSet<ShopBadge>> {
        let mut townships: Vec<&str> = shops.iter().map(|s| s.township.as_str()).collect();
        townships.sort_unstable();
        townships.dedup();

        let mut trending_ids: HashSet<i64> = HashSet::new();
        for township in townships {
            match self.directory.shops_in_township(township).await {
                Ok(bucket) => {
                    trending_ids.extend(self.scorer.top_ids(township, &bucket, now).await);
                }
                Err(e) => {
                    warn!(township, error = %e, "township lookup failed, skipping trending badges");
                }
            }
        }

        let mut map: HashMap<i64, BTreeSet<ShopBadge>> = HashMap::with_capacity(shops.len());
        for shop in shops {
            if map.contains_key(&shop.id) {
                continue;
            }
            let mut badges = static_badges(&self.config, shop, now);
            if trending_ids.contains(&shop.id) {
                badges.insert(ShopBadge::TrendingNow);
            }
            if self.scorer.is_rising_star(shop.id, now).await {
                badges.insert(ShopBadge::RisingStar);
            }
            map.insert(shop.id, badges);
        }
        map
    }
}
