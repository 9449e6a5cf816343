//! Time-of-day and user-segment classification.

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{CacheName, FeedCache};
use crate::config::SegmentConfig;
use crate::models::{EngagementSummary, TimeContext, UserSegment};
use crate::store::ActivityStore;

/// Pure meal-period classification from wall-clock time.
///
/// BREAKFAST [06:00,10:00), LUNCH [11:00,14:00), DINNER [17:00,21:00),
/// LATE_NIGHT [21:00,02:00) wrapping midnight, ANYTIME otherwise.
pub fn time_context_for(time: NaiveTime) -> TimeContext {
    let hour = time.hour();
    if (6..10).contains(&hour) {
        TimeContext::Breakfast
    } else if (11..14).contains(&hour) {
        TimeContext::Lunch
    } else if (17..21).contains(&hour) {
        TimeContext::Dinner
    } else if hour >= 21 || hour < 2 {
        TimeContext::LateNight
    } else {
        TimeContext::Anytime
    }
}

/// Shop categories that fit a time context, used to bias the for-you section.
pub fn relevant_categories(context: TimeContext) -> &'static [&'static str] {
    match context {
        TimeContext::Breakfast => &["Cafe", "Coffee Shop", "Bakery", "Breakfast", "Tea Shop"],
        TimeContext::Lunch => &[
            "Restaurant",
            "Fast Food",
            "Noodle Shop",
            "Rice Shop",
            "Cafe",
            "Food Court",
        ],
        TimeContext::Dinner => &[
            "Restaurant",
            "Fine Dining",
            "BBQ",
            "Hot Pot",
            "Seafood",
            "Steakhouse",
        ],
        TimeContext::LateNight => &["Bar", "Pub", "Night Club", "Late Night Eatery", "Street Food"],
        TimeContext::Anytime => &[
            "Cafe",
            "Restaurant",
            "Fast Food",
            "Dessert",
            "Ice Cream",
            "Snacks",
        ],
    }
}

/// Pure segment classification. Evaluation order is part of the contract:
/// NEW_USER takes precedence over DORMANT, so a user who registered two days
/// ago and went quiet is NEW_USER, not DORMANT.
pub fn segment_for(
    config: &SegmentConfig,
    now: DateTime<Utc>,
    engagement: &EngagementSummary,
) -> UserSegment {
    let days_since_registration = (now - engagement.registered_at).num_days();
    if days_since_registration < config.new_user_days {
        return UserSegment::NewUser;
    }
    if engagement.activities_last_30d == 0 {
        return UserSegment::Dormant;
    }
    if engagement.activities_last_7d >= config.power_user_recent_threshold
        || engagement_score(engagement) >= config.power_user_engagement_score
    {
        return UserSegment::PowerUser;
    }
    UserSegment::Casual
}

/// Blended engagement score in [0, 100]: activities 40%, favorites 30%,
/// reviews 30%, each capped before weighting.
pub fn engagement_score(engagement: &EngagementSummary) -> f64 {
    let activity = (engagement.total_activities as f64 / 100.0).min(1.0) * 40.0;
    let favorite = (engagement.total_favorites as f64 / 20.0).min(1.0) * 30.0;
    let review = (engagement.total_reviews as f64 / 10.0).min(1.0) * 30.0;
    activity + favorite + review
}

/// Derives TimeContext and UserSegment, caching both: time context per
/// 15-minute bucket, segment per user for an hour.
pub struct ContextClassifier {
    store: Arc<dyn ActivityStore>,
    cache: Arc<FeedCache>,
    config: SegmentConfig,
}

impl ContextClassifier {
    pub fn new(store: Arc<dyn ActivityStore>, cache: Arc<FeedCache>, config: SegmentConfig) -> Self {
        ContextClassifier {
            store,
            cache,
            config,
        }
    }

    /// Current meal period, cached per 15-minute bucket to avoid recompute
    /// storms while still tracking meal transitions.
    pub fn classify_time(&self, now: DateTime<Utc>) -> TimeContext {
        let bucket = now.timestamp().div_euclid(15 * 60);
        let key = format!("bucket:{bucket}");

        if let Some(cached) = self.cache.get::<TimeContext>(CacheName::TimeContext, &key) {
            return cached;
        }
        let context = time_context_for(now.time());
        self.cache.put(CacheName::TimeContext, &key, &context);
        context
    }

    /// Engagement tier for a user, cached for an hour. Unknown users and
    /// classification failures fall back to CASUAL so a feed read never fails
    /// on a segmentation hiccup.
    pub async fn classify_segment(&self, user_id: i64, now: DateTime<Utc>) -> UserSegment {
        let key = format!("user:{user_id}");
        if let Some(cached) = self.cache.get::<UserSegment>(CacheName::UserSegment, &key) {
            return cached;
        }

        let segment = match self.store.engagement_for_user(user_id, now).await {
            Ok(Some(engagement)) => segment_for(&self.config, now, &engagement),
            Ok(None) => {
                debug!(user_id, "no engagement history, defaulting segment");
                UserSegment::Casual
            }
            Err(e) => {
                warn!(user_id, error = %e, "segment classification failed, serving default");
                return UserSegment::Casual;
            }
        };

        self.cache.put(CacheName::UserSegment, &key, &segment);
        segment
    }

    /// Drop a user's cached segment, e.g. after device history binding
    /// changes their activity counts.
    pub fn invalidate_segment(&self, user_id: i64) {
        self.cache
            .invalidate(CacheName::UserSegment, &format!("user:{user_id}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_time_context_ranges() {
        assert_eq!(time_context_for(t(6, 0)), TimeContext::Breakfast);
        assert_eq!(time_context_for(t(9, 59)), TimeContext::Breakfast);
        assert_eq!(time_context_for(t(11, 0)), TimeContext::Lunch);
        assert_eq!(time_context_for(t(13, 59)), TimeContext::Lunch);
        assert_eq!(time_context_for(t(17, 0)), TimeContext::Dinner);
        assert_eq!(time_context_for(t(20, 59)), TimeContext::Dinner);
        assert_eq!(time_context_for(t(21, 0)), TimeContext::LateNight);
        assert_eq!(time_context_for(t(1, 59)), TimeContext::LateNight);
    }

    #[test]
    fn test_time_context_boundary_gaps_are_anytime() {
        // 10:00 falls in the gap before lunch, not in LUNCH
        assert_eq!(time_context_for(t(10, 0)), TimeContext::Anytime);
        assert_eq!(time_context_for(t(2, 0)), TimeContext::Anytime);
        assert_eq!(time_context_for(t(5, 59)), TimeContext::Anytime);
        assert_eq!(time_context_for(t(14, 0)), TimeContext::Anytime);
        assert_eq!(time_context_for(t(16, 59)), TimeContext::Anytime);
    }

    fn engagement(
        now: DateTime<Utc>,
        registered_days_ago: i64,
        total: u64,
        last_7d: u64,
        last_30d: u64,
    ) -> EngagementSummary {
        EngagementSummary {
            registered_at: now - Duration::days(registered_days_ago),
            total_activities: total,
            activities_last_7d: last_7d,
            activities_last_30d: last_30d,
            total_favorites: 0,
            total_reviews: 0,
        }
    }

    #[test]
    fn test_new_user_takes_precedence_over_dormant() {
        let config = SegmentConfig::default();
        let now = Utc::now();
        // Registered 1 day ago, zero activity since: NEW_USER, never DORMANT
        let e = engagement(now, 1, 0, 0, 0);
        assert_eq!(segment_for(&config, now, &e), UserSegment::NewUser);
    }

    #[test]
    fn test_dormant_after_thirty_quiet_days() {
        let config = SegmentConfig::default();
        let now = Utc::now();
        let e = engagement(now, 120, 50, 0, 0);
        assert_eq!(segment_for(&config, now, &e), UserSegment::Dormant);
    }

    #[test]
    fn test_power_user_by_recent_activity() {
        let config = SegmentConfig::default();
        let now = Utc::now();
        let e = engagement(now, 120, 80, 25, 40);
        assert_eq!(segment_for(&config, now, &e), UserSegment::PowerUser);
    }

    #[test]
    fn test_power_user_by_engagement_blend() {
        let config = SegmentConfig::default();
        let now = Utc::now();
        let mut e = engagement(now, 120, 90, 5, 30);
        e.total_favorites = 20;
        e.total_reviews = 10;
        // 36 + 30 + 30 >= 50
        assert!(engagement_score(&e) >= config.power_user_engagement_score);
        assert_eq!(segment_for(&config, now, &e), UserSegment::PowerUser);
    }

    #[test]
    fn test_casual_otherwise() {
        let config = SegmentConfig::default();
        let now = Utc::now();
        let e = engagement(now, 120, 10, 3, 8);
        assert_eq!(segment_for(&config, now, &e), UserSegment::Casual);
    }

    #[tokio::test]
    async fn test_segment_served_from_cache_until_invalidated() {
        use crate::config::CacheSettings;
        use crate::models::{ActivityEvent, ActivityType};
        use crate::store::memory::MemoryActivityStore;
        use crate::store::ActivityStore;

        let store = Arc::new(MemoryActivityStore::new());
        let cache = Arc::new(FeedCache::new(&CacheSettings::default()));
        let classifier = ContextClassifier::new(
            store.clone() as Arc<dyn ActivityStore>,
            cache,
            SegmentConfig::default(),
        );

        let now = Utc::now();
        store.register_user(1, now - Duration::days(100));
        assert_eq!(
            classifier.classify_segment(1, now).await,
            UserSegment::Dormant
        );

        store
            .append(ActivityEvent {
                device_id: "dev-1".to_string(),
                user_id: Some(1),
                activity_type: ActivityType::ViewShop,
                target_id: None,
                query: None,
                latitude: None,
                longitude: None,
                occurred_at: now - Duration::days(1),
            })
            .await
            .unwrap();

        // Fresh activity is invisible while the hour-long cache entry lives
        assert_eq!(
            classifier.classify_segment(1, now).await,
            UserSegment::Dormant
        );

        classifier.invalidate_segment(1);
        assert_eq!(
            classifier.classify_segment(1, now).await,
            UserSegment::Casual
        );
    }
}
