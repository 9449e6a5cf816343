use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

use crate::error::AppError;

/// Tracked interaction kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityType {
    SearchQuery,
    ViewShop,
    ViewCategory,
    ViewNearby,
    ClickDirections,
    ClickCall,
    ClickWebsite,
    ClickShare,
}

impl ActivityType {
    pub const ALL: [ActivityType; 8] = [
        ActivityType::SearchQuery,
        ActivityType::ViewShop,
        ActivityType::ViewCategory,
        ActivityType::ViewNearby,
        ActivityType::ClickDirections,
        ActivityType::ClickCall,
        ActivityType::ClickWebsite,
        ActivityType::ClickShare,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::SearchQuery => "SEARCH_QUERY",
            ActivityType::ViewShop => "VIEW_SHOP",
            ActivityType::ViewCategory => "VIEW_CATEGORY",
            ActivityType::ViewNearby => "VIEW_NEARBY",
            ActivityType::ClickDirections => "CLICK_DIRECTIONS",
            ActivityType::ClickCall => "CLICK_CALL",
            ActivityType::ClickWebsite => "CLICK_WEBSITE",
            ActivityType::ClickShare => "CLICK_SHARE",
        }
    }

    /// High-intent actions (directions, call, share) count much more toward
    /// trending than plain views.
    pub fn is_conversion(&self) -> bool {
        matches!(
            self,
            ActivityType::ClickDirections | ActivityType::ClickCall | ActivityType::ClickShare
        )
    }

    /// Whether the event type feeds the trending score at all.
    pub fn is_trending_signal(&self) -> bool {
        matches!(self, ActivityType::ViewShop) || self.is_conversion()
    }
}

impl FromStr for ActivityType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| AppError::InvalidActivityType(s.to_string()))
    }
}

/// Raw interaction as it arrives from the HTTP layer. The activity type is
/// still a string here; [`crate::services::ActivityRecorder::record`]
/// validates it against the enumerated set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityDraft {
    pub device_id: String,
    pub user_id: Option<i64>,
    pub activity_type: String,
    pub target_id: Option<i64>,
    pub query: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Immutable interaction event. Append-only: created once, never mutated,
/// later aggregated by the classifier and scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub device_id: String,
    pub user_id: Option<i64>,
    pub activity_type: ActivityType,
    pub target_id: Option<i64>,
    pub query: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub occurred_at: DateTime<Utc>,
}

/// Meal-period contexts, derived from wall-clock time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeContext {
    Breakfast,
    Lunch,
    Dinner,
    LateNight,
    Anytime,
}

impl TimeContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeContext::Breakfast => "BREAKFAST",
            TimeContext::Lunch => "LUNCH",
            TimeContext::Dinner => "DINNER",
            TimeContext::LateNight => "LATE_NIGHT",
            TimeContext::Anytime => "ANYTIME",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            TimeContext::Breakfast => "Perfect for breakfast",
            TimeContext::Lunch => "Great lunch spots",
            TimeContext::Dinner => "Dinner recommendations",
            TimeContext::LateNight => "Open late night",
            TimeContext::Anytime => "Available anytime",
        }
    }
}

/// Engagement tiers. Derived, never stored as source of truth; cached with a
/// one-hour TTL per user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserSegment {
    NewUser,
    Casual,
    PowerUser,
    Dormant,
}

impl UserSegment {
    pub fn description(&self) -> &'static str {
        match self {
            UserSegment::NewUser => "Welcome! Discovering new places",
            UserSegment::Casual => "Occasional explorer",
            UserSegment::PowerUser => "Food enthusiast",
            UserSegment::Dormant => "Welcome back!",
        }
    }
}

/// Display badges, zero or more per shop per feed render. Purely derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShopBadge {
    TrendingNow,
    RisingStar,
    HiddenGem,
    New,
    CrowdFavorite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedSectionType {
    ForYou,
    TrendingNearby,
    BasedOnFavorites,
    NewShops,
}

/// Catalog projection of a shop, as served by the directory collaborator.
/// `township` doubles as the spatial bucket for trending comparisons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopSummary {
    pub id: i64,
    pub name: String,
    pub category: String,
    pub sub_category: Option<String>,
    pub township: String,
    pub latitude: f64,
    pub longitude: f64,
    pub rating_avg: f64,
    pub rating_count: u32,
    pub favorite_count: u32,
    pub halal: bool,
    pub vegetarian: bool,
    pub price_tier: u8,
    pub created_at: DateTime<Utc>,
}

/// Declared preferences consulted when personalizing the for-you section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub registered_at: DateTime<Utc>,
    pub favorite_categories: Vec<String>,
    pub halal_only: bool,
    pub vegetarian_only: bool,
    pub price_tier: Option<u8>,
}

/// Aggregated activity counts backing segment classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementSummary {
    pub registered_at: DateTime<Utc>,
    pub total_activities: u64,
    pub activities_last_7d: u64,
    pub activities_last_30d: u64,
    pub total_favorites: u64,
    pub total_reviews: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopFeedItem {
    pub shop_id: i64,
    pub name: String,
    pub category: String,
    pub sub_category: Option<String>,
    pub township: String,
    pub rating_avg: f64,
    pub rating_count: u32,
    pub distance_km: Option<f64>,
    pub badges: BTreeSet<ShopBadge>,
    /// Weighted blend of category match, distance penalty and rating, in [0, 100].
    pub relevance_score: f64,
    pub trending_score: f64,
    pub match_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSection {
    pub section_type: FeedSectionType,
    pub title: String,
    pub description: String,
    pub items: Vec<ShopFeedItem>,
    pub total_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedMetadata {
    pub generated_at: DateTime<Utc>,
    pub user_segment: Option<UserSegment>,
    pub time_context: TimeContext,
    pub location_used: bool,
    pub radius_km: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalizedFeed {
    pub for_you_now: FeedSection,
    pub trending_nearby: FeedSection,
    pub based_on_favorites: FeedSection,
    pub new_shops: FeedSection,
    pub metadata: FeedMetadata,
}

/// Read-only trending view exposed to the admin/analytics collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendingSnapshot {
    pub shop_id: i64,
    pub score: f64,
    pub growth_rate: f64,
    pub computed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_type_parse_round_trip() {
        for t in ActivityType::ALL {
            assert_eq!(ActivityType::from_str(t.as_str()).unwrap(), t);
        }
    }

    #[test]
    fn test_activity_type_parse_rejects_unknown() {
        let err = ActivityType::from_str("VIEW_EVERYTHING").unwrap_err();
        assert!(matches!(err, AppError::InvalidActivityType(_)));
    }

    #[test]
    fn test_conversion_types() {
        assert!(ActivityType::ClickDirections.is_conversion());
        assert!(ActivityType::ClickCall.is_conversion());
        assert!(ActivityType::ClickShare.is_conversion());
        assert!(!ActivityType::ClickWebsite.is_conversion());
        assert!(!ActivityType::ViewShop.is_conversion());
        assert!(ActivityType::ViewShop.is_trending_signal());
        assert!(!ActivityType::SearchQuery.is_trending_signal());
    }

    #[test]
    fn test_enum_wire_format() {
        let json = serde_json::to_string(&ActivityType::ClickDirections).unwrap();
        assert_eq!(json, "\"CLICK_DIRECTIONS\"");
        let json = serde_json::to_string(&UserSegment::PowerUser).unwrap();
        assert_eq!(json, "\"POWER_USER\"");
        let json = serde_json::to_string(&TimeContext::LateNight).unwrap();
        assert_eq!(json, "\"LATE_NIGHT\"");
        let json = serde_json::to_string(&ShopBadge::CrowdFavorite).unwrap();
        assert_eq!(json, "\"CROWD_FAVORITE\"");
    }
}
