//! External collaborator seams.
//!
//! The engine never issues raw storage calls; persistence and the shop
//! catalog sit behind these traits. Production wires database-backed
//! implementations; [`memory`] provides the in-process reference used by
//! tests and cache warmup demos.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{ActivityEvent, EngagementSummary, ShopSummary, UserProfile};

/// Append-only event persistence.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Append one immutable event.
    async fn append(&self, event: ActivityEvent) -> Result<()>;

    /// All events recorded for a device, anonymous or attributed.
    async fn events_for_device(&self, device_id: &str) -> Result<Vec<ActivityEvent>>;

    /// Attribute every anonymous event of the device to the user. Returns the
    /// number of rows touched. Idempotent: already-attributed events are left
    /// alone, so a second identical call returns 0 and changes nothing.
    async fn reattribute_device(&self, device_id: &str, user_id: i64) -> Result<u64>;

    /// Events targeting a shop since the given instant (trending input).
    async fn events_for_shop_since(
        &self,
        shop_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<ActivityEvent>>;

    /// Registration age and activity counts for segment classification.
    /// `None` when the user is unknown.
    async fn engagement_for_user(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<EngagementSummary>>;
}

/// Read-only shop catalog and user preference lookups.
#[async_trait]
pub trait ShopDirectory: Send + Sync {
    async fn shops_near(&self, lat: f64, lon: f64, radius_km: f64) -> Result<Vec<ShopSummary>>;

    async fn shops_by_categories(&self, categories: &[String]) -> Result<Vec<ShopSummary>>;

    /// Shops created at or after `since`.
    async fn recent_shops(&self, since: DateTime<Utc>) -> Result<Vec<ShopSummary>>;

    /// City-wide fallback ordering when no location is available.
    async fn top_rated(&self, limit: usize) -> Result<Vec<ShopSummary>>;

    async fn user_profile(&self, user_id: i64) -> Result<Option<UserProfile>>;

    async fn favorite_shops(&self, user_id: i64) -> Result<Vec<ShopSummary>>;

    async fn shops_in_township(&self, township: &str) -> Result<Vec<ShopSummary>>;

    async fn townships(&self) -> Result<Vec<String>>;
}
