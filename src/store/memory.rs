//! In-process collaborator implementations.
//!
//! Used by the integration tests and local demos; production replaces these
//! with database-backed implementations of the same traits.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{AppError, Result};
use crate::models::{ActivityEvent, EngagementSummary, ShopSummary, UserProfile};
use crate::store::{ActivityStore, ShopDirectory};
use crate::utils::haversine_km;

#[derive(Debug, Clone)]
struct UserSeed {
    registered_at: DateTime<Utc>,
    favorites: u64,
    reviews: u64,
}

/// Append-only event log held in memory.
#[derive(Default)]
pub struct MemoryActivityStore {
    events: RwLock<Vec<ActivityEvent>>,
    users: RwLock<HashMap<i64, UserSeed>>,
}

impl MemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a known user so `engagement_for_user` can answer.
    pub fn register_user(&self, user_id: i64, registered_at: DateTime<Utc>) {
        self.users.write().expect("users lock poisoned").insert(
            user_id,
            UserSeed {
                registered_at,
                favorites: 0,
                reviews: 0,
            },
        );
    }

    /// Seed favorite/review counts for the engagement blend.
    pub fn set_engagement_counts(&self, user_id: i64, favorites: u64, reviews: u64) {
        if let Some(seed) = self
            .users
            .write()
            .expect("users lock poisoned")
            .get_mut(&user_id)
        {
            seed.favorites = favorites;
            seed.reviews = reviews;
        }
    }

    pub fn event_count(&self) -> usize {
        self.events.read().expect("events lock poisoned").len()
    }
}

#[async_trait]
impl ActivityStore for MemoryActivityStore {
    async fn append(&self, event: ActivityEvent) -> Result<()> {
        self.events.write().expect("events lock poisoned").push(event);
        Ok(())
    }

    async fn events_for_device(&self, device_id: &str) -> Result<Vec<ActivityEvent>> {
        Ok(self
            .events
            .read()
            .expect("events lock poisoned")
            .iter()
            .filter(|e| e.device_id == device_id)
            .cloned()
            .collect())
    }

    async fn reattribute_device(&self, device_id: &str, user_id: i64) -> Result<u64> {
        let mut events = self.events.write().expect("events lock poisoned");
        let mut touched = 0;
        for event in events.iter_mut() {
            if event.device_id == device_id && event.user_id.is_none() {
                event.user_id = Some(user_id);
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn events_for_shop_since(
        &self,
        shop_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<ActivityEvent>> {
        Ok(self
            .events
            .read()
            .expect("events lock poisoned")
            .iter()
            .filter(|e| e.target_id == Some(shop_id) && e.occurred_at >= since)
            .cloned()
            .collect())
    }

    async fn engagement_for_user(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<EngagementSummary>> {
        let seed = {
            let users = self.users.read().expect("users lock poisoned");
            match users.get(&user_id) {
                Some(seed) => seed.clone(),
                None => return Ok(None),
            }
        };

        let events = self.events.read().expect("events lock poisoned");
        let week_ago = now - Duration::days(7);
        let month_ago = now - Duration::days(30);
        let mut total = 0;
        let mut last_7d = 0;
        let mut last_30d = 0;
        for event in events.iter().filter(|e| e.user_id == Some(user_id)) {
            total += 1;
            if event.occurred_at >= week_ago {
                last_7d += 1;
            }
            if event.occurred_at >= month_ago {
                last_30d += 1;
            }
        }

        Ok(Some(EngagementSummary {
            registered_at: seed.registered_at,
            total_activities: total,
            activities_last_7d: last_7d,
            activities_last_30d: last_30d,
            total_favorites: seed.favorites,
            total_reviews: seed.reviews,
        }))
    }
}

/// In-memory shop catalog.
#[derive(Default)]
pub struct MemoryShopDirectory {
    shops: RwLock<Vec<ShopSummary>>,
    profiles: RwLock<HashMap<i64, UserProfile>>,
    favorites: RwLock<HashMap<i64, Vec<i64>>>,
}

impl MemoryShopDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_shop(&self, shop: ShopSummary) {
        self.shops.write().expect("shops lock poisoned").push(shop);
    }

    pub fn set_profile(&self, profile: UserProfile) {
        self.profiles
            .write()
            .expect("profiles lock poisoned")
            .insert(profile.id, profile);
    }

    pub fn add_favorite(&self, user_id: i64, shop_id: i64) {
        self.favorites
            .write()
            .expect("favorites lock poisoned")
            .entry(user_id)
            .or_default()
            .push(shop_id);
    }

    fn all_shops(&self) -> Vec<ShopSummary> {
        self.shops.read().expect("shops lock poisoned").clone()
    }
}

#[async_trait]
impl ShopDirectory for MemoryShopDirectory {
    async fn shops_near(&self, lat: f64, lon: f64, radius_km: f64) -> Result<Vec<ShopSummary>> {
        Ok(self
            .all_shops()
            .into_iter()
            .filter(|s| haversine_km(lat, lon, s.latitude, s.longitude) <= radius_km)
            .collect())
    }

    async fn shops_by_categories(&self, categories: &[String]) -> Result<Vec<ShopSummary>> {
        Ok(self
            .all_shops()
            .into_iter()
            .filter(|s| categories.iter().any(|c| c.eq_ignore_ascii_case(&s.category)))
            .collect())
    }

    async fn recent_shops(&self, since: DateTime<Utc>) -> Result<Vec<ShopSummary>> {
        Ok(self
            .all_shops()
            .into_iter()
            .filter(|s| s.created_at >= since)
            .collect())
    }

    async fn top_rated(&self, limit: usize) -> Result<Vec<ShopSummary>> {
        let mut shops = self.all_shops();
        shops.sort_by(|a, b| {
            b.rating_avg
                .partial_cmp(&a.rating_avg)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        shops.truncate(limit);
        Ok(shops)
    }

    async fn user_profile(&self, user_id: i64) -> Result<Option<UserProfile>> {
        Ok(self
            .profiles
            .read()
            .expect("profiles lock poisoned")
            .get(&user_id)
            .cloned())
    }

    async fn favorite_shops(&self, user_id: i64) -> Result<Vec<ShopSummary>> {
        let ids = self
            .favorites
            .read()
            .expect("favorites lock poisoned")
            .get(&user_id)
            .cloned()
            .unwrap_or_default();
        let shops = self.all_shops();
        ids.iter()
            .map(|id| {
                shops
                    .iter()
                    .find(|s| s.id == *id)
                    .cloned()
                    .ok_or_else(|| AppError::NotFound(format!("favorited shop {id} missing")))
            })
            .collect()
    }

    async fn shops_in_township(&self, township: &str) -> Result<Vec<ShopSummary>> {
        Ok(self
            .all_shops()
            .into_iter()
            .filter(|s| s.township == township)
            .collect())
    }

    async fn townships(&self) -> Result<Vec<String>> {
        let mut townships: Vec<String> =
            self.all_shops().into_iter().map(|s| s.township).collect();
        townships.sort();
        townships.dedup();
        Ok(townships)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActivityType;

    fn event(device: &str, user: Option<i64>, shop: Option<i64>) -> ActivityEvent {
        ActivityEvent {
            device_id: device.to_string(),
            user_id: user,
            activity_type: ActivityType::ViewShop,
            target_id: shop,
            query: None,
            latitude: None,
            longitude: None,
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_reattribute_is_idempotent() {
        let store = MemoryActivityStore::new();
        store.append(event("dev-1", None, Some(1))).await.unwrap();
        store.append(event("dev-1", None, Some(2))).await.unwrap();
        store.append(event("dev-2", None, Some(3))).await.unwrap();

        assert_eq!(store.reattribute_device("dev-1", 42).await.unwrap(), 2);
        assert_eq!(store.reattribute_device("dev-1", 42).await.unwrap(), 0);

        let events = store.events_for_device("dev-1").await.unwrap();
        assert!(events.iter().all(|e| e.user_id == Some(42)));
        let other = store.events_for_device("dev-2").await.unwrap();
        assert!(other.iter().all(|e| e.user_id.is_none()));
    }

    #[tokio::test]
    async fn test_engagement_counts_windows() {
        let store = MemoryActivityStore::new();
        let now = Utc::now();
        store.register_user(7, now - Duration::days(90));

        let mut old = event("dev-1", Some(7), None);
        old.occurred_at = now - Duration::days(20);
        store.append(old).await.unwrap();
        let mut fresh = event("dev-1", Some(7), None);
        fresh.occurred_at = now - Duration::days(2);
        store.append(fresh).await.unwrap();

        let summary = store.engagement_for_user(7, now).await.unwrap().unwrap();
        assert_eq!(summary.total_activities, 2);
        assert_eq!(summary.activities_last_7d, 1);
        assert_eq!(summary.activities_last_30d, 2);
        assert!(store.engagement_for_user(8, now).await.unwrap().is_none());
    }
}
