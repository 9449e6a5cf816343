//! Named TTL+LRU cache buckets fronting the ranking pipeline.
//!
//! One bucket per cache name, each with its own maximum entry count and
//! time-to-live, constructed explicitly at startup from the configuration
//! table. Values are immutable JSON snapshots: `put` always replaces the
//! whole entry, there are no partial updates or merge semantics. A miss is an
//! internal signal (`None`), never an error; callers recompute and repopulate.
//!
//! Concurrent misses on the same key are deliberately not coalesced; the
//! duplicate recompute is accepted over the complexity of in-flight futures.

use moka::sync::Cache;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::CacheSettings;

/// The closed set of cache buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CacheName {
    ShopSearch,
    NearbyShops,
    ShopDetails,
    ShopReviews,
    TrendingShops,
    HomeShops,
    ShopsByCategory,
    ShopsByTownship,
    TimeContext,
    UserSegment,
}

impl CacheName {
    pub const ALL: [CacheName; 10] = [
        CacheName::ShopSearch,
        CacheName::NearbyShops,
        CacheName::ShopDetails,
        CacheName::ShopReviews,
        CacheName::TrendingShops,
        CacheName::HomeShops,
        CacheName::ShopsByCategory,
        CacheName::ShopsByTownship,
        CacheName::TimeContext,
        CacheName::UserSegment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheName::ShopSearch => "shopSearch",
            CacheName::NearbyShops => "nearbyShops",
            CacheName::ShopDetails => "shopDetails",
            CacheName::ShopReviews => "shopReviews",
            CacheName::TrendingShops => "trendingShops",
            CacheName::HomeShops => "homeShops",
            CacheName::ShopsByCategory => "shopsByCategory",
            CacheName::ShopsByTownship => "shopsByTownship",
            CacheName::TimeContext => "timeContext",
            CacheName::UserSegment => "userSegment",
        }
    }

    pub(crate) fn env_prefix(&self) -> &'static str {
        match self {
            CacheName::ShopSearch => "SHOP_SEARCH",
            CacheName::NearbyShops => "NEARBY_SHOPS",
            CacheName::ShopDetails => "SHOP_DETAILS",
            CacheName::ShopReviews => "SHOP_REVIEWS",
            CacheName::TrendingShops => "TRENDING_SHOPS",
            CacheName::HomeShops => "HOME_SHOPS",
            CacheName::ShopsByCategory => "SHOPS_BY_CATEGORY",
            CacheName::ShopsByTownship => "SHOPS_BY_TOWNSHIP",
            CacheName::TimeContext => "TIME_CONTEXT",
            CacheName::UserSegment => "USER_SEGMENT",
        }
    }

    /// Default `(max_entries, ttl_secs)` tuning per bucket.
    pub(crate) fn default_sizing(&self) -> (u64, u64) {
        match self {
            CacheName::ShopSearch => (1000, 5 * 60),
            CacheName::NearbyShops => (500, 2 * 60),
            CacheName::ShopDetails => (1000, 10 * 60),
            CacheName::ShopReviews => (500, 5 * 60),
            CacheName::TrendingShops => (100, 5 * 60),
            CacheName::HomeShops => (10, 2 * 60),
            CacheName::ShopsByCategory => (500, 15 * 60),
            CacheName::ShopsByTownship => (500, 15 * 60),
            CacheName::TimeContext => (10, 15 * 60),
            CacheName::UserSegment => (1000, 60 * 60),
        }
    }
}

/// Keyed, TTL-based cache layer. One moka bucket per [`CacheName`].
pub struct FeedCache {
    buckets: HashMap<CacheName, Cache<String, String>>,
}

impl FeedCache {
    /// Build every bucket from the configuration table.
    pub fn new(settings: &CacheSettings) -> Self {
        let mut buckets = HashMap::with_capacity(CacheName::ALL.len());
        for name in CacheName::ALL {
            let (default_max, default_ttl) = name.default_sizing();
            let (max_entries, ttl) = settings
                .spec(name)
                .map(|s| (s.max_entries, s.ttl))
                .unwrap_or((default_max, std::time::Duration::from_secs(default_ttl)));

            let cache = Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(ttl)
                .build();
            buckets.insert(name, cache);
        }

        debug!(buckets = buckets.len(), "feed cache buckets initialized");
        FeedCache { buckets }
    }

    fn bucket(&self, name: CacheName) -> &Cache<String, String> {
        // Every CacheName is inserted in new(), the map is never mutated after
        self.buckets
            .get(&name)
            .expect("cache bucket missing from construction table")
    }

    /// Fetch and deserialize a cached snapshot. Corrupt entries are dropped
    /// and reported as a miss.
    pub fn get<T: DeserializeOwned>(&self, name: CacheName, key: &str) -> Option<T> {
        let json = self.bucket(name).get(key)?;
        match serde_json::from_str(&json) {
            Ok(value) => {
                debug!(cache = name.as_str(), key, "cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(cache = name.as_str(), key, error = %e, "dropping corrupt cache entry");
                self.bucket(name).invalidate(key);
                None
            }
        }
    }

    /// Store a full-replacement snapshot. Serialization failures are logged
    /// and swallowed; caching is best-effort.
    pub fn put<T: Serialize>(&self, name: CacheName, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(json) => self.bucket(name).insert(key.to_string(), json),
            Err(e) => {
                warn!(cache = name.as_str(), key, error = %e, "failed to serialize cache value");
            }
        }
    }

    pub fn invalidate(&self, name: CacheName, key: &str) {
        self.bucket(name).invalidate(key);
    }

    pub fn invalidate_all(&self, name: CacheName) {
        self.bucket(name).invalidate_all();
        debug!(cache = name.as_str(), "bucket invalidated");
    }

    /// Approximate entry count, for observability.
    pub fn entry_count(&self, name: CacheName) -> u64 {
        let bucket = self.bucket(name);
        bucket.run_pending_tasks();
        bucket.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Snapshot {
        ids: Vec<i64>,
    }

    fn cache() -> FeedCache {
        FeedCache::new(&CacheSettings::default())
    }

    #[test]
    fn test_put_get_round_trip() {
        let cache = cache();
        let value = Snapshot { ids: vec![1, 2, 3] };
        cache.put(CacheName::TrendingShops, "downtown", &value);
        let got: Snapshot = cache.get(CacheName::TrendingShops, "downtown").unwrap();
        assert_eq!(got, value);
    }

    #[test]
    fn test_miss_is_none() {
        let cache = cache();
        let got: Option<Snapshot> = cache.get(CacheName::ShopSearch, "no-such-key");
        assert!(got.is_none());
    }

    #[test]
    fn test_put_overwrites() {
        let cache = cache();
        cache.put(CacheName::HomeShops, "home", &Snapshot { ids: vec![1] });
        cache.put(CacheName::HomeShops, "home", &Snapshot { ids: vec![2] });
        let got: Snapshot = cache.get(CacheName::HomeShops, "home").unwrap();
        assert_eq!(got.ids, vec![2]);
    }

    #[test]
    fn test_corrupt_entry_reported_as_miss() {
        let cache = cache();
        cache.put(CacheName::UserSegment, "user:1", &"DORMANT");
        // Typed read that does not match the stored shape
        let got: Option<Snapshot> = cache.get(CacheName::UserSegment, "user:1");
        assert!(got.is_none());
        // Entry was dropped, a correctly-typed read also misses now
        let got: Option<String> = cache.get(CacheName::UserSegment, "user:1");
        assert!(got.is_none());
    }

    #[test]
    fn test_ttl_expiry() {
        let mut settings = CacheSettings::default();
        for spec in &mut settings.buckets {
            if spec.name == CacheName::HomeShops {
                spec.ttl = std::time::Duration::from_millis(50);
            }
        }
        let cache = FeedCache::new(&settings);
        cache.put(CacheName::HomeShops, "home", &Snapshot { ids: vec![7] });
        assert!(cache
            .get::<Snapshot>(CacheName::HomeShops, "home")
            .is_some());

        std::thread::sleep(std::time::Duration::from_millis(80));
        assert!(cache
            .get::<Snapshot>(CacheName::HomeShops, "home")
            .is_none());
    }

    #[test]
    fn test_lru_eviction_respects_capacity() {
        let mut settings = CacheSettings::default();
        for spec in &mut settings.buckets {
            if spec.name == CacheName::HomeShops {
                spec.max_entries = 2;
            }
        }
        let cache = FeedCache::new(&settings);
        for i in 0..10i64 {
            cache.put(CacheName::HomeShops, &format!("k{i}"), &Snapshot { ids: vec![i] });
        }
        assert!(cache.entry_count(CacheName::HomeShops) <= 2);
    }
}
