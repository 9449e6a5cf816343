use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cache::CacheName;
use crate::utils::env_parse;

/// Engine configuration. Everything is env-driven with sensible defaults so
/// the engine can be constructed with `Config::from_env()` or, in tests,
/// `Config::default()`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub cache: CacheSettings,
    pub pools: PoolConfig,
    pub trending: TrendingConfig,
    pub segments: SegmentConfig,
    pub feed: FeedConfig,
    pub jobs: JobsConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            cache: CacheSettings::from_env(),
            pools: PoolConfig::from_env(),
            trending: TrendingConfig::from_env(),
            segments: SegmentConfig::from_env(),
            feed: FeedConfig::from_env(),
            jobs: JobsConfig::from_env(),
        }
    }
}

/// One named cache bucket: maximum entry count and time-to-live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSpec {
    pub name: CacheName,
    pub max_entries: u64,
    pub ttl: Duration,
}

/// Per-bucket sizing table. Defaults mirror the production tuning: small
/// buckets for expensive, low-cardinality queries (homeShops), large ones for
/// high-cardinality lookups (shopSearch, userSegment).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    pub buckets: Vec<CacheSpec>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        let buckets = CacheName::ALL
            .iter()
            .map(|&name| {
                let (max_entries, ttl_secs) = name.default_sizing();
                CacheSpec {
                    name,
                    max_entries,
                    ttl: Duration::from_secs(ttl_secs),
                }
            })
            .collect();
        CacheSettings { buckets }
    }
}

impl CacheSettings {
    /// Defaults with optional per-bucket env overrides, e.g.
    /// `CACHE_HOME_SHOPS_TTL_SECS=120` or `CACHE_SHOP_SEARCH_MAX_ENTRIES=2000`.
    pub fn from_env() -> Self {
        let mut settings = CacheSettings::default();
        for spec in &mut settings.buckets {
            let prefix = spec.name.env_prefix();
            spec.max_entries = env_parse(&format!("CACHE_{prefix}_MAX_ENTRIES"), spec.max_entries);
            let ttl_secs = env_parse(&format!("CACHE_{prefix}_TTL_SECS"), spec.ttl.as_secs());
            spec.ttl = Duration::from_secs(ttl_secs);
        }
        settings
    }

    pub fn spec(&self, name: CacheName) -> Option<&CacheSpec> {
        self.buckets.iter().find(|s| s.name == name)
    }
}

/// Sizing for the two async pools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// CPU-bound worker count; defaults to the number of available cores.
    pub cpu_workers: usize,
    /// Bounded queue in front of the CPU pool. On overflow the job runs on
    /// the caller (caller-runs backpressure), it is never dropped.
    pub cpu_queue_capacity: usize,
    /// How long `shutdown` waits for outstanding work before abandoning it.
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            cpu_workers: num_cpus::get().max(1),
            cpu_queue_capacity: 100,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    pub fn from_env() -> Self {
        let defaults = PoolConfig::default();
        PoolConfig {
            cpu_workers: env_parse("POOL_CPU_WORKERS", defaults.cpu_workers).max(1),
            cpu_queue_capacity: env_parse("POOL_CPU_QUEUE_CAPACITY", defaults.cpu_queue_capacity)
                .max(1),
            shutdown_timeout: Duration::from_secs(env_parse(
                "POOL_SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout.as_secs(),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendingConfig {
    /// Decay half-life in hours. An event's contribution is
    /// `weight * exp(-age_hours / half_life_hours)`.
    pub half_life_hours: f64,
    /// Scoring window in days.
    pub window_days: i64,
    pub view_weight: f64,
    pub conversion_weight: f64,
    /// Top-N per spatial bucket that earn the TRENDING_NOW badge.
    pub badge_top_n: usize,
    /// RISING_STAR fires when the 48h score exceeds this multiple of the
    /// 7-day baseline prorated to 48h.
    pub rising_star_multiplier: f64,
}

impl Default for TrendingConfig {
    fn default() -> Self {
        TrendingConfig {
            half_life_hours: 48.0,
            window_days: 7,
            view_weight: 1.0,
            conversion_weight: 5.0,
            badge_top_n: 10,
            rising_star_multiplier: 2.0,
        }
    }
}

impl TrendingConfig {
    pub fn from_env() -> Self {
        let defaults = TrendingConfig::default();
        TrendingConfig {
            half_life_hours: env_parse("TRENDING_HALF_LIFE_HOURS", defaults.half_life_hours),
            window_days: env_parse("TRENDING_WINDOW_DAYS", defaults.window_days),
            view_weight: env_parse("TRENDING_VIEW_WEIGHT", defaults.view_weight),
            conversion_weight: env_parse("TRENDING_CONVERSION_WEIGHT", defaults.conversion_weight),
            badge_top_n: env_parse("TRENDING_BADGE_TOP_N", defaults.badge_top_n),
            rising_star_multiplier: env_parse(
                "TRENDING_RISING_STAR_MULTIPLIER",
                defaults.rising_star_multiplier,
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// Users registered within this many days are NEW_USER.
    pub new_user_days: i64,
    /// No activity in this many days makes an established user DORMANT.
    pub dormant_days: i64,
    /// Actions in the trailing 7 days at or above this mark POWER_USER.
    pub power_user_recent_threshold: u64,
    /// Alternative POWER_USER path: blended engagement score threshold
    /// (activities 40%, favorites 30%, reviews 30%).
    pub power_user_engagement_score: f64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        SegmentConfig {
            new_user_days: 7,
            dormant_days: 30,
            power_user_recent_threshold: 20,
            power_user_engagement_score: 50.0,
        }
    }
}

impl SegmentConfig {
    pub fn from_env() -> Self {
        let defaults = SegmentConfig::default();
        SegmentConfig {
            new_user_days: env_parse("SEGMENT_NEW_USER_DAYS", defaults.new_user_days),
            dormant_days: env_parse("SEGMENT_DORMANT_DAYS", defaults.dormant_days),
            power_user_recent_threshold: env_parse(
                "SEGMENT_POWER_USER_RECENT_THRESHOLD",
                defaults.power_user_recent_threshold,
            ),
            power_user_engagement_score: env_parse(
                "SEGMENT_POWER_USER_ENGAGEMENT_SCORE",
                defaults.power_user_engagement_score,
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Items per feed section.
    pub section_limit: usize,
    pub default_radius_km: f64,
    /// Shops created within this many days count as NEW.
    pub new_shop_days: i64,
    /// HIDDEN_GEM: rating at or above this...
    pub hidden_gem_min_rating: f64,
    /// ...with fewer ratings than this (low visibility).
    pub hidden_gem_max_ratings: u32,
    /// CROWD_FAVORITE: both counts must exceed these.
    pub crowd_favorite_min_ratings: u32,
    pub crowd_favorite_min_favorites: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        FeedConfig {
            section_limit: 10,
            default_radius_km: 5.0,
            new_shop_days: 30,
            hidden_gem_min_rating: 4.5,
            hidden_gem_max_ratings: 20,
            crowd_favorite_min_ratings: 50,
            crowd_favorite_min_favorites: 25,
        }
    }
}

impl FeedConfig {
    pub fn from_env() -> Self {
        let defaults = FeedConfig::default();
        FeedConfig {
            section_limit: env_parse("FEED_SECTION_LIMIT", defaults.section_limit),
            default_radius_km: env_parse("FEED_DEFAULT_RADIUS_KM", defaults.default_radius_km),
            new_shop_days: env_parse("FEED_NEW_SHOP_DAYS", defaults.new_shop_days),
            hidden_gem_min_rating: env_parse(
                "FEED_HIDDEN_GEM_MIN_RATING",
                defaults.hidden_gem_min_rating,
            ),
            hidden_gem_max_ratings: env_parse(
                "FEED_HIDDEN_GEM_MAX_RATINGS",
                defaults.hidden_gem_max_ratings,
            ),
            crowd_favorite_min_ratings: env_parse(
                "FEED_CROWD_FAVORITE_MIN_RATINGS",
                defaults.crowd_favorite_min_ratings,
            ),
            crowd_favorite_min_favorites: env_parse(
                "FEED_CROWD_FAVORITE_MIN_FAVORITES",
                defaults.crowd_favorite_min_favorites,
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Warm the homeShops bucket once at startup.
    pub warmup_enabled: bool,
    /// Periodic per-township trending refresh interval.
    pub trending_refresh_interval: Duration,
    pub trending_refresh_enabled: bool,
}

impl Default for JobsConfig {
    fn default() -> Self {
        JobsConfig {
            warmup_enabled: true,
            trending_refresh_interval: Duration::from_secs(3600),
            trending_refresh_enabled: true,
        }
    }
}

impl JobsConfig {
    pub fn from_env() -> Self {
        let defaults = JobsConfig::default();
        JobsConfig {
            warmup_enabled: env_parse("JOBS_WARMUP_ENABLED", defaults.warmup_enabled),
            trending_refresh_interval: Duration::from_secs(env_parse(
                "JOBS_TRENDING_REFRESH_INTERVAL_SECS",
                defaults.trending_refresh_interval.as_secs(),
            )),
            trending_refresh_enabled: env_parse(
                "JOBS_TRENDING_REFRESH_ENABLED",
                defaults.trending_refresh_enabled,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cache_table_covers_all_buckets() {
        let settings = CacheSettings::default();
        assert_eq!(settings.buckets.len(), CacheName::ALL.len());
        for name in CacheName::ALL {
            assert!(settings.spec(name).is_some(), "missing bucket {name:?}");
        }
    }

    #[test]
    fn test_home_shops_defaults() {
        let settings = CacheSettings::default();
        let spec = settings.spec(CacheName::HomeShops).unwrap();
        assert_eq!(spec.max_entries, 10);
        assert_eq!(spec.ttl, Duration::from_secs(120));
    }

    #[test]
    fn test_pool_defaults() {
        let pools = PoolConfig::default();
        assert!(pools.cpu_workers >= 1);
        assert_eq!(pools.cpu_queue_capacity, 100);
        assert_eq!(pools.shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_trending_defaults() {
        let trending = TrendingConfig::default();
        assert_eq!(trending.half_life_hours, 48.0);
        assert_eq!(trending.window_days, 7);
        assert!(trending.conversion_weight > trending.view_weight);
    }
}
