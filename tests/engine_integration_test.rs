//! End-to-end engine tests against the in-memory collaborators.

use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use feed_engine::cache::CacheName;
use feed_engine::config::Config;
use feed_engine::engine::FeedEngine;
use feed_engine::models::{ActivityDraft, ShopSummary, UserProfile};
use feed_engine::services::feed::FeedRequest;
use feed_engine::store::memory::{MemoryActivityStore, MemoryShopDirectory};
use feed_engine::store::{ActivityStore, ShopDirectory};
use feed_engine::models::TimeContext;

fn draft(device: &str, activity_type: &str, shop: Option<i64>) -> ActivityDraft {
    ActivityDraft {
        device_id: device.to_string(),
        user_id: None,
        activity_type: activity_type.to_string(),
        target_id: shop,
        query: None,
        latitude: None,
        longitude: None,
        occurred_at: None,
    }
}

fn shop(id: i64, name: &str, category: &str, lat: f64, lon: f64) -> ShopSummary {
    ShopSummary {
        id,
        name: name.to_string(),
        category: category.to_string(),
        sub_category: None,
        township: "Downtown".to_string(),
        latitude: lat,
        longitude: lon,
        rating_avg: 4.2,
        rating_count: 35,
        favorite_count: 8,
        halal: false,
        vegetarian: false,
        price_tier: 2,
        // Fixed long-established date, well outside any new-shop window
        created_at: Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap(),
    }
}

struct Harness {
    activity: Arc<MemoryActivityStore>,
    directory: Arc<MemoryShopDirectory>,
    engine: Arc<FeedEngine>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn harness_with_config(config: Config) -> Harness {
    init_tracing();
    let activity = Arc::new(MemoryActivityStore::new());
    let directory = Arc::new(MemoryShopDirectory::new());
    let engine = Arc::new(FeedEngine::new(
        config,
        activity.clone() as Arc<dyn ActivityStore>,
        directory.clone() as Arc<dyn ShopDirectory>,
    ));
    Harness {
        activity,
        directory,
        engine,
    }
}

fn harness() -> Harness {
    harness_with_config(Config::default())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_records_for_one_device_all_persist() {
    let h = harness();

    let mut handles = Vec::new();
    for i in 0..32 {
        let engine = Arc::clone(&h.engine);
        handles.push(tokio::spawn(async move {
            engine
                .record(draft("dev-busy", "VIEW_SHOP", Some(i % 4)))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Drain the I/O pool so every fire-and-continue append has landed
    h.engine.shutdown().await;
    assert_eq!(h.activity.event_count(), 32);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_devices_record_in_parallel() {
    let h = harness();

    let mut handles = Vec::new();
    for device in 0..8 {
        let engine = Arc::clone(&h.engine);
        handles.push(tokio::spawn(async move {
            for _ in 0..4 {
                engine
                    .record_awaited(draft(&format!("dev-{device}"), "CLICK_CALL", Some(1)))
                    .await
                    .unwrap();
            }
        }));
    }

    // Eight devices, four awaited writes each; a lock shared across devices
    // would make this crawl, so bound the whole thing tightly.
    tokio::time::timeout(StdDuration::from_secs(5), async {
        for handle in handles {
            handle.await.unwrap();
        }
    })
    .await
    .expect("distinct devices blocked each other");

    assert_eq!(h.activity.event_count(), 32);
    assert_eq!(h.engine.device_lock_count(), 8);
}

#[tokio::test]
async fn login_binding_is_idempotent_end_to_end() {
    let h = harness();

    for _ in 0..3 {
        h.engine
            .record_awaited(draft("dev-1", "VIEW_SHOP", Some(7)))
            .await
            .unwrap();
    }

    assert_eq!(h.engine.bind_device_history("dev-1", 99).await.unwrap(), 3);
    assert_eq!(h.engine.bind_device_history("dev-1", 99).await.unwrap(), 0);
    // A device that never recorded anything binds as a benign no-op
    assert_eq!(h.engine.bind_device_history("dev-new", 99).await.unwrap(), 0);
}

#[tokio::test]
async fn dinner_feed_prefers_favorite_categories() {
    let h = harness();
    // 18:30 UTC, inside the dinner window
    let now = Utc.with_ymd_and_hms(2026, 3, 10, 18, 30, 0).unwrap();

    // Five shops within two kilometers, two in the user's favorite categories
    h.directory
        .add_shop(shop(1, "Smoke House", "BBQ", 16.8000, 96.1500));
    h.directory
        .add_shop(shop(2, "Pot Luck", "Hot Pot", 16.8010, 96.1510));
    h.directory
        .add_shop(shop(3, "Corner Mart", "Grocery", 16.8020, 96.1520));
    h.directory
        .add_shop(shop(4, "Wash & Go", "Laundry", 16.8030, 96.1530));
    h.directory
        .add_shop(shop(5, "Print Hub", "Stationery", 16.8040, 96.1540));
    h.directory.set_profile(UserProfile {
        id: 7,
        registered_at: now - Duration::days(90),
        favorite_categories: vec!["BBQ".to_string(), "Hot Pot".to_string()],
        ..Default::default()
    });

    let request = FeedRequest {
        user_id: Some(7),
        latitude: Some(16.8000),
        longitude: Some(96.1500),
        radius_km: Some(2.0),
    };
    let feed = h.engine.build_feed_at(&request, now).await.unwrap();

    assert_eq!(feed.metadata.time_context, TimeContext::Dinner);
    assert!(feed.metadata.location_used);

    let top_two: Vec<i64> = feed.for_you_now.items[..2]
        .iter()
        .map(|item| item.shop_id)
        .collect();
    assert!(top_two.contains(&1), "BBQ shop not in top two: {top_two:?}");
    assert!(
        top_two.contains(&2),
        "Hot Pot shop not in top two: {top_two:?}"
    );
    for item in &feed.for_you_now.items[..2] {
        assert_eq!(item.match_reason, "Matches your favorite categories");
        assert!(item.relevance_score > 50.0);
        assert!(item.distance_km.unwrap() < 2.0);
    }
    // The errand shops still appear, just ranked below the dinner matches
    assert_eq!(feed.for_you_now.total_count, 5);
}

#[tokio::test]
async fn trending_reflects_recent_velocity() {
    let h = harness();
    h.directory
        .add_shop(shop(1, "Quiet Cafe", "Cafe", 16.800, 96.150));
    h.directory
        .add_shop(shop(2, "Hot Spot", "Restaurant", 16.801, 96.151));

    // High-intent conversions on shop 2, a single view on shop 1
    h.engine
        .record_awaited(draft("dev-1", "VIEW_SHOP", Some(1)))
        .await
        .unwrap();
    for device in 0..5 {
        h.engine
            .record_awaited(draft(&format!("dev-c{device}"), "CLICK_DIRECTIONS", Some(2)))
            .await
            .unwrap();
    }

    let request = FeedRequest {
        latitude: Some(16.800),
        longitude: Some(96.150),
        radius_km: Some(2.0),
        ..Default::default()
    };
    let feed = h.engine.build_feed(&request).await.unwrap();

    let ids: Vec<i64> = feed
        .trending_nearby
        .items
        .iter()
        .map(|item| item.shop_id)
        .collect();
    assert_eq!(ids, vec![2, 1]);

    let snapshot = h.engine.trending_snapshot(2).await.unwrap();
    assert!(snapshot.score > 0.0);
}

#[tokio::test]
async fn default_home_feed_expires_with_its_bucket() {
    let mut config = Config::default();
    for spec in &mut config.cache.buckets {
        if spec.name == CacheName::HomeShops {
            spec.ttl = StdDuration::from_millis(60);
        }
    }
    let h = harness_with_config(config);
    h.directory.add_shop(shop(1, "First", "Cafe", 16.8, 96.15));

    let request = FeedRequest::default();
    let now = Utc.with_ymd_and_hms(2026, 3, 10, 18, 30, 0).unwrap();
    let first = h.engine.build_feed_at(&request, now).await.unwrap();
    assert_eq!(first.for_you_now.total_count, 1);

    // Within the TTL the cached snapshot hides new catalog entries
    h.directory.add_shop(shop(2, "Second", "Cafe", 16.8, 96.15));
    let cached = h.engine.build_feed_at(&request, now).await.unwrap();
    assert_eq!(cached.for_you_now.total_count, 1);

    // After expiry the next read recomputes and sees both shops
    tokio::time::sleep(StdDuration::from_millis(100)).await;
    let refreshed = h.engine.build_feed_at(&request, now).await.unwrap();
    assert_eq!(refreshed.for_you_now.total_count, 2);
}

#[tokio::test]
async fn quiet_neighborhood_still_lists_trending_nearby() {
    let h = harness();
    // No recorded activity anywhere: both in-radius shops must still appear,
    // ordered by the rating/id tie-breaks
    h.directory
        .add_shop(shop(1, "Quiet Cafe", "Cafe", 16.800, 96.150));
    h.directory
        .add_shop(shop(2, "Quiet Diner", "Restaurant", 16.801, 96.151));

    let request = FeedRequest {
        latitude: Some(16.800),
        longitude: Some(96.150),
        radius_km: Some(2.0),
        ..Default::default()
    };
    let feed = h.engine.build_feed(&request).await.unwrap();

    let ids: Vec<i64> = feed
        .trending_nearby
        .items
        .iter()
        .map(|item| item.shop_id)
        .collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(feed.trending_nearby.total_count, 2);
}

#[tokio::test]
async fn invalid_activity_type_is_rejected_without_side_effects() {
    let h = harness();
    let err = h.engine.record(draft("dev-1", "TELEPORT", Some(1))).await;
    assert!(err.is_err());
    assert_eq!(h.activity.event_count(), 0);
    assert_eq!(h.engine.device_lock_count(), 0);
}
