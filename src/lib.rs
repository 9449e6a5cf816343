//! Personalization & feed ranking engine for the shop directory backend.
//!
//! This crate owns the pipeline that turns raw per-device interaction events
//! into a cached, concurrently-safe, time- and segment-aware ranked feed:
//!
//! - [`services::ActivityRecorder`] ingests interaction events under
//!   per-device locks and hands persistence off to the async pools.
//! - [`services::ContextClassifier`] derives the meal-period time context and
//!   the user's engagement segment.
//! - [`services::TrendingScorer`] computes decaying popularity scores from
//!   recent event velocity.
//! - [`services::FeedRanker`] assembles the four feed sections and assigns
//!   display badges.
//! - [`cache::FeedCache`] fronts all of the above with named TTL+LRU buckets.
//!
//! Persistence and the shop catalog are external collaborators behind the
//! traits in [`store`]; the HTTP layer calls into [`engine::FeedEngine`] as
//! plain async functions.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod jobs;
pub mod locks;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

pub use cache::{CacheName, FeedCache};
pub use config::Config;
pub use engine::FeedEngine;
pub use error::{AppError, Result};
pub use executor::DualPoolExecutor;
pub use locks::DeviceLockRegistry;
pub use models::{
    ActivityDraft, ActivityEvent, ActivityType, FeedSection, FeedSectionType, PersonalizedFeed,
    ShopBadge, ShopFeedItem, TimeContext, UserSegment,
};
pub use services::feed::FeedRequest;
pub use services::{ActivityRecorder, ContextClassifier, FeedRanker, TrendingScorer};
