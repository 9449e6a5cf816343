//! Background jobs: startup cache warmup and the periodic trending refresh.

pub mod cache_warmer;

pub use cache_warmer::CacheWarmer;
