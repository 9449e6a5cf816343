pub mod activity;
pub mod context;
pub mod feed;
pub mod trending;

pub use activity::ActivityRecorder;
pub use context::ContextClassifier;
pub use feed::FeedRanker;
pub use trending::TrendingScorer;
