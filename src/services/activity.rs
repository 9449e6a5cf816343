//! Interaction event ingestion.
//!
//! The only component that touches per-device locks. A record call acquires
//! the device's lock, hands the append to the I/O pool and a scoring refresh
//! to the CPU pool, and releases the lock before returning; the lock is never
//! held across a network call on the fire-and-continue path.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CacheName, FeedCache};
use crate::error::{AppError, Result};
use crate::executor::DualPoolExecutor;
use crate::locks::DeviceLockRegistry;
use crate::models::{ActivityDraft, ActivityEvent, ActivityType};
use crate::services::context::ContextClassifier;
use crate::store::ActivityStore;

pub struct ActivityRecorder {
    store: Arc<dyn ActivityStore>,
    locks: Arc<DeviceLockRegistry>,
    executor: Arc<DualPoolExecutor>,
    classifier: Arc<ContextClassifier>,
    cache: Arc<FeedCache>,
}

impl ActivityRecorder {
    pub fn new(
        store: Arc<dyn ActivityStore>,
        locks: Arc<DeviceLockRegistry>,
        executor: Arc<DualPoolExecutor>,
        classifier: Arc<ContextClassifier>,
        cache: Arc<FeedCache>,
    ) -> Self {
        ActivityRecorder {
            store,
            locks,
            executor,
            classifier,
            cache,
        }
    }

    fn validate(&self, draft: ActivityDraft) -> Result<ActivityEvent> {
        let activity_type: ActivityType = draft.activity_type.parse()?;
        Ok(ActivityEvent {
            device_id: draft.device_id,
            user_id: draft.user_id,
            activity_type,
            target_id: draft.target_id,
            query: draft.query,
            latitude: draft.latitude,
            longitude: draft.longitude,
            occurred_at: draft.occurred_at.unwrap_or_else(Utc::now),
        })
    }

    /// Record one interaction, fire-and-continue.
    ///
    /// Returns once the persistence write is dispatched to the I/O pool, not
    /// once it lands; persistence failures on that path are logged and
    /// swallowed. Rejects unknown activity type strings with
    /// `InvalidActivityType`.
    pub async fn record(&self, draft: ActivityDraft) -> Result<()> {
        let event = self.validate(draft)?;

        let guard = self.locks.acquire(&event.device_id).await;

        debug!(
            device_id = %event.device_id,
            activity_type = event.activity_type.as_str(),
            target_id = ?event.target_id,
            "recording activity"
        );

        self.dispatch_append(event.clone());
        self.dispatch_scoring_refresh(&event);

        drop(guard);
        Ok(())
    }

    /// Record with durability confirmation: awaits the persistence write
    /// inside the device lock and propagates its failure. Used where losing
    /// the write would be user-visible.
    pub async fn record_awaited(&self, draft: ActivityDraft) -> Result<()> {
        let event = self.validate(draft)?;

        let guard = self.locks.acquire(&event.device_id).await;
        let result = self.store.append(event.clone()).await;
        if result.is_ok() {
            self.dispatch_scoring_refresh(&event);
        }
        drop(guard);
        result
    }

    /// Re-attribute all prior anonymous events for the device to the user,
    /// under the device's lock. Idempotent; a device with no recorded history
    /// is a benign no-op (a first-time device legitimately has none). Returns
    /// the number of events re-attributed.
    ///
    /// This is the durability-sensitive path: the store call is awaited
    /// inside the lock and its failure propagates, since silently losing the
    /// binding would make a user's history vanish.
    pub async fn bind_device_history(&self, device_id: &str, user_id: i64) -> Result<u64> {
        let guard = self.locks.acquire(device_id).await;

        let touched = self.store.reattribute_device(device_id, user_id).await?;
        if touched == 0 {
            debug!(device_id, user_id, "no anonymous history to bind");
        } else {
            info!(device_id, user_id, touched, "bound device history to user");
            // Activity counts changed; the cached segment is stale
            self.classifier.invalidate_segment(user_id);
        }

        drop(guard);
        Ok(touched)
    }

    /// Administrative removal of a permanently retired device's lock entry.
    /// Unlike history binding, a missing device is an error here.
    pub fn retire_device(&self, device_id: &str) -> Result<()> {
        if self.locks.remove(device_id) {
            Ok(())
        } else {
            Err(AppError::DeviceNotFound(device_id.to_string()))
        }
    }

    /// Tracked device lock count, for observability.
    pub fn device_lock_count(&self) -> usize {
        self.locks.count()
    }

    fn dispatch_append(&self, event: ActivityEvent) {
        let store = Arc::clone(&self.store);
        self.executor.dispatch_io(async move {
            if let Err(e) = store.append(event).await {
                // Best-effort analytics: never fail the request over this
                warn!(error = %e, "activity persistence failed");
            }
        });
    }

    fn dispatch_scoring_refresh(&self, event: &ActivityEvent) {
        if !event.activity_type.is_trending_signal() {
            return;
        }
        let cache = Arc::clone(&self.cache);
        self.executor.dispatch_cpu(move || {
            // Next feed read recomputes the affected trending buckets
            cache.invalidate_all(CacheName::TrendingShops);
        });
    }
}
