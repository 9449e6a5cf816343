//! Per-device mutual exclusion.
//!
//! Concurrent activity for the same device serializes; different devices
//! proceed fully in parallel. There is no global lock.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Handle proving exclusive access to one device's mutation path. Releases
/// on drop, including unwind, so no exit path can leak a held lock.
pub type DeviceLockHandle = OwnedMutexGuard<()>;

/// Registry of per-device locks, created lazily on first access.
///
/// Get-or-create is atomic: two concurrent first-accesses for the same unseen
/// device id resolve to the same lock object. Entries are never dropped
/// automatically; [`DeviceLockRegistry::remove`] exists for administrative
/// device deletion only.
#[derive(Default)]
pub struct DeviceLockRegistry {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DeviceLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the device's lock, creating the entry on first access.
    ///
    /// Hold the returned handle only for the local mutation; never across
    /// network or cache calls.
    pub async fn acquire(&self, device_id: &str) -> DeviceLockHandle {
        let lock = self
            .locks
            .entry(device_id.to_string())
            .or_insert_with(|| {
                debug!(device_id, "creating lock for device");
                Arc::new(Mutex::new(()))
            })
            .clone();

        lock.lock_owned().await
    }

    /// Drop the registry entry for a permanently retired device.
    ///
    /// Callers must guarantee no concurrent `acquire` for this device; a
    /// holder that still references the old lock keeps it alive but a fresh
    /// `acquire` would mint a new one, silently breaking mutual exclusion.
    pub fn remove(&self, device_id: &str) -> bool {
        let removed = self.locks.remove(device_id).is_some();
        if removed {
            debug!(device_id, "removed device lock");
        }
        removed
    }

    /// Number of tracked device locks, for observability.
    pub fn count(&self) -> usize {
        self.locks.len()
    }

    /// Clear every entry. Testing and maintenance only.
    pub fn clear(&self) {
        warn!("clearing all device locks");
        self.locks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_lazy_creation_and_count() {
        let registry = DeviceLockRegistry::new();
        assert_eq!(registry.count(), 0);

        let guard = registry.acquire("dev-a").await;
        assert_eq!(registry.count(), 1);
        drop(guard);

        // Re-acquiring does not allocate a second entry
        let _guard = registry.acquire("dev-a").await;
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test]
    async fn test_same_device_serializes() {
        let registry = Arc::new(DeviceLockRegistry::new());
        let counter = Arc::new(AtomicU64::new(0));
        let mut handles = Vec::new();

        for _ in 0..32 {
            let registry = Arc::clone(&registry);
            let counter = Arc::clone(&counter);
            handles.push(tokio::spawn(async move {
                let _guard = registry.acquire("dev-shared").await;
                // Non-atomic read-modify-write; only safe under the lock
                let seen = counter.load(Ordering::SeqCst);
                tokio::task::yield_now().await;
                counter.store(seen + 1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 32);
    }

    #[tokio::test]
    async fn test_distinct_devices_do_not_block() {
        let registry = Arc::new(DeviceLockRegistry::new());

        // Hold dev-a's lock indefinitely; dev-b must still acquire promptly
        let guard_a = registry.acquire("dev-a").await;
        let registry_b = Arc::clone(&registry);
        let acquired_b = tokio::time::timeout(Duration::from_millis(500), async move {
            let _guard = registry_b.acquire("dev-b").await;
        })
        .await;
        assert!(acquired_b.is_ok(), "dev-b blocked behind dev-a's lock");
        drop(guard_a);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let registry = DeviceLockRegistry::new();
        let _ = registry.acquire("dev-a").await;
        let _ = registry.acquire("dev-b").await;
        assert_eq!(registry.count(), 2);

        assert!(registry.remove("dev-a"));
        assert!(!registry.remove("dev-a"));
        assert_eq!(registry.count(), 1);

        registry.clear();
        assert_eq!(registry.count(), 0);
    }
}
