//! Per-display capture locks.
//!
//! Capture backends are not safe to drive concurrently against the same X
//! server, so the engine serializes captures per display. Different displays
//! proceed in parallel; the lock is never held across a vision call.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per distinct display string.
#[derive(Default)]
pub struct CaptureArbiter {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl CaptureArbiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lock for `display` is free and take it. The guard
    /// releases on drop.
    pub async fn lock(&self, display: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(
                locks
                    .entry(display.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_display_is_exclusive() {
        let arbiter = Arc::new(CaptureArbiter::new());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let arbiter = Arc::clone(&arbiter);
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _guard = arbiter.lock(":1").await;
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_displays_overlap() {
        let arbiter = Arc::new(CaptureArbiter::new());

        let guard_one = arbiter.lock(":1").await;
        // A second display must not be blocked by the first's guard.
        let guard_two = tokio::time::timeout(Duration::from_millis(50), arbiter.lock(":2"))
            .await
            .expect("lock on :2 should not wait on :1");
        drop(guard_one);
        drop(guard_two);
    }

    #[tokio::test]
    async fn test_lock_released_on_drop() {
        let arbiter = CaptureArbiter::new();
        drop(arbiter.lock(":1").await);
        // Immediate reacquisition must succeed.
        let _guard = tokio::time::timeout(Duration::from_millis(50), arbiter.lock(":1"))
            .await
            .expect("lock should be free after drop");
    }
}
