//! Per-service concurrency guard.
//!
//! A document handle is shared mutable state: two requests writing inputs
//! into the same workbook at once would read each other's values. The guard
//! keeps one FIFO-fair async mutex per service id, created lazily and reused
//! for the life of the process. Acquisition returns an owned release handle;
//! dropping it (on success, error or panic) releases the lock.
//!
//! Each lock owns a value of type `T`. The workbook cache stores its
//! per-service slot there, so the cache entry can only be touched while the
//! lock is held.
//!
//! ```text
//! Idle ──acquire──▶ Acquired ──▶ Building | Executing ──release──▶ Idle
//!   ▲                                                          │
//!   └──────────── next FIFO waiter ◀───────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use crate::telemetry;

/// Release handle for a held service lock.
pub type ServiceLock<T> = OwnedMutexGuard<T>;

/// Keyed async mutex, one lock per service id.
pub struct ServiceGuard<T = ()> {
    locks: DashMap<String, Arc<Mutex<T>>>,
}

impl<T: Default + Send + 'static> ServiceGuard<T> {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Wait for exclusive access to `service_id`.
    ///
    /// Waiters are served in arrival order.
    pub async fn acquire(&self, service_id: &str) -> ServiceLock<T> {
        let lock = self
            .locks
            .entry(service_id.to_string())
            .or_default()
            .clone();

        if let Ok(guard) = lock.clone().try_lock_owned() {
            return guard;
        }

        trace!(service_id, "waiting for service lock");
        metrics::gauge!(telemetry::GUARD_WAITERS).increment(1.0);
        let started = Instant::now();
        let guard = lock.lock_owned().await;
        metrics::gauge!(telemetry::GUARD_WAITERS).decrement(1.0);
        metrics::histogram!(telemetry::GUARD_WAIT_SECONDS).record(started.elapsed().as_secs_f64());
        guard
    }

    /// Run `f` with exclusive access to the value guarded for `service_id`.
    ///
    /// `f` runs to completion before any other caller's `f` for the same
    /// service begins. The lock is released however `f` exits.
    pub async fn with_exclusive_access<R>(&self, service_id: &str, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.acquire(service_id).await;
        f(&mut *guard)
    }

    /// Whether the lock for `service_id` is currently held.
    pub fn is_locked(&self, service_id: &str) -> bool {
        self.locks
            .get(service_id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Number of service ids that have a lock.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<T: Default + Send + 'static> Default for ServiceGuard<T> {
    fn default() -> Self {
        Self::new()
    }
}
