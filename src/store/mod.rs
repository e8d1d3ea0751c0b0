//! Shared counter/cache store interface.
//!
//! The distributed key-value store is an external collaborator. Cellgate
//! uses it for workbook snapshots, rate-limit windows, analytics counters
//! and the optional distributed result tier. [`SharedStore`] mirrors the
//! subset of redis-like operations those need; [`MemoryStore`] is the
//! in-process implementation used by single-instance deployments and tests.
//!
//! A networked backend implements [`SharedStore`] and is injected through
//! the builder's `.store()` method. No other module needs to change.

pub mod memory;

pub use memory::MemoryStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

/// Outcome of a sliding-window update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Entries in the window, including the one just added.
    pub count: u64,
    /// Score (epoch millis) of the oldest entry still in the window.
    pub oldest_ms: Option<u64>,
}

/// Operations required from the shared store.
///
/// Every method may fail when the store is unreachable; callers decide
/// whether that is fatal (most are best-effort).
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Store name for logging/debugging.
    fn name(&self) -> &str;

    /// Fetch a value. Expired keys read as `None`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value, optionally expiring after `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Remove a key. Missing keys are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Atomically add `delta` to an integer counter, creating it at zero.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    /// Set a key's time-to-live.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Add `member` to a sorted set with `score`.
    async fn zadd(&self, key: &str, score: u64, member: &str) -> Result<()>;

    /// Remove sorted-set members with `min <= score <= max`; returns how many.
    async fn zrem_range_by_score(&self, key: &str, min: u64, max: u64) -> Result<u64>;

    /// Number of members in a sorted set.
    async fn zcard(&self, key: &str) -> Result<u64>;

    /// Lowest score in a sorted set.
    async fn zmin_score(&self, key: &str) -> Result<Option<u64>>;

    /// Prune entries older than `now_ms - window`, record `member` at
    /// `now_ms`, and report the resulting window.
    ///
    /// The default implementation issues the primitive operations one by
    /// one; backends with transactions should override it to run atomically.
    async fn sliding_window(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
        member: &str,
    ) -> Result<WindowCount> {
        let window_ms = window.as_millis() as u64;
        if let Some(cutoff) = now_ms.checked_sub(window_ms) {
            self.zrem_range_by_score(key, 0, cutoff).await?;
        }
        self.zadd(key, now_ms, member).await?;
        let count = self.zcard(key).await?;
        let oldest_ms = self.zmin_score(key).await?;
        self.expire(key, window).await?;
        Ok(WindowCount { count, oldest_ms })
    }
}
