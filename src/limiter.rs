//! Sliding-window rate limiter.
//!
//! Each identifier owns a sorted set `ratelimit:{identifier}` in the shared
//! store whose members are request timestamps (epoch millis). A check prunes
//! members older than the window, records the current request and counts
//! what is left. Rejected requests are recorded too, so a client hammering
//! a closed window keeps it closed.
//!
//! The limiter fails open: when the store is unreachable every request is
//! allowed and the failure is logged and counted.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::now_ms;
use crate::store::SharedStore;
use crate::telemetry;
use crate::types::ServiceRateLimit;

/// Requests allowed per window.
///
/// ```rust
/// # use cellgate::RateLimitConfig;
/// # use std::time::Duration;
/// let config = RateLimitConfig::new(100, Duration::from_secs(60));
/// assert_eq!(config.max_requests, 100);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: u64,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    pub fn new(max_requests: u64, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

impl From<ServiceRateLimit> for RateLimitConfig {
    fn from(limit: ServiceRateLimit) -> Self {
        Self::new(limit.max_requests, Duration::from_millis(limit.window_ms))
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests left in the current window.
    pub remaining: u64,
    /// When the oldest request leaves the window, in epoch millis.
    pub reset_at: u64,
    /// How long to wait before retrying. Only set when denied.
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    fn fail_open(limit: &RateLimitConfig, now: u64) -> Self {
        Self {
            allowed: true,
            remaining: limit.max_requests,
            reset_at: now + limit.window.as_millis() as u64,
            retry_after: None,
        }
    }
}

/// Rate limiter backed by the shared store.
pub struct RateLimiter {
    store: Arc<dyn SharedStore>,
    /// Disambiguates requests landing in the same millisecond.
    seq: AtomicU64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self {
            store,
            seq: AtomicU64::new(0),
        }
    }

    /// Record a request for `identifier` and decide whether it may proceed.
    pub async fn check(&self, identifier: &str, limit: &RateLimitConfig) -> RateLimitDecision {
        let now = now_ms();
        let key = format!("ratelimit:{identifier}");
        let member = format!("{now}-{}", self.seq.fetch_add(1, Ordering::Relaxed));

        let window = match self
            .store
            .sliding_window(&key, now, limit.window, &member)
            .await
        {
            Ok(window) => window,
            Err(e) => {
                warn!(identifier, store = self.store.name(), error = %e, "rate limit check failed, allowing request");
                metrics::counter!(telemetry::RATE_LIMIT_FAIL_OPEN_TOTAL).increment(1);
                return RateLimitDecision::fail_open(limit, now);
            }
        };

        let allowed = window.count <= limit.max_requests;
        let reset_at = window.oldest_ms.unwrap_or(now) + limit.window.as_millis() as u64;
        let retry_after = (!allowed).then(|| Duration::from_millis(reset_at.saturating_sub(now)));

        if !allowed {
            debug!(identifier, count = window.count, "rate limit exceeded");
        }

        RateLimitDecision {
            allowed,
            remaining: limit.max_requests.saturating_sub(window.count),
            reset_at,
            retry_after,
        }
    }
}
