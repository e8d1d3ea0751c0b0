//! Telemetry metric name constants.
//!
//! Centralised metric names for cellgate operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `cellgate_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `service`: service id
//! - `tier`: cache tier: "local" or "distributed"
//! - `status`: outcome: "ok" or the error code

/// Total calculation requests handled by the gateway.
///
/// Labels: `service`, `status` ("ok" | error code).
pub const REQUESTS_TOTAL: &str = "cellgate_requests_total";

/// End-to-end request duration in seconds.
///
/// Labels: `service`, `cached` ("true" | "false").
pub const REQUEST_DURATION_SECONDS: &str = "cellgate_request_duration_seconds";

/// Result cache hits.
///
/// Labels: `tier`.
pub const RESULT_CACHE_HITS_TOTAL: &str = "cellgate_result_cache_hits_total";

/// Result cache misses.
pub const RESULT_CACHE_MISSES_TOTAL: &str = "cellgate_result_cache_misses_total";

/// Result cache entries evicted because the bound was reached.
pub const RESULT_CACHE_EVICTIONS_TOTAL: &str = "cellgate_result_cache_evictions_total";

/// Workbook cache hits.
///
/// Labels: `tier` ("local" | "distributed").
pub const WORKBOOK_CACHE_HITS_TOTAL: &str = "cellgate_workbook_cache_hits_total";

/// Documents parsed from their raw source.
///
/// Labels: `service`.
pub const WORKBOOK_LOADS_TOTAL: &str = "cellgate_workbook_loads_total";

/// Remote table lookups.
///
/// Labels: `outcome` ("hit" | "fetch").
pub const TABLE_LOOKUPS_TOTAL: &str = "cellgate_table_lookups_total";

/// Requests rejected by the rate limiter.
///
/// Labels: `service`.
pub const RATE_LIMITED_TOTAL: &str = "cellgate_rate_limited_total";

/// Rate-limit checks that failed open because the store was unreachable.
pub const RATE_LIMIT_FAIL_OPEN_TOTAL: &str = "cellgate_rate_limit_fail_open_total";

/// Tasks currently waiting on a per-service guard.
pub const GUARD_WAITERS: &str = "cellgate_guard_waiters";

/// Time spent waiting for a per-service guard, in seconds.
pub const GUARD_WAIT_SECONDS: &str = "cellgate_guard_wait_seconds";

/// Analytics flushes.
///
/// Labels: `status` ("ok" | "error").
pub const ANALYTICS_FLUSHES_TOTAL: &str = "cellgate_analytics_flushes_total";

/// Analytics increments dropped because the queue was full.
pub const ANALYTICS_DROPPED_TOTAL: &str = "cellgate_analytics_dropped_total";

/// Background tasks dropped because the queue was full.
pub const BACKGROUND_DROPPED_TOTAL: &str = "cellgate_background_dropped_total";

/// Background tasks that returned an error or panicked.
pub const BACKGROUND_FAILED_TOTAL: &str = "cellgate_background_failed_total";
