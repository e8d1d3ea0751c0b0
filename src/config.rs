//! File-based configuration.
//!
//! Configuration is loaded from TOML with the following resolution order:
//! 1. an explicit path
//! 2. `~/.cellgate/config.toml` (user)
//! 3. `/etc/cellgate/config.toml` (system)
//!
//! Every field has a default, so an empty file is a valid configuration.
//! [`CellgateBuilder::config`](crate::CellgateBuilder::config) applies a
//! loaded [`Config`] to a gateway.
//!
//! ```toml
//! [cache]
//! max_entries = 5000
//! ttl_secs = 300
//!
//! [workbook]
//! stateless = false
//!
//! [rate_limit]
//! max_requests = 100
//! window_secs = 60
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::analytics::AnalyticsConfig;
use crate::cache::{ResultCacheConfig, WorkbookCacheConfig};
use crate::limiter::RateLimitConfig;
use crate::{CellgateError, Result};

/// Gateway configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub workbook: WorkbookSection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub analytics: AnalyticsSection,
    #[serde(default)]
    pub limits: LimitsSection,
}

/// Result cache settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    /// Maximum local result entries (default: 1000).
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Result lifetime in seconds (default: 300).
    #[serde(default = "default_result_ttl")]
    pub ttl_secs: u64,
    /// Share results through the shared store (default: false).
    #[serde(default)]
    pub distributed: bool,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            ttl_secs: default_result_ttl(),
            distributed: false,
        }
    }
}

fn default_max_entries() -> usize {
    1_000
}

fn default_result_ttl() -> u64 {
    300
}

/// Workbook cache settings.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkbookSection {
    /// Local handle lifetime in seconds (default: 600).
    #[serde(default = "default_workbook_ttl")]
    pub ttl_secs: u64,
    /// Snapshot lifetime in seconds (default: 3600).
    #[serde(default = "default_snapshot_ttl")]
    pub snapshot_ttl_secs: u64,
    /// Remote table lifetime in seconds (default: 3600).
    #[serde(default = "default_table_ttl")]
    pub table_ttl_secs: u64,
    /// Read and write distributed snapshots (default: true).
    #[serde(default = "default_true")]
    pub snapshots: bool,
    /// Build a fresh document per request (default: false).
    #[serde(default)]
    pub stateless: bool,
}

impl Default for WorkbookSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_workbook_ttl(),
            snapshot_ttl_secs: default_snapshot_ttl(),
            table_ttl_secs: default_table_ttl(),
            snapshots: true,
            stateless: false,
        }
    }
}

fn default_workbook_ttl() -> u64 {
    600
}

fn default_snapshot_ttl() -> u64 {
    3_600
}

fn default_table_ttl() -> u64 {
    3_600
}

fn default_true() -> bool {
    true
}

/// Default rate limit, applied to services without an override.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    /// Requests per window (default: 100).
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,
    /// Window length in seconds (default: 60).
    #[serde(default = "default_window")]
    pub window_secs: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window(),
        }
    }
}

fn default_max_requests() -> u64 {
    100
}

fn default_window() -> u64 {
    60
}

/// Analytics batching settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsSection {
    /// Increments per flush (default: 100).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum delay before a flush, in milliseconds (default: 5000).
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,
    /// Queue capacity (default: 1024).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for AnalyticsSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_batch_size() -> usize {
    100
}

fn default_flush_interval() -> u64 {
    5_000
}

fn default_queue_capacity() -> usize {
    1_024
}

/// Request limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsSection {
    /// Request deadline in seconds; 0 disables it (default: 30).
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    /// Background task queue capacity (default: 256).
    #[serde(default = "default_background_queue")]
    pub background_queue: usize,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_timeout(),
            background_queue: default_background_queue(),
        }
    }
}

impl LimitsSection {
    /// The request deadline, if enabled.
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_background_queue() -> usize {
    crate::tasks::DEFAULT_TASK_QUEUE
}

impl From<&CacheSection> for ResultCacheConfig {
    fn from(section: &CacheSection) -> Self {
        ResultCacheConfig::new()
            .max_entries(section.max_entries)
            .ttl(Duration::from_secs(section.ttl_secs))
            .distributed(section.distributed)
    }
}

impl From<&WorkbookSection> for WorkbookCacheConfig {
    fn from(section: &WorkbookSection) -> Self {
        WorkbookCacheConfig::new()
            .ttl(Duration::from_secs(section.ttl_secs))
            .snapshot_ttl(Duration::from_secs(section.snapshot_ttl_secs))
            .table_ttl(Duration::from_secs(section.table_ttl_secs))
            .snapshots(section.snapshots)
            .stateless(section.stateless)
    }
}

impl From<&RateLimitSection> for RateLimitConfig {
    fn from(section: &RateLimitSection) -> Self {
        RateLimitConfig::new(section.max_requests, Duration::from_secs(section.window_secs))
    }
}

impl From<&AnalyticsSection> for AnalyticsConfig {
    fn from(section: &AnalyticsSection) -> Self {
        AnalyticsConfig::new()
            .batch_size(section.batch_size)
            .flush_interval(Duration::from_millis(section.flush_interval_ms))
            .queue_capacity(section.queue_capacity)
    }
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.cellgate/config.toml`
    /// 3. `/etc/cellgate/config.toml`
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        Self::from_file(&path)
    }

    /// Load a specific file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CellgateError::Configuration(format!("failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            CellgateError::Configuration(format!("failed to parse config file {path:?}: {e}"))
        })
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(CellgateError::Configuration(format!(
                "config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".cellgate").join("config.toml");
            if user_config.exists() {
                return Ok(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/cellgate/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }

        Err(CellgateError::Configuration(
            "no config file found; create ~/.cellgate/config.toml or /etc/cellgate/config.toml"
                .to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.cache.max_entries, 1_000);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert!(config.workbook.snapshots);
        assert_eq!(
            config.limits.request_timeout(),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
            [cache]
            ttl_secs = 10
            distributed = true

            [workbook]
            stateless = true

            [limits]
            request_timeout_secs = 0
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        let result = ResultCacheConfig::from(&config.cache);
        assert_eq!(result.ttl, Duration::from_secs(10));
        assert!(result.distributed);
        assert_eq!(result.max_entries, 1_000);
        assert!(WorkbookCacheConfig::from(&config.workbook).stateless);
        assert_eq!(config.limits.request_timeout(), None);
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/cellgate.toml"))).unwrap_err();
        assert_eq!(err.code(), "INTERNAL_ERROR");
    }
}
