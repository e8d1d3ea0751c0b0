//! Builder for configuring gateway instances

use std::sync::Arc;
use std::time::Duration;

use super::CalcGateway;
use crate::analytics::{AnalyticsBatcher, AnalyticsConfig, AnalyticsSink, StoreAnalyticsSink};
use crate::cache::{
    HttpTableFetcher, ResultCache, ResultCacheConfig, TableFetcher, WorkbookCache,
    WorkbookCacheConfig,
};
use crate::catalog::ServiceCatalog;
use crate::config::Config;
use crate::engine::CalcEngine;
use crate::limiter::{RateLimitConfig, RateLimiter};
use crate::store::{MemoryStore, SharedStore};
use crate::tasks::{BackgroundTasks, DEFAULT_TASK_QUEUE};
use crate::{CellgateError, Result};

/// Main entry point for creating gateway instances.
pub struct Cellgate;

impl Cellgate {
    /// Create a new builder for configuring the gateway.
    pub fn builder() -> CellgateBuilder {
        CellgateBuilder::new()
    }
}

/// Builder for configuring gateway instances.
///
/// A catalog and an engine are required; everything else has a default:
/// an in-process [`MemoryStore`], an [`HttpTableFetcher`], and analytics
/// written to the store.
pub struct CellgateBuilder {
    catalog: Option<Arc<dyn ServiceCatalog>>,
    engine: Option<Arc<dyn CalcEngine>>,
    store: Option<Arc<dyn SharedStore>>,
    fetcher: Option<Arc<dyn TableFetcher>>,
    analytics_sink: Option<Arc<dyn AnalyticsSink>>,
    result_cache: ResultCacheConfig,
    workbook_cache: WorkbookCacheConfig,
    rate_limit: RateLimitConfig,
    analytics: AnalyticsConfig,
    request_timeout: Option<Duration>,
    background_queue: usize,
}

impl CellgateBuilder {
    pub fn new() -> Self {
        Self {
            catalog: None,
            engine: None,
            store: None,
            fetcher: None,
            analytics_sink: None,
            result_cache: ResultCacheConfig::default(),
            workbook_cache: WorkbookCacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
            analytics: AnalyticsConfig::default(),
            request_timeout: None,
            background_queue: DEFAULT_TASK_QUEUE,
        }
    }

    /// Source of service definitions and tokens.
    pub fn catalog(mut self, catalog: Arc<dyn ServiceCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Calculation engine used to load documents.
    pub fn engine(mut self, engine: Arc<dyn CalcEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Shared store for snapshots, rate-limit windows and analytics.
    pub fn store(mut self, store: Arc<dyn SharedStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Fetcher for remote table data.
    pub fn table_fetcher(mut self, fetcher: Arc<dyn TableFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Destination of analytics counters. Defaults to the shared store.
    pub fn analytics_sink(mut self, sink: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics_sink = Some(sink);
        self
    }

    pub fn result_cache(mut self, config: ResultCacheConfig) -> Self {
        self.result_cache = config;
        self
    }

    pub fn workbook_cache(mut self, config: WorkbookCacheConfig) -> Self {
        self.workbook_cache = config;
        self
    }

    /// Rate limit for services without their own override.
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = config;
        self
    }

    pub fn analytics(mut self, config: AnalyticsConfig) -> Self {
        self.analytics = config;
        self
    }

    /// Deadline for a whole request. Off by default.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Capacity of the background task queue.
    pub fn background_queue(mut self, capacity: usize) -> Self {
        self.background_queue = capacity;
        self
    }

    /// Apply every section of a loaded [`Config`].
    pub fn config(mut self, config: &Config) -> Self {
        self.result_cache = (&config.cache).into();
        self.workbook_cache = (&config.workbook).into();
        self.rate_limit = (&config.rate_limit).into();
        self.analytics = (&config.analytics).into();
        self.request_timeout = config.limits.request_timeout();
        self.background_queue = config.limits.background_queue;
        self
    }

    /// Build the gateway.
    ///
    /// Spawns the background and analytics workers, so it must be called
    /// within a tokio runtime.
    pub fn build(self) -> Result<CalcGateway> {
        let catalog = self
            .catalog
            .ok_or_else(|| CellgateError::Configuration("no service catalog configured".into()))?;
        let engine = self
            .engine
            .ok_or_else(|| CellgateError::Configuration("no calculation engine configured".into()))?;
        let store: Arc<dyn SharedStore> = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let fetcher: Arc<dyn TableFetcher> = self
            .fetcher
            .unwrap_or_else(|| Arc::new(HttpTableFetcher::new()));
        let sink: Arc<dyn AnalyticsSink> = self
            .analytics_sink
            .unwrap_or_else(|| Arc::new(StoreAnalyticsSink::new(store.clone())));

        let tasks = BackgroundTasks::spawn(self.background_queue);

        let mut results = ResultCache::new(self.result_cache.clone());
        if self.result_cache.distributed {
            results = results.distributed(store.clone(), tasks.clone());
        }

        let workbooks = WorkbookCache::new(
            self.workbook_cache,
            engine,
            store.clone(),
            fetcher,
            tasks.clone(),
        );

        Ok(CalcGateway {
            catalog,
            results,
            workbooks,
            limiter: RateLimiter::new(store),
            analytics: AnalyticsBatcher::spawn(self.analytics, sink),
            tasks,
            rate_limit: self.rate_limit,
            request_timeout: self.request_timeout,
        })
    }
}

impl Default for CellgateBuilder {
    fn default() -> Self {
        Self::new()
    }
}
