//! Workbook cache (L2).
//!
//! Loading a document is the most expensive step of a calculation, so loaded
//! handles are kept per service and reused across requests. Lookup order:
//!
//! 1. the process-local slot, if its version matches and it is younger
//!    than [`WorkbookCacheConfig::ttl`]
//! 2. the distributed snapshot `workbook:{service}:{version}`, restored
//!    through the engine
//! 3. a full build: parse the source, then fill every remote table from the
//!    [`TableCache`] (fetching on miss). Documents without remote tables are
//!    snapshotted to the shared store in the background.
//!
//! The local slot lives inside the per-service [`ServiceGuard`], so lookup,
//! build and execution happen as one unit with no other request touching the
//! handle. A handle whose execution fails or panics is discarded; a panic
//! surfaces as an engine error and never unwinds into the caller.
//!
//! In stateless mode every request gets a freshly built document. No lock is
//! taken and nothing is written to the shared store.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::tables::{DEFAULT_TABLE_TTL, TableCache, TableFetcher};
use crate::engine::{CalcEngine, Workbook};
use crate::guard::ServiceGuard;
use crate::store::SharedStore;
use crate::tasks::BackgroundTasks;
use crate::telemetry;
use crate::types::ServiceDefinition;
use crate::{CellgateError, Result};

/// Configuration for the workbook cache.
///
/// ```rust
/// # use cellgate::WorkbookCacheConfig;
/// # use std::time::Duration;
/// let config = WorkbookCacheConfig::new()
///     .ttl(Duration::from_secs(600))
///     .snapshots(false);
/// assert!(!config.stateless);
/// ```
#[derive(Debug, Clone)]
pub struct WorkbookCacheConfig {
    /// Lifetime of a process-local handle. Default: 10 minutes.
    pub ttl: Duration,
    /// Lifetime of a distributed snapshot. Default: 1 hour.
    pub snapshot_ttl: Duration,
    /// Default lifetime of fetched remote tables. Default: 1 hour.
    pub table_ttl: Duration,
    /// Read and write distributed snapshots. Default: on.
    pub snapshots: bool,
    /// Build a fresh document for every request. Default: off.
    pub stateless: bool,
}

impl Default for WorkbookCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            snapshot_ttl: Duration::from_secs(3600),
            table_ttl: DEFAULT_TABLE_TTL,
            snapshots: true,
            stateless: false,
        }
    }
}

impl WorkbookCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn snapshot_ttl(mut self, ttl: Duration) -> Self {
        self.snapshot_ttl = ttl;
        self
    }

    pub fn table_ttl(mut self, ttl: Duration) -> Self {
        self.table_ttl = ttl;
        self
    }

    pub fn snapshots(mut self, enabled: bool) -> Self {
        self.snapshots = enabled;
        self
    }

    pub fn stateless(mut self, enabled: bool) -> Self {
        self.stateless = enabled;
        self
    }
}

/// A loaded document held for one service.
struct CachedWorkbook {
    handle: Box<dyn Workbook>,
    loaded_at: Instant,
    version: u64,
}

/// Per-service cache of loaded documents.
pub struct WorkbookCache {
    config: WorkbookCacheConfig,
    engine: Arc<dyn CalcEngine>,
    store: Arc<dyn SharedStore>,
    fetcher: Arc<dyn TableFetcher>,
    tables: TableCache,
    tasks: BackgroundTasks,
    slots: ServiceGuard<Option<CachedWorkbook>>,
}

impl WorkbookCache {
    pub fn new(
        config: WorkbookCacheConfig,
        engine: Arc<dyn CalcEngine>,
        store: Arc<dyn SharedStore>,
        fetcher: Arc<dyn TableFetcher>,
        tasks: BackgroundTasks,
    ) -> Self {
        Self {
            tables: TableCache::new(config.table_ttl),
            config,
            engine,
            store,
            fetcher,
            tasks,
            slots: ServiceGuard::new(),
        }
    }

    pub fn config(&self) -> &WorkbookCacheConfig {
        &self.config
    }

    pub fn tables(&self) -> &TableCache {
        &self.tables
    }

    /// Run `f` against the document for `service` with exclusive access.
    ///
    /// On error the cached handle is dropped, so the next request starts
    /// from a clean document.
    pub async fn with_workbook<T, F>(&self, service: &ServiceDefinition, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Workbook) -> Result<T> + Send,
    {
        if self.config.stateless {
            let mut handle = self.build(service, false).await?;
            return run_isolated(&service.service_id, handle.as_mut(), f);
        }

        let mut slot = self.slots.acquire(&service.service_id).await;
        let mut cached = match slot.take() {
            Some(cached) if self.is_fresh(&cached, service) => {
                metrics::counter!(telemetry::WORKBOOK_CACHE_HITS_TOTAL, "tier" => "local")
                    .increment(1);
                cached
            }
            _ => CachedWorkbook {
                handle: self.load(service).await?,
                loaded_at: Instant::now(),
                version: service.version,
            },
        };

        let result = run_isolated(&service.service_id, cached.handle.as_mut(), f);
        match &result {
            Ok(_) => *slot = Some(cached),
            Err(e) => debug!(
                service_id = %service.service_id,
                error = %e,
                "discarding workbook after failed execution"
            ),
        }
        result
    }

    /// Version of the locally cached document, if any.
    pub async fn cached_version(&self, service_id: &str) -> Option<u64> {
        self.slots
            .with_exclusive_access(service_id, |slot| slot.as_ref().map(|c| c.version))
            .await
    }

    /// Drop the local handle, its distributed snapshot and the service's
    /// remote tables.
    ///
    /// `version` names an additional snapshot version to delete, typically
    /// the currently published one. Snapshot deletes go through the
    /// background queue so they land after any snapshot write queued before
    /// this call, and the service stays locked until they have run.
    pub async fn invalidate_service(&self, service_id: &str, version: Option<u64>) {
        let mut slot = self.slots.acquire(service_id).await;
        let cached_version = slot.take().map(|c| c.version);

        let mut versions: Vec<u64> = cached_version.into_iter().chain(version).collect();
        versions.dedup();
        if !versions.is_empty() {
            let store = self.store.clone();
            let id = service_id.to_string();
            let deleted = self
                .tasks
                .run("workbook_invalidate", async move {
                    for v in versions {
                        if let Err(e) = store.delete(&snapshot_key(&id, v)).await {
                            warn!(service_id = %id, version = v, error = %e, "failed to delete workbook snapshot");
                        }
                    }
                    Ok(())
                })
                .await;
            if let Err(e) = deleted {
                warn!(service_id, error = %e, "workbook snapshot invalidation did not run");
            }
        }
        drop(slot);

        self.tables.invalidate_service(service_id).await;
        debug!(service_id, "invalidated workbook cache");
    }

    fn is_fresh(&self, cached: &CachedWorkbook, service: &ServiceDefinition) -> bool {
        cached.version == service.version && cached.loaded_at.elapsed() < self.config.ttl
    }

    async fn load(&self, service: &ServiceDefinition) -> Result<Box<dyn Workbook>> {
        if self.config.snapshots
            && let Some(handle) = self.restore(service).await
        {
            metrics::counter!(telemetry::WORKBOOK_CACHE_HITS_TOTAL, "tier" => "distributed")
                .increment(1);
            return Ok(handle);
        }
        self.build(service, self.config.snapshots).await
    }

    async fn restore(&self, service: &ServiceDefinition) -> Option<Box<dyn Workbook>> {
        let key = snapshot_key(&service.service_id, service.version);
        let bytes = match self.store.get(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(service_id = %service.service_id, error = %e, "workbook snapshot lookup failed");
                return None;
            }
        };
        match self.engine.restore(&bytes) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(service_id = %service.service_id, error = %e, "discarding unreadable workbook snapshot");
                None
            }
        }
    }

    async fn build(&self, service: &ServiceDefinition, publish: bool) -> Result<Box<dyn Workbook>> {
        let service_id = service.service_id.as_str();
        debug!(service_id, engine = self.engine.name(), "loading workbook");
        metrics::counter!(telemetry::WORKBOOK_LOADS_TOTAL, "service" => service_id.to_string())
            .increment(1);

        let mut handle = self.engine.load(&service.source)?;
        let tables = handle.remote_tables();
        let ttl = service.table_cache_ttl_secs.map(Duration::from_secs);
        for table in &tables {
            let data = self
                .tables
                .get_or_fetch(service_id, table, ttl, self.fetcher.as_ref())
                .await?;
            handle.load_table(table, &data)?;
        }

        if publish && tables.is_empty() {
            self.publish_snapshot(service, handle.as_ref());
        }
        Ok(handle)
    }

    fn publish_snapshot(&self, service: &ServiceDefinition, handle: &dyn Workbook) {
        let bytes = match handle.snapshot() {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return,
            Err(e) => {
                warn!(service_id = %service.service_id, error = %e, "failed to snapshot workbook");
                return;
            }
        };
        let store = self.store.clone();
        let key = snapshot_key(&service.service_id, service.version);
        let ttl = self.config.snapshot_ttl;
        self.tasks.submit("workbook_snapshot", async move {
            store.set(&key, bytes, Some(ttl)).await
        });
    }
}

/// Run `f` against `handle`, turning a panic inside the engine into
/// [`CellgateError::Engine`].
fn run_isolated<T, F>(service_id: &str, handle: &mut dyn Workbook, f: F) -> Result<T>
where
    F: FnOnce(&mut dyn Workbook) -> Result<T>,
{
    std::panic::catch_unwind(AssertUnwindSafe(|| f(handle))).unwrap_or_else(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        warn!(service_id, reason = %reason, "engine panicked during calculation");
        Err(CellgateError::Engine(format!("engine panicked: {reason}")))
    })
}

/// Shared-store key of a workbook snapshot.
pub fn snapshot_key(service_id: &str, version: u64) -> String {
    format!("workbook:{service_id}:{version}")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::engine::MemoryEngine;
    use crate::store::MemoryStore;
    use crate::HttpTableFetcher;
    use crate::types::CellValue;

    const DOC: &str = r#"{"sheets": [{"name": "Sheet1", "cells": {"A1": 1}}]}"#;

    struct CountingEngine {
        inner: MemoryEngine,
        loads: AtomicUsize,
    }

    impl CalcEngine for CountingEngine {
        fn name(&self) -> &str {
            "counting"
        }

        fn load(&self, source: &str) -> Result<Box<dyn Workbook>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load(source)
        }

        fn restore(&self, snapshot: &[u8]) -> Result<Box<dyn Workbook>> {
            self.inner.restore(snapshot)
        }
    }

    fn cache(config: WorkbookCacheConfig) -> (WorkbookCache, Arc<CountingEngine>, Arc<MemoryStore>) {
        let engine = Arc::new(CountingEngine {
            inner: MemoryEngine::new(),
            loads: AtomicUsize::new(0),
        });
        let store = Arc::new(MemoryStore::new());
        let cache = WorkbookCache::new(
            config,
            engine.clone(),
            store.clone(),
            Arc::new(HttpTableFetcher::new()),
            BackgroundTasks::spawn(16),
        );
        (cache, engine, store)
    }

    fn read_a1(wb: &mut dyn Workbook) -> Result<CellValue> {
        wb.get_cell("Sheet1", 0, 0)
    }

    #[tokio::test]
    async fn reuses_loaded_handle() {
        let (cache, engine, _) = cache(WorkbookCacheConfig::new());
        let service = ServiceDefinition::new("svc", DOC);
        cache.with_workbook(&service, read_a1).await.unwrap();
        cache.with_workbook(&service, read_a1).await.unwrap();
        assert_eq!(engine.loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.cached_version("svc").await, Some(0));
    }

    #[tokio::test]
    async fn new_version_reloads() {
        let (cache, engine, _) = cache(WorkbookCacheConfig::new().snapshots(false));
        let service = ServiceDefinition::new("svc", DOC);
        cache.with_workbook(&service, read_a1).await.unwrap();
        cache
            .with_workbook(&service.clone().version(2), read_a1)
            .await
            .unwrap();
        assert_eq!(engine.loads.load(Ordering::SeqCst), 2);
        assert_eq!(cache.cached_version("svc").await, Some(2));
    }

    #[tokio::test]
    async fn failed_execution_discards_handle() {
        let (cache, _, _) = cache(WorkbookCacheConfig::new());
        let service = ServiceDefinition::new("svc", DOC);
        let err = cache
            .with_workbook(&service, |wb| wb.get_cell("Missing", 0, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, CellgateError::SheetNotFound(_)));
        assert_eq!(cache.cached_version("svc").await, None);
    }

    #[tokio::test]
    async fn snapshot_is_written_and_restored() {
        let (cache, engine, store) = cache(WorkbookCacheConfig::new());
        let service = ServiceDefinition::new("svc", DOC);
        cache.with_workbook(&service, read_a1).await.unwrap();
        cache.tasks.drain().await;
        assert!(store.get(&snapshot_key("svc", 0)).await.unwrap().is_some());

        // Drop only the local slot; the next load comes from the snapshot.
        cache.slots.with_exclusive_access("svc", |slot| *slot = None).await;
        let value = cache.with_workbook(&service, read_a1).await.unwrap();
        assert_eq!(value, CellValue::Number(1.0));
        assert_eq!(engine.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stateless_mode_builds_every_time() {
        let (cache, engine, store) = cache(WorkbookCacheConfig::new().stateless(true));
        let service = ServiceDefinition::new("svc", DOC);
        cache.with_workbook(&service, read_a1).await.unwrap();
        cache.with_workbook(&service, read_a1).await.unwrap();
        cache.tasks.drain().await;
        assert_eq!(engine.loads.load(Ordering::SeqCst), 2);
        assert!(store.is_empty());
        assert!(cache.slots.is_empty());
    }

    #[tokio::test]
    async fn panicking_execution_is_an_engine_error() {
        let (cache, _, _) = cache(WorkbookCacheConfig::new());
        let service = ServiceDefinition::new("svc", DOC);
        cache.with_workbook(&service, read_a1).await.unwrap();

        let err = cache
            .with_workbook(&service, |_| -> Result<()> { panic!("stack overflow in formula") })
            .await
            .unwrap_err();
        assert!(matches!(err, CellgateError::Engine(ref msg) if msg.contains("stack overflow")));
        assert_eq!(cache.cached_version("svc").await, None);

        // The lock was released and the next request loads a fresh document.
        let value = cache.with_workbook(&service, read_a1).await.unwrap();
        assert_eq!(value, CellValue::Number(1.0));
    }

    #[tokio::test]
    async fn stateless_panics_are_engine_errors() {
        let (cache, _, _) = cache(WorkbookCacheConfig::new().stateless(true));
        let service = ServiceDefinition::new("svc", DOC);
        let err = cache
            .with_workbook(&service, |_| -> Result<()> { panic!("{}", String::from("bad")) })
            .await
            .unwrap_err();
        assert!(matches!(err, CellgateError::Engine(ref msg) if msg == "engine panicked: bad"));
    }

    #[tokio::test]
    async fn local_handle_expires_after_ttl() {
        let (cache, engine, _) = cache(
            WorkbookCacheConfig::new()
                .ttl(Duration::from_millis(200))
                .snapshots(false),
        );
        let service = ServiceDefinition::new("svc", DOC);
        cache.with_workbook(&service, read_a1).await.unwrap();
        cache.with_workbook(&service, read_a1).await.unwrap();
        assert_eq!(engine.loads.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        cache.with_workbook(&service, read_a1).await.unwrap();
        assert_eq!(engine.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_snapshot_is_not_restored() {
        let (cache, engine, store) =
            cache(WorkbookCacheConfig::new().snapshot_ttl(Duration::from_millis(200)));
        let service = ServiceDefinition::new("svc", DOC);
        cache.with_workbook(&service, read_a1).await.unwrap();
        cache.tasks.drain().await;
        assert!(store.get(&snapshot_key("svc", 0)).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(store.get(&snapshot_key("svc", 0)).await.unwrap().is_none());
        cache.slots.with_exclusive_access("svc", |slot| *slot = None).await;
        cache.with_workbook(&service, read_a1).await.unwrap();
        assert_eq!(engine.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_lands_after_a_queued_snapshot_write() {
        let (cache, _, store) = cache(WorkbookCacheConfig::new());
        let service = ServiceDefinition::new("svc", DOC);

        // Hold the worker so the snapshot write is still queued when the
        // invalidation starts.
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        cache.tasks.submit("hold", async move {
            let _ = release_rx.await;
            Ok(())
        });
        cache.with_workbook(&service, read_a1).await.unwrap();

        let release = async move {
            tokio::task::yield_now().await;
            let _ = release_tx.send(());
        };
        tokio::join!(cache.invalidate_service("svc", Some(0)), release);
        cache.tasks.drain().await;

        assert!(store.get(&snapshot_key("svc", 0)).await.unwrap().is_none());
        assert_eq!(cache.cached_version("svc").await, None);
    }

    #[tokio::test]
    async fn invalidate_drops_local_and_snapshot() {
        let (cache, engine, store) = cache(WorkbookCacheConfig::new());
        let service = ServiceDefinition::new("svc", DOC);
        cache.with_workbook(&service, read_a1).await.unwrap();
        cache.tasks.drain().await;

        cache.invalidate_service("svc", Some(0)).await;
        assert!(store.get(&snapshot_key("svc", 0)).await.unwrap().is_none());
        cache.with_workbook(&service, read_a1).await.unwrap();
        assert_eq!(engine.loads.load(Ordering::SeqCst), 2);
    }
}
