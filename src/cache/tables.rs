//! Remote table data cache.
//!
//! Some documents pull sheets from external systems. Fetching them is slow
//! and the data changes rarely, so fetched rows are cached per
//! `(service, table, source url)` with a per-service TTL. The cache is
//! consulted by the workbook builder before any live fetch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use serde_json::Value;
use tracing::debug;

use crate::engine::RemoteTable;
use crate::telemetry;
use crate::types::{CellValue, TableData};
use crate::{CellgateError, Result};

/// Default lifetime of fetched table data.
pub const DEFAULT_TABLE_TTL: Duration = Duration::from_secs(3600);

/// Default number of cached tables.
const DEFAULT_MAX_TABLES: u64 = 1_000;

/// Source of remote table rows.
#[async_trait]
pub trait TableFetcher: Send + Sync {
    /// Fetch the current rows of `table`.
    async fn fetch(&self, table: &RemoteTable) -> Result<TableData>;
}

/// Fetches tables over HTTP.
///
/// The response body must be JSON: either an array of rows (each an array
/// of scalars) or an array of objects, in which case the first object's
/// keys become a header row.
#[derive(Debug, Clone, Default)]
pub struct HttpTableFetcher {
    client: reqwest::Client,
}

impl HttpTableFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client (timeouts, proxies, default headers).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TableFetcher for HttpTableFetcher {
    async fn fetch(&self, table: &RemoteTable) -> Result<TableData> {
        let url = &table.source_url;
        let response = self.client.get(url).send().await.map_err(|e| {
            CellgateError::TableFetch(format!("failed to fetch table {}: {e}", table.table_id))
        })?;

        if !response.status().is_success() {
            return Err(CellgateError::TableFetch(format!(
                "table {} fetch returned HTTP {}",
                table.table_id,
                response.status()
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            CellgateError::TableFetch(format!("table {} body is not JSON: {e}", table.table_id))
        })?;

        parse_table(&body)
            .map_err(|msg| CellgateError::TableFetch(format!("table {}: {msg}", table.table_id)))
    }
}

/// Convert a JSON payload into rows.
pub fn parse_table(body: &Value) -> std::result::Result<TableData, String> {
    let Value::Array(items) = body else {
        return Err("expected a JSON array".into());
    };

    match items.first() {
        None => Ok(Vec::new()),
        Some(Value::Object(first)) => {
            let header: Vec<String> = first.keys().cloned().collect();
            let mut rows: TableData = Vec::with_capacity(items.len() + 1);
            rows.push(header.iter().map(|k| CellValue::Text(k.clone())).collect());
            for item in items {
                let Value::Object(obj) = item else {
                    return Err("mixed objects and non-objects".into());
                };
                rows.push(
                    header
                        .iter()
                        .map(|k| obj.get(k).map(CellValue::from_json).unwrap_or_default())
                        .collect(),
                );
            }
            Ok(rows)
        }
        Some(_) => items
            .iter()
            .map(|row| match row {
                Value::Array(cells) => Ok(cells.iter().map(CellValue::from_json).collect::<Vec<_>>()),
                _ => Err("expected every row to be an array".to_string()),
            })
            .collect(),
    }
}

#[derive(Debug)]
struct CachedTable {
    data: Arc<TableData>,
    fetched_at: Instant,
}

/// Cache of fetched table rows.
pub struct TableCache {
    entries: Cache<String, Arc<CachedTable>>,
    default_ttl: Duration,
}

impl TableCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self::with_max_entries(default_ttl, DEFAULT_MAX_TABLES)
    }

    pub fn with_max_entries(default_ttl: Duration, max: u64) -> Self {
        Self {
            entries: Cache::new(max),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Return cached rows for `table`, fetching them through `fetcher` when
    /// absent or older than `ttl` (the default TTL when `None`).
    pub async fn get_or_fetch(
        &self,
        service_id: &str,
        table: &RemoteTable,
        ttl: Option<Duration>,
        fetcher: &dyn TableFetcher,
    ) -> Result<Arc<TableData>> {
        let key = table_key(service_id, table);
        let ttl = ttl.unwrap_or(self.default_ttl);

        if let Some(cached) = self.entries.get(&key).await {
            if cached.fetched_at.elapsed() < ttl {
                metrics::counter!(telemetry::TABLE_LOOKUPS_TOTAL, "outcome" => "hit").increment(1);
                return Ok(cached.data.clone());
            }
            self.entries.invalidate(&key).await;
        }

        debug!(service_id, table_id = %table.table_id, url = %table.source_url, "fetching remote table");
        metrics::counter!(telemetry::TABLE_LOOKUPS_TOTAL, "outcome" => "fetch").increment(1);
        let data = Arc::new(fetcher.fetch(table).await?);
        self.entries
            .insert(
                key,
                Arc::new(CachedTable {
                    data: data.clone(),
                    fetched_at: Instant::now(),
                }),
            )
            .await;
        Ok(data)
    }

    /// Drop every table cached for `service_id`.
    pub async fn invalidate_service(&self, service_id: &str) {
        let prefix = format!("{service_id}\u{1f}");
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix.as_str()))
            .map(|(key, _)| key.to_string())
            .collect();
        for key in keys {
            self.entries.invalidate(&key).await;
        }
    }

    pub fn len(&self) -> u64 {
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TableCache {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_TTL)
    }
}

/// Unit-separator joined key, so ids containing `:` cannot collide.
fn table_key(service_id: &str, table: &RemoteTable) -> String {
    format!("{service_id}\u{1f}{}\u{1f}{}", table.table_id, table.source_url)
}
