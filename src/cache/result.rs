//! Result cache (L1).
//!
//! Maps `(service id, version, input digest)` to the outputs of a finished
//! calculation. A hit skips the document, the guard and the engine
//! entirely.
//!
//! # Eviction
//!
//! The local tier is bounded and evicts in insertion order: when a new key
//! arrives at the bound, the oldest entry goes first. Overwriting a key that
//! is already present never evicts. Expired entries read as a miss and are
//! removed on the read that finds them.
//!
//! # Distributed tier
//!
//! With [`ResultCache::distributed`], local misses fall through to the
//! shared store under `result:{key}`. Hits found there are promoted into the
//! local tier with their remaining lifetime. Writes go through the
//! background queue so a slow store never delays a response.
//!
//! Distributed entries cannot be enumerated, so
//! [`ResultCache::invalidate_service`] only clears the local tier. Entries
//! are version-keyed; publishing a new version makes old entries
//! unreachable.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::now_ms;
use crate::store::SharedStore;
use crate::tasks::BackgroundTasks;
use crate::telemetry;
use crate::types::{InputSet, OutputResult, ServiceDefinition};

/// Configuration for the result cache.
///
/// ```rust
/// # use cellgate::ResultCacheConfig;
/// # use std::time::Duration;
/// let config = ResultCacheConfig::new()
///     .max_entries(5_000)
///     .ttl(Duration::from_secs(300));
/// assert_eq!(config.max_entries, 5_000);
/// ```
#[derive(Debug, Clone)]
pub struct ResultCacheConfig {
    /// Maximum number of local entries. Default: 1,000.
    pub max_entries: usize,
    /// Time-to-live for entries in both tiers. Default: 5 minutes.
    pub ttl: Duration,
    /// Consult and populate the shared store. Default: off.
    pub distributed: bool,
}

impl Default for ResultCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            ttl: Duration::from_secs(300),
            distributed: false,
        }
    }
}

impl ResultCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_entries(mut self, n: usize) -> Self {
        self.max_entries = n;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn distributed(mut self, enabled: bool) -> Self {
        self.distributed = enabled;
        self
    }
}

/// Outputs of a finished calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResult {
    pub outputs: Vec<OutputResult>,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

struct LocalEntry {
    service_id: String,
    result: CachedResult,
    inserted: Instant,
    id: u64,
}

#[derive(Default)]
struct ResultIndex {
    entries: HashMap<String, LocalEntry>,
    /// Insertion order as `(key, id)`. Ids that no longer match the entry
    /// are stale and skipped.
    order: VecDeque<(String, u64)>,
    next_id: u64,
}

impl ResultIndex {
    fn evict_oldest(&mut self) -> bool {
        while let Some((key, id)) = self.order.pop_front() {
            if self.entries.get(&key).is_some_and(|e| e.id == id) {
                self.entries.remove(&key);
                return true;
            }
        }
        false
    }

    fn compact(&mut self) {
        let entries = &self.entries;
        self.order
            .retain(|(key, id)| entries.get(key).is_some_and(|e| e.id == *id));
    }
}

/// Bounded TTL cache of calculation outputs.
pub struct ResultCache {
    config: ResultCacheConfig,
    index: Mutex<ResultIndex>,
    remote: Option<(Arc<dyn SharedStore>, BackgroundTasks)>,
}

impl ResultCache {
    pub fn new(config: ResultCacheConfig) -> Self {
        Self {
            config,
            index: Mutex::new(ResultIndex::default()),
            remote: None,
        }
    }

    /// Back local misses with the shared store.
    pub fn distributed(mut self, store: Arc<dyn SharedStore>, tasks: BackgroundTasks) -> Self {
        self.remote = Some((store, tasks));
        self
    }

    pub fn config(&self) -> &ResultCacheConfig {
        &self.config
    }

    /// Look up cached outputs for `inputs`.
    pub async fn get(&self, service: &ServiceDefinition, inputs: &InputSet) -> Option<CachedResult> {
        let key = result_key(service, inputs);
        if let Some(hit) = self.get_local(&key) {
            metrics::counter!(telemetry::RESULT_CACHE_HITS_TOTAL, "tier" => "local").increment(1);
            return Some(hit);
        }

        if let Some((store, _)) = &self.remote
            && let Some(hit) = self.get_remote(store.as_ref(), &key).await
        {
            metrics::counter!(telemetry::RESULT_CACHE_HITS_TOTAL, "tier" => "distributed")
                .increment(1);
            let age = Duration::from_millis(now_ms().saturating_sub(hit.created_at));
            let inserted = Instant::now().checked_sub(age).unwrap_or_else(Instant::now);
            self.insert_local(&service.service_id, key, hit.clone(), inserted);
            return Some(hit);
        }

        metrics::counter!(telemetry::RESULT_CACHE_MISSES_TOTAL).increment(1);
        None
    }

    /// Store outputs for `inputs`.
    pub fn set(&self, service: &ServiceDefinition, inputs: &InputSet, outputs: Vec<OutputResult>) {
        let key = result_key(service, inputs);
        let result = CachedResult {
            outputs,
            created_at: now_ms(),
        };

        if let Some((store, tasks)) = &self.remote {
            match serde_json::to_vec(&result) {
                Ok(bytes) => {
                    let store = store.clone();
                    let store_key = format!("result:{key}");
                    let ttl = self.config.ttl;
                    tasks.submit("result_write", async move {
                        store.set(&store_key, bytes, Some(ttl)).await
                    });
                }
                Err(e) => warn!(error = %e, "failed to serialize cached result"),
            }
        }

        self.insert_local(&service.service_id, key, result, Instant::now());
    }

    /// Drop every local entry for `service_id`. Returns how many were removed.
    pub fn invalidate_service(&self, service_id: &str) -> usize {
        let mut index = self.index.lock();
        let before = index.entries.len();
        index.entries.retain(|_, e| e.service_id != service_id);
        let removed = before - index.entries.len();
        if removed > 0 {
            index.compact();
        }
        debug!(service_id, removed, "invalidated cached results");
        removed
    }

    /// Number of local entries, expired or not.
    pub fn len(&self) -> usize {
        self.index.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut index = self.index.lock();
        index.entries.clear();
        index.order.clear();
    }

    fn get_local(&self, key: &str) -> Option<CachedResult> {
        let mut index = self.index.lock();
        let entry = index.entries.get(key)?;
        if entry.inserted.elapsed() < self.config.ttl {
            return Some(entry.result.clone());
        }
        index.entries.remove(key);
        None
    }

    async fn get_remote(&self, store: &dyn SharedStore, key: &str) -> Option<CachedResult> {
        let bytes = match store.get(&format!("result:{key}")).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(store = store.name(), error = %e, "distributed result lookup failed");
                return None;
            }
        };
        let result: CachedResult = match serde_json::from_slice(&bytes) {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "discarding unreadable distributed result");
                return None;
            }
        };
        let age = now_ms().saturating_sub(result.created_at);
        (u128::from(age) < self.config.ttl.as_millis()).then_some(result)
    }

    fn insert_local(&self, service_id: &str, key: String, result: CachedResult, inserted: Instant) {
        if self.config.max_entries == 0 {
            return;
        }
        let mut index = self.index.lock();
        let id = index.next_id;
        index.next_id += 1;

        if !index.entries.contains_key(&key) {
            while index.entries.len() >= self.config.max_entries {
                if !index.evict_oldest() {
                    break;
                }
                metrics::counter!(telemetry::RESULT_CACHE_EVICTIONS_TOTAL).increment(1);
            }
        }

        index.order.push_back((key.clone(), id));
        index.entries.insert(
            key,
            LocalEntry {
                service_id: service_id.to_string(),
                result,
                inserted,
                id,
            },
        );

        if index.order.len() > self.config.max_entries.saturating_mul(2) {
            index.compact();
        }
    }
}

/// Cache key for a service version and input set.
pub fn result_key(service: &ServiceDefinition, inputs: &InputSet) -> String {
    format!("{}:{}:{}", service.service_id, service.version, inputs.digest())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CellValue, OutputValue};

    fn service() -> ServiceDefinition {
        ServiceDefinition::new("svc", "{}")
    }

    fn inputs(n: f64) -> InputSet {
        [("x".to_string(), CellValue::Number(n))].into_iter().collect()
    }

    fn outputs(n: f64) -> Vec<OutputResult> {
        vec![OutputResult {
            name: "y".into(),
            value: OutputValue::Scalar(CellValue::Number(n)),
            format_hint: None,
        }]
    }

    #[tokio::test]
    async fn set_then_get() {
        let cache = ResultCache::new(ResultCacheConfig::new());
        cache.set(&service(), &inputs(1.0), outputs(2.0));
        let hit = cache.get(&service(), &inputs(1.0)).await.unwrap();
        assert_eq!(hit.outputs, outputs(2.0));
        assert!(cache.get(&service(), &inputs(9.0)).await.is_none());
    }

    #[tokio::test]
    async fn version_is_part_of_the_key() {
        let cache = ResultCache::new(ResultCacheConfig::new());
        cache.set(&service(), &inputs(1.0), outputs(2.0));
        let republished = service().version(1);
        assert!(cache.get(&republished, &inputs(1.0)).await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_removed_on_read() {
        let cache = ResultCache::new(ResultCacheConfig::new().ttl(Duration::from_millis(20)));
        cache.set(&service(), &inputs(1.0), outputs(2.0));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get(&service(), &inputs(1.0)).await.is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn overwrite_does_not_evict() {
        let cache = ResultCache::new(ResultCacheConfig::new().max_entries(2));
        cache.set(&service(), &inputs(1.0), outputs(1.0));
        cache.set(&service(), &inputs(2.0), outputs(2.0));
        cache.set(&service(), &inputs(1.0), outputs(10.0));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&service(), &inputs(2.0)).await.is_some());
    }

    #[test]
    fn stale_order_entries_are_skipped() {
        let cache = ResultCache::new(ResultCacheConfig::new().max_entries(2));
        let svc = service();
        cache.set(&svc, &inputs(1.0), outputs(1.0));
        cache.set(&svc, &inputs(2.0), outputs(2.0));
        // Rewriting 1 moves it behind 2.
        cache.set(&svc, &inputs(1.0), outputs(1.5));
        cache.set(&svc, &inputs(3.0), outputs(3.0));
        let index = cache.index.lock();
        assert!(index.entries.contains_key(&result_key(&svc, &inputs(1.0))));
        assert!(!index.entries.contains_key(&result_key(&svc, &inputs(2.0))));
    }

    #[test]
    fn invalidate_service_only_touches_that_service() {
        let cache = ResultCache::new(ResultCacheConfig::new());
        let other = ServiceDefinition::new("other", "{}");
        cache.set(&service(), &inputs(1.0), outputs(1.0));
        cache.set(&other, &inputs(1.0), outputs(1.0));
        assert_eq!(cache.invalidate_service("svc"), 1);
        assert_eq!(cache.len(), 1);
    }
}
