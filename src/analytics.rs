//! Batched analytics counters.
//!
//! Every request bumps a few per-service counters (calls, cache hits,
//! errors). Writing each increment to the shared store would double the
//! store traffic of a cached request, so increments are queued on a bounded
//! channel and a background worker writes them in batches:
//!
//! - a batch is flushed once `batch_size` increments are buffered, or
//!   `flush_interval` after the first increment of the batch arrived
//! - increments to the same `(service, field)` are summed before writing
//! - a full queue drops the increment; [`AnalyticsBatcher::track`] never
//!   blocks
//! - flush failures are logged and the batch is discarded
//!
//! Dropping every [`AnalyticsBatcher`] handle closes the queue; the worker
//! flushes what is left and exits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::Result;
use crate::store::SharedStore;
use crate::telemetry;

/// Counter bumped once per request.
pub const FIELD_CALLS: &str = "calls";
/// Counter bumped when the result cache answered.
pub const FIELD_CACHE_HITS: &str = "cache_hits";
/// Counter bumped when the engine had to run.
pub const FIELD_CACHE_MISSES: &str = "cache_misses";
/// Counter bumped when a request failed.
pub const FIELD_ERRORS: &str = "errors";

/// Configuration for the analytics batcher.
///
/// ```rust
/// # use cellgate::AnalyticsConfig;
/// # use std::time::Duration;
/// let config = AnalyticsConfig::new()
///     .batch_size(50)
///     .flush_interval(Duration::from_secs(2));
/// assert_eq!(config.batch_size, 50);
/// ```
#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    /// Buffered increments that trigger a flush. Default: 100.
    pub batch_size: usize,
    /// Maximum age of a buffered increment. Default: 5 seconds.
    pub flush_interval: Duration,
    /// Queue capacity between callers and the worker. Default: 1,024.
    pub queue_capacity: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
            queue_capacity: 1_024,
        }
    }
}

impl AnalyticsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.queue_capacity = n;
        self
    }
}

/// A counter delta for one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticsIncrement {
    pub service_id: String,
    pub field: String,
    pub delta: i64,
}

/// Destination of flushed increments.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    /// Persist one coalesced batch.
    async fn write(&self, batch: &[AnalyticsIncrement]) -> Result<()>;
}

/// Writes increments as `analytics:{service}:{field}` counters in the shared
/// store.
pub struct StoreAnalyticsSink {
    store: Arc<dyn SharedStore>,
}

impl StoreAnalyticsSink {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AnalyticsSink for StoreAnalyticsSink {
    async fn write(&self, batch: &[AnalyticsIncrement]) -> Result<()> {
        for inc in batch {
            self.store
                .incr_by(&counter_key(&inc.service_id, &inc.field), inc.delta)
                .await?;
        }
        Ok(())
    }
}

/// Shared-store key of an analytics counter.
pub fn counter_key(service_id: &str, field: &str) -> String {
    format!("analytics:{service_id}:{field}")
}

enum Command {
    Track(AnalyticsIncrement),
    Flush(oneshot::Sender<()>),
}

/// Non-blocking handle to the analytics worker.
#[derive(Clone)]
pub struct AnalyticsBatcher {
    tx: mpsc::Sender<Command>,
}

impl AnalyticsBatcher {
    /// Spawn the worker.
    ///
    /// # Panics
    ///
    /// Requires a tokio runtime context.
    pub fn spawn(config: AnalyticsConfig, sink: Arc<dyn AnalyticsSink>) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        tokio::spawn(run_worker(rx, sink, config));
        Self { tx }
    }

    /// Queue an increment. Drops it when the queue is full.
    pub fn track(&self, service_id: &str, field: &str, delta: i64) {
        let inc = AnalyticsIncrement {
            service_id: service_id.to_string(),
            field: field.to_string(),
            delta,
        };
        if self.tx.try_send(Command::Track(inc)).is_err() {
            metrics::counter!(telemetry::ANALYTICS_DROPPED_TOTAL).increment(1);
        }
    }

    /// Flush everything queued so far and wait for the write to finish.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<Command>,
    sink: Arc<dyn AnalyticsSink>,
    config: AnalyticsConfig,
) {
    let mut buffer = Buffer::default();

    loop {
        let command = match buffer.deadline {
            Some(deadline) => tokio::select! {
                command = rx.recv() => command,
                _ = tokio::time::sleep_until(deadline) => {
                    buffer.flush(sink.as_ref()).await;
                    continue;
                }
            },
            None => rx.recv().await,
        };

        match command {
            Some(Command::Track(inc)) => {
                buffer.add(inc, config.flush_interval);
                if buffer.pending >= config.batch_size {
                    buffer.flush(sink.as_ref()).await;
                }
            }
            Some(Command::Flush(done)) => {
                buffer.flush(sink.as_ref()).await;
                let _ = done.send(());
            }
            None => {
                buffer.flush(sink.as_ref()).await;
                debug!("analytics worker stopped");
                return;
            }
        }
    }
}

#[derive(Default)]
struct Buffer {
    totals: HashMap<(String, String), i64>,
    /// Increments received since the last flush, before coalescing.
    pending: usize,
    deadline: Option<Instant>,
}

impl Buffer {
    fn add(&mut self, inc: AnalyticsIncrement, interval: Duration) {
        *self.totals.entry((inc.service_id, inc.field)).or_insert(0) += inc.delta;
        self.pending += 1;
        self.deadline.get_or_insert_with(|| Instant::now() + interval);
    }

    async fn flush(&mut self, sink: &dyn AnalyticsSink) {
        self.pending = 0;
        self.deadline = None;
        if self.totals.is_empty() {
            return;
        }

        let mut batch: Vec<AnalyticsIncrement> = self
            .totals
            .drain()
            .map(|((service_id, field), delta)| AnalyticsIncrement {
                service_id,
                field,
                delta,
            })
            .collect();
        batch.sort_by(|a, b| (&a.service_id, &a.field).cmp(&(&b.service_id, &b.field)));

        match sink.write(&batch).await {
            Ok(()) => {
                debug!(increments = batch.len(), "flushed analytics");
                metrics::counter!(telemetry::ANALYTICS_FLUSHES_TOTAL, "status" => "ok").increment(1);
            }
            Err(e) => {
                warn!(increments = batch.len(), error = %e, "analytics flush failed, discarding batch");
                metrics::counter!(telemetry::ANALYTICS_FLUSHES_TOTAL, "status" => "error")
                    .increment(1);
            }
        }
    }
}
