//! Bounded queue for fire-and-forget side effects.
//!
//! Snapshot writes, distributed result writes and similar best-effort work
//! must never delay or fail a response. [`BackgroundTasks`] runs them on a
//! single worker fed by a bounded `mpsc` channel. When the queue is full a
//! task is dropped and counted rather than blocking the caller.
//!
//! Every task runs inside an error boundary: a returned error or a panic is
//! logged and counted, and the worker moves on to the next task.

use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::telemetry;
use crate::{CellgateError, Result};

/// Default number of queued tasks.
pub const DEFAULT_TASK_QUEUE: usize = 256;

struct Task {
    label: &'static str,
    fut: BoxFuture<'static, Result<()>>,
}

/// Handle to the background worker. Cloning shares the same queue.
#[derive(Clone)]
pub struct BackgroundTasks {
    tx: mpsc::Sender<Task>,
}

impl BackgroundTasks {
    /// Spawn the worker with a queue of `capacity` tasks.
    ///
    /// # Panics
    ///
    /// Requires a tokio runtime context.
    pub fn spawn(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(run_worker(rx));
        Self { tx }
    }

    /// Queue `fut` for execution. Returns `false` when the task was dropped.
    pub fn submit<F>(&self, label: &'static str, fut: F) -> bool
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        match self.tx.try_send(Task {
            label,
            fut: Box::pin(fut),
        }) {
            Ok(()) => true,
            Err(_) => {
                warn!(task = label, "background queue full, dropping task");
                metrics::counter!(telemetry::BACKGROUND_DROPPED_TOTAL, "task" => label)
                    .increment(1);
                false
            }
        }
    }

    /// Queue `fut` behind every task already queued and wait for its result.
    ///
    /// Unlike [`submit`](Self::submit) this waits for queue space instead of
    /// dropping the task. Use it for work that must observe the effects of
    /// earlier tasks, such as deleting a key that a queued write targets.
    pub async fn run<F>(&self, label: &'static str, fut: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let queued = self
            .tx
            .send(Task {
                label,
                fut: Box::pin(async move {
                    let _ = done_tx.send(fut.await);
                    Ok(())
                }),
            })
            .await;
        if queued.is_err() {
            return Err(CellgateError::Store(format!(
                "background worker stopped before {label}"
            )));
        }
        done_rx.await.unwrap_or_else(|_| {
            Err(CellgateError::Store(format!("{label} did not complete")))
        })
    }

    /// Wait until every task queued before this call has run.
    pub async fn drain(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        let queued = self
            .tx
            .send(Task {
                label: "drain",
                fut: Box::pin(async move {
                    let _ = done_tx.send(());
                    Ok(())
                }),
            })
            .await;
        if queued.is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn run_worker(mut rx: mpsc::Receiver<Task>) {
    while let Some(task) = rx.recv().await {
        match AssertUnwindSafe(task.fut).catch_unwind().await {
            Ok(Ok(())) => debug!(task = task.label, "background task finished"),
            Ok(Err(e)) => {
                warn!(task = task.label, error = %e, "background task failed");
                metrics::counter!(telemetry::BACKGROUND_FAILED_TOTAL, "task" => task.label)
                    .increment(1);
            }
            Err(_) => {
                warn!(task = task.label, "background task panicked");
                metrics::counter!(telemetry::BACKGROUND_FAILED_TOTAL, "task" => task.label)
                    .increment(1);
            }
        }
    }
    debug!("background worker stopped");
}
