//! Bounded-concurrency worker pool for one document.
//!
//! All units are fed to `buffer_unordered(limit)` on a dedicated task, so at
//! most `limit` adapter calls are ever in flight and new units are only pulled
//! when a slot frees up. Completions, in whatever order they finish, are
//! forwarded into a channel sized to the page count, so forwarding never
//! blocks the pool.
//!
//! Dropping the [`PoolHandle`] (or its receiver) is the cancellation signal:
//! the pool stops scheduling further pages and drops the calls in flight.
//!
//! An adapter call that panics is caught per unit and becomes that page's
//! [`PageOutcome::Failed`]; it never takes the pool task down.

use crate::adapter::{InferenceAdapter, InferenceRequest};
use crate::error::{Doc2MdError, PageError};
use crate::page::{PageOutcome, PageResult, PageStats, PageUnit};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Runs an [`InferenceAdapter`] over a document's pages.
#[derive(Clone)]
pub struct WorkerPool {
    adapter: Arc<dyn InferenceAdapter>,
    limit: usize,
}

impl WorkerPool {
    /// A `concurrency_limit` of 0 is coerced to 1 (serial execution).
    pub fn new(adapter: Arc<dyn InferenceAdapter>, concurrency_limit: usize) -> Self {
        Self {
            adapter,
            limit: concurrency_limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Start processing `units` and return a handle yielding completions.
    ///
    /// Every unit is run exactly once. The completion channel closes only
    /// after every unit has produced a result (or the handle was dropped).
    pub fn spawn(&self, units: Vec<PageUnit>, model: impl Into<String>) -> PoolHandle {
        let total = units.len();
        let (tx, rx) = mpsc::channel(total.max(1));
        let adapter = Arc::clone(&self.adapter);
        let model: Arc<str> = Arc::from(model.into());
        let limit = self.limit;

        let task = tokio::spawn(async move {
            let mut completions = stream::iter(units.into_iter().map(|unit| {
                let adapter = Arc::clone(&adapter);
                let model = Arc::clone(&model);
                async move {
                    let fallback = unit.clone();
                    AssertUnwindSafe(run_unit(adapter.as_ref(), unit, &model))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|payload| panicked_unit(fallback, payload))
                }
            }))
            .buffer_unordered(limit);

            let mut delivered = 0usize;
            loop {
                tokio::select! {
                    biased;
                    _ = tx.closed() => {
                        debug!("Completion receiver dropped after {}/{} pages; stopping", delivered, total);
                        break;
                    }
                    next = completions.next() => {
                        let Some(result) = next else { break };
                        if tx.send(result).await.is_err() {
                            break;
                        }
                        delivered += 1;
                    }
                }
            }
            delivered
        });

        PoolHandle {
            completions: rx,
            task,
            total,
        }
    }
}

/// Receiving end of a running pool.
pub struct PoolHandle {
    completions: mpsc::Receiver<PageResult>,
    task: JoinHandle<usize>,
    total: usize,
}

impl PoolHandle {
    /// Next terminal result, in completion order. `None` once the pool is done.
    pub async fn next(&mut self) -> Option<PageResult> {
        self.completions.recv().await
    }

    /// Wait for the pool task and confirm every unit was delivered.
    pub async fn join(self) -> Result<usize, Doc2MdError> {
        drop(self.completions);
        let delivered = self
            .task
            .await
            .map_err(|e| Doc2MdError::Internal(format!("Worker pool task failed: {}", e)))?;
        if delivered != self.total {
            return Err(Doc2MdError::Internal(format!(
                "Worker pool stopped after {} of {} pages",
                delivered, self.total
            )));
        }
        Ok(delivered)
    }
}

/// Run one unit to its terminal result. Never fails: adapter errors become
/// [`PageOutcome::Failed`].
async fn run_unit(adapter: &dyn InferenceAdapter, unit: PageUnit, model: &str) -> PageResult {
    let start = Instant::now();
    let page_num = unit.page_num();
    let result = adapter
        .infer(InferenceRequest {
            page_num,
            image: unit.image(),
            model,
        })
        .await;
    let duration_ms = start.elapsed().as_millis() as u64;

    let (outcome, stats) = match result {
        Ok(inference) => {
            debug!(
                "Page {}: {} input tokens, {} output tokens, {}ms",
                page_num, inference.input_tokens, inference.output_tokens, duration_ms
            );
            let stats = PageStats {
                input_tokens: inference.input_tokens,
                output_tokens: inference.output_tokens,
                duration_ms,
                retries: inference.retries,
            };
            (PageOutcome::Succeeded(inference.text), stats)
        }
        Err(err) => {
            warn!("Page {} failed: {}", page_num, err);
            let stats = PageStats {
                duration_ms,
                ..Default::default()
            };
            (PageOutcome::Failed(err), stats)
        }
    };

    unit.finish(outcome, stats)
}

/// A unit whose adapter call panicked fails on its own; siblings keep going.
fn panicked_unit(unit: PageUnit, payload: Box<dyn Any + Send>) -> PageResult {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "adapter panicked".to_string());
    let page_num = unit.page_num();
    error!("Page {} panicked: {}", page_num, detail);
    unit.finish(
        PageOutcome::Failed(PageError::InferenceFailed {
            page: page_num,
            retries: 0,
            detail: format!("panicked: {}", detail),
        }),
        PageStats::default(),
    )
}
