//! Bounded parallel execution of independent work items.
//!
//! One invocation of the work function per input item, with at most
//! `max_concurrent` in flight at any instant. Results come back in input
//! order regardless of completion order, and per-item failures never abort
//! the rest of the run.
//!
//! Two strategies are exposed because the work function's nature decides
//! which one is efficient:
//! - [`parallel_map`] for already-async work (capped with a semaphore)
//! - [`parallel_map_blocking`] for blocking I/O (offloaded to the blocking
//!   thread pool, same semaphore cap)

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};

use fanout_core::error::{panic_message, EngineError, EngineResult};
use fanout_core::telemetry::{self, names, OperationTimer};

use crate::config::ParallelMapConfig;

/// Execute an async work function over `items` with bounded concurrency.
///
/// Returns one result per input, `results[i]` corresponding to `items[i]`.
/// A failing or panicking work function marks only its own slot as failed.
/// When `config.timeout` elapses, items whose results were not collected in
/// time are marked with a timeout failure and in-flight calls are abandoned
/// (left running detached, best effort).
pub async fn parallel_map<T, R, E, F, Fut>(
    config: &ParallelMapConfig,
    items: Vec<T>,
    f: F,
) -> Vec<EngineResult<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    E: std::fmt::Display,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }

    let timer = OperationTimer::start(names::PARALLEL_MAP_DURATION_SECONDS);
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
    let (tx, rx) = mpsc::unbounded_channel();
    let f = Arc::new(f);

    for (index, item) in items.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let tx = tx.clone();
        let f = Arc::clone(&f);

        tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                // The engine never closes the semaphore.
                Err(_) => return,
            };

            let outcome = match AssertUnwindSafe(f(item)).catch_unwind().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => {
                    warn!(index = index, error = %e, "Work item failed");
                    Err(EngineError::item_failed(e.to_string()))
                }
                Err(payload) => {
                    let msg = panic_message(payload.as_ref());
                    warn!(index = index, error = %msg, "Work item panicked");
                    Err(EngineError::item_failed(format!(
                        "work function panicked: {}",
                        msg
                    )))
                }
            };

            let _ = tx.send((index, outcome));
        });
    }
    drop(tx);

    let results = collect_results(total, rx, config.timeout).await;
    log_summary(total, &results, timer);
    results
}

/// Execute a blocking work function over `items` with bounded concurrency.
///
/// Each call runs inside `spawn_blocking` so a slow call cannot starve the
/// async scheduler. Semantics otherwise match [`parallel_map`].
pub async fn parallel_map_blocking<T, R, E, F>(
    config: &ParallelMapConfig,
    items: Vec<T>,
    f: F,
) -> Vec<EngineResult<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    E: std::fmt::Display + Send + 'static,
    F: Fn(T) -> Result<R, E> + Send + Sync + 'static,
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }

    let timer = OperationTimer::start(names::PARALLEL_MAP_DURATION_SECONDS);
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
    let (tx, rx) = mpsc::unbounded_channel();
    let f = Arc::new(f);

    for (index, item) in items.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let tx = tx.clone();
        let f = Arc::clone(&f);

        tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                // The engine never closes the semaphore.
                Err(_) => return,
            };

            let outcome = match tokio::task::spawn_blocking(move || f(item)).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => {
                    warn!(index = index, error = %e, "Work item failed");
                    Err(EngineError::item_failed(e.to_string()))
                }
                Err(join_err) => {
                    warn!(index = index, error = %join_err, "Work item panicked");
                    Err(EngineError::item_failed(format!(
                        "work function panicked: {}",
                        join_err
                    )))
                }
            };

            let _ = tx.send((index, outcome));
        });
    }
    drop(tx);

    let results = collect_results(total, rx, config.timeout).await;
    log_summary(total, &results, timer);
    results
}

/// Gather `(index, outcome)` pairs into an input-ordered result vector.
///
/// Placement is by index, so completion order is irrelevant. When the
/// deadline elapses first, every uncollected index is marked with a timeout
/// failure; the senders still running write into a closed channel and their
/// late results are discarded.
async fn collect_results<R>(
    total: usize,
    mut rx: mpsc::UnboundedReceiver<(usize, EngineResult<R>)>,
    timeout: Option<Duration>,
) -> Vec<EngineResult<R>> {
    let mut slots: Vec<Option<EngineResult<R>>> = Vec::with_capacity(total);
    slots.resize_with(total, || None);

    let gather = async {
        let mut received = 0usize;
        while received < total {
            match rx.recv().await {
                Some((index, outcome)) => {
                    slots[index] = Some(outcome);
                    received += 1;
                }
                None => break,
            }
        }
    };

    let mut deadline = Duration::ZERO;
    match timeout {
        None => gather.await,
        Some(limit) => {
            deadline = limit;
            if tokio::time::timeout(limit, gather).await.is_err() {
                warn!(
                    timeout_ms = limit.as_millis() as u64,
                    "Parallel map deadline elapsed; abandoning in-flight work"
                );
            }
        }
    }

    slots
        .into_iter()
        .map(|slot| slot.unwrap_or(Err(EngineError::Timeout { elapsed: deadline })))
        .collect()
}

fn log_summary<R>(total: usize, results: &[EngineResult<R>], timer: OperationTimer) {
    let failures = results.iter().filter(|r| r.is_err()).count();
    let secs = timer.finish();
    let throughput = total as f64 / secs.max(f64::EPSILON);

    info!(
        items = total,
        failures = failures,
        duration_ms = (secs * 1000.0) as u64,
        items_per_sec = throughput,
        "Parallel map completed"
    );
    telemetry::record_parallel_map(total, failures);
}
