//! Size-or-time batch coalescing.
//!
//! Many independent callers each submit one item and wait on their own
//! result slot; a single drain loop groups the buffered items into batches
//! and hands each batch to the user-supplied batch function. Submitters
//! never see the batching: they get back exactly the result computed for
//! their item, or a typed failure.
//!
//! # Dispatch policy
//!
//! The drain loop starts lazily on the first submission after the buffer was
//! empty and exits once the buffer drains. A batch is dispatched when the
//! buffer reaches `batch_size` items or the oldest buffered item's age
//! reaches `max_wait`, whichever comes first; triggers are re-checked every
//! `poll_interval` rather than with one timer per submission.
//!
//! The buffer mutex is held only for enqueue and snapshot-and-clear. It is
//! never held across the batch function or a submitter's wait, so one
//! caller's `submit` never blocks on another caller's batch execution, and
//! items submitted while a batch is in flight start accumulating the next
//! one immediately.

use std::future::Future;
use std::mem;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use fanout_core::error::{panic_message, EngineError, EngineResult};
use fanout_core::slot::{ResultSlot, SlotSender};
use fanout_core::telemetry::{self, names, OperationTimer};

use crate::config::CoalescerConfig;

type BatchFuture<R> = Pin<Box<dyn Future<Output = EngineResult<Vec<R>>> + Send>>;
type BatchFn<T, R> = dyn Fn(Vec<T>) -> BatchFuture<R> + Send + Sync;

/// One buffered item paired with the slot its submitter is waiting on.
struct PendingItem<T, R> {
    item: T,
    slot: SlotSender<R>,
    enqueued_at: Instant,
}

/// The shared accumulation buffer. Items and slots move together: they are
/// pushed together and snapshotted out together.
struct PendingBuffer<T, R> {
    items: Vec<PendingItem<T, R>>,
    drain_running: bool,
}

struct Shared<T, R> {
    config: CoalescerConfig,
    buffer: Mutex<PendingBuffer<T, R>>,
    batch_fn: Box<BatchFn<T, R>>,
}

/// Coalesces individually-submitted items into batched calls.
///
/// Long-lived and cheap to clone (a handle over shared state). Construct one
/// per batch strategy and pass it to whoever submits; there is no implicit
/// global instance.
pub struct BatchCoalescer<T, R> {
    shared: Arc<Shared<T, R>>,
}

impl<T, R> Clone for BatchCoalescer<T, R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, R> BatchCoalescer<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Create a coalescer bound to a batch function.
    ///
    /// `batch_fn` receives the snapshotted items and must return one result
    /// per item, in the same order. A shorter return resolves the excess
    /// submitters with a length-mismatch failure; an error resolves every
    /// submitter of that batch with the same failure.
    pub fn new<F, Fut, E>(config: CoalescerConfig, batch_fn: F) -> Self
    where
        F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<R>, E>> + Send + 'static,
        E: std::fmt::Display,
    {
        let batch_fn = Arc::new(batch_fn);
        let batch_fn = Box::new(move |items: Vec<T>| -> BatchFuture<R> {
            let batch_fn = Arc::clone(&batch_fn);
            Box::pin(async move {
                batch_fn(items)
                    .await
                    .map_err(|e| EngineError::batch_failed(e.to_string()))
            })
        });

        Self {
            shared: Arc::new(Shared {
                config,
                buffer: Mutex::new(PendingBuffer {
                    items: Vec::new(),
                    drain_running: false,
                }),
                batch_fn,
            }),
        }
    }

    /// Enqueue one item and get back the slot its result will arrive on.
    ///
    /// Safe to call from many tasks concurrently; the enqueue and the slot
    /// pairing happen under one lock so no item is ever lost or split from
    /// its slot. Starts the drain loop if none is running.
    pub async fn submit(&self, item: T) -> ResultSlot<R> {
        let (slot_tx, slot) = ResultSlot::new();

        let start_loop = {
            let mut buffer = self.shared.buffer.lock().await;
            buffer.items.push(PendingItem {
                item,
                slot: slot_tx,
                enqueued_at: Instant::now(),
            });
            if buffer.drain_running {
                false
            } else {
                buffer.drain_running = true;
                true
            }
        };

        if start_loop {
            debug!("Starting drain loop");
            tokio::spawn(drain_loop(Arc::clone(&self.shared)));
        }

        slot
    }

    /// Number of items currently buffered and awaiting dispatch.
    pub async fn pending_len(&self) -> usize {
        self.shared.buffer.lock().await.items.len()
    }
}

/// The single active control loop deciding when a pending batch is ready.
///
/// Exactly one runs per coalescer at a time, guarded by `drain_running`.
/// Exits when the buffer is empty at check time; restarted lazily by the
/// next `submit`. The empty-check and the flag clear happen under the same
/// lock, so a concurrent submit either lands before the check (the loop
/// continues) or after the flag clears (the submit spawns a fresh loop).
async fn drain_loop<T, R>(shared: Arc<Shared<T, R>>)
where
    T: Send + 'static,
    R: Send + 'static,
{
    loop {
        let snapshot = {
            let mut buffer = shared.buffer.lock().await;
            if buffer.items.is_empty() {
                buffer.drain_running = false;
                debug!("Drain loop idle, exiting");
                return;
            }

            let size_ready = buffer.items.len() >= shared.config.batch_size;
            let age_ready = buffer.items[0].enqueued_at.elapsed() >= shared.config.max_wait;
            if size_ready || age_ready {
                Some(mem::take(&mut buffer.items))
            } else {
                None
            }
        };

        match snapshot {
            Some(pending) => dispatch(&shared, pending).await,
            None => tokio::time::sleep(shared.config.poll_interval).await,
        }
    }
}

/// Run the batch function for one snapshot and resolve every slot in it.
///
/// Invariant: every snapshotted slot is resolved exactly once before this
/// returns, whatever the batch function does (error, short return, panic).
async fn dispatch<T, R>(shared: &Shared<T, R>, pending: Vec<PendingItem<T, R>>) {
    let size = pending.len();
    let mut items = Vec::with_capacity(size);
    let mut slots = Vec::with_capacity(size);
    for entry in pending {
        items.push(entry.item);
        slots.push(entry.slot);
    }

    let timer = OperationTimer::start(names::BATCH_DISPATCH_DURATION_SECONDS);
    let outcome = AssertUnwindSafe((shared.batch_fn)(items)).catch_unwind().await;
    let secs = timer.finish();

    let failed = !matches!(outcome, Ok(Ok(_)));
    match outcome {
        Ok(Ok(values)) => {
            let returned = values.len();
            if returned > size {
                warn!(
                    batch_size = size,
                    returned = returned,
                    "Batch returned more results than items; surplus dropped"
                );
            } else if returned < size {
                warn!(
                    batch_size = size,
                    returned = returned,
                    "Batch returned fewer results than items"
                );
            }

            let mut values = values.into_iter();
            for slot in slots.iter_mut() {
                match values.next() {
                    Some(value) => slot.resolve(Ok(value)),
                    None => slot.resolve(Err(EngineError::LengthMismatch {
                        expected: size,
                        returned,
                    })),
                }
            }
        }
        Ok(Err(e)) => {
            warn!(batch_size = size, error = %e, "Batch call failed");
            for slot in slots.iter_mut() {
                slot.resolve(Err(e.clone()));
            }
        }
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            warn!(batch_size = size, error = %msg, "Batch call panicked");
            let err = EngineError::batch_failed(format!("batch function panicked: {}", msg));
            for slot in slots.iter_mut() {
                slot.resolve(Err(err.clone()));
            }
        }
    }

    telemetry::record_batch_dispatch(size, failed);
    info!(
        batch_size = size,
        duration_ms = (secs * 1000.0) as u64,
        "Dispatched batch"
    );
}
