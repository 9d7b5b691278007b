//! Single-assignment result slots.
//!
//! A `ResultSlot` is the handle a submitter waits on while the engine works
//! on its item somewhere else. Exactly one of {value, error} is ever
//! delivered, and delivery happens exactly once; the paired `SlotSender`
//! enforces this.

use tokio::sync::oneshot;
use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::telemetry;

/// Caller-facing handle for a result that will be delivered asynchronously.
pub struct ResultSlot<R> {
    rx: oneshot::Receiver<EngineResult<R>>,
}

impl<R> ResultSlot<R> {
    /// Create a slot and the sender that will resolve it.
    pub fn new() -> (SlotSender<R>, ResultSlot<R>) {
        let (tx, rx) = oneshot::channel();
        (SlotSender { tx: Some(tx) }, ResultSlot { rx })
    }

    /// Suspend until the slot is resolved.
    ///
    /// If the engine dropped the sender without resolving (teardown
    /// mid-flight), this returns `EngineError::Abandoned` rather than
    /// hanging or losing the item silently.
    pub async fn wait(self) -> EngineResult<R> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(EngineError::Abandoned),
        }
    }
}

/// Engine-side resolver for a `ResultSlot`.
pub struct SlotSender<R> {
    tx: Option<oneshot::Sender<EngineResult<R>>>,
}

impl<R> SlotSender<R> {
    /// Resolve the slot with a value or failure.
    ///
    /// A second resolution attempt is a programming error: it panics under
    /// `debug_assertions` and is a warn-logged no-op in release builds. A
    /// waiter that already gave up (dropped receiver) is ignored; the late
    /// resolution is discarded.
    pub fn resolve(&mut self, outcome: EngineResult<R>) {
        match self.tx.take() {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => {
                telemetry::record_double_resolve();
                if cfg!(debug_assertions) {
                    panic!("result slot resolved twice");
                }
                warn!("Result slot resolved twice; second resolution dropped");
            }
        }
    }

    /// Whether this sender has already resolved its slot.
    pub fn is_resolved(&self) -> bool {
        self.tx.is_none()
    }
}
