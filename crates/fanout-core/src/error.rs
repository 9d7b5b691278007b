//! Engine error types.

use std::time::Duration;

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Failures surfaced to callers of the fanout engines.
///
/// `Clone` is required because a single batch failure is delivered to every
/// submitter of the dispatched batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The work function failed for one item; siblings are unaffected.
    #[error("Work item failed: {0}")]
    ItemFailed(String),

    /// The overall map deadline elapsed before this item's result was
    /// collected. Distinguished from `ItemFailed` so callers can retry.
    #[error("Timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// The batch function failed for the whole batch.
    #[error("Batch call failed: {0}")]
    BatchFailed(String),

    /// The batch function returned fewer results than it was given items.
    /// Only submitters past the returned length receive this.
    #[error("Batch returned {returned} results for {expected} items")]
    LengthMismatch { expected: usize, returned: usize },

    /// The engine dropped this item's slot without resolving it.
    #[error("Result abandoned before resolution")]
    Abandoned,
}

impl EngineError {
    pub fn item_failed(msg: impl Into<String>) -> Self {
        Self::ItemFailed(msg.into())
    }

    pub fn batch_failed(msg: impl Into<String>) -> Self {
        Self::BatchFailed(msg.into())
    }

    /// Check if the error is a deadline expiry rather than a work failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::Timeout { .. })
    }

    /// Check if the error affected the whole dispatched batch.
    pub fn is_batch_failure(&self) -> bool {
        matches!(self, EngineError::BatchFailed(_))
    }
}

/// Extract a readable message from a caught panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
