//! Shared building blocks for the fanout execution engines.
//!
//! This crate provides:
//! - Error taxonomy for per-item, per-batch and timeout failures
//! - Single-assignment result slots for asynchronous delivery
//! - Metrics and timing glue
//! - Tracing initialization for embedding binaries

pub mod error;
pub mod logging;
pub mod slot;
pub mod telemetry;

pub use error::{EngineError, EngineResult};
pub use slot::{ResultSlot, SlotSender};
pub use telemetry::OperationTimer;
