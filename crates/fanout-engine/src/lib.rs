//! Concurrent batching and fan-out execution engines.
//!
//! Two independent components sharing one concurrency contract:
//! - [`parallel`]: execute a work function over a finite set of items with a
//!   concurrency cap, results delivered in input order
//! - [`coalescer`]: group individually-submitted items into batches by a
//!   size-or-time trigger and resolve each submitter's result individually
//!
//! Both treat the work/batch function as an opaque, potentially slow,
//! potentially failing black box. Neither persists anything: a process
//! restart loses in-flight work, and callers retry at a higher layer.

pub mod coalescer;
pub mod config;
pub mod parallel;

pub use coalescer::BatchCoalescer;
pub use config::{CoalescerConfig, ParallelMapConfig};
pub use parallel::{parallel_map, parallel_map_blocking};

pub use fanout_core::{EngineError, EngineResult, ResultSlot};
