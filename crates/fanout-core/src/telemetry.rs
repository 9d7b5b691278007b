//! Metrics and timing glue for the engines.
//!
//! Everything here goes through the `metrics` facade: with no recorder
//! installed every call is a no-op, so a metrics sink outage can never
//! surface as an engine error.

use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
}

/// Metric names as constants for consistency.
pub mod names {
    // Parallel map metrics
    pub const PARALLEL_MAP_ITEMS_TOTAL: &str = "fanout_parallel_map_items_total";
    pub const PARALLEL_MAP_FAILURES_TOTAL: &str = "fanout_parallel_map_failures_total";
    pub const PARALLEL_MAP_DURATION_SECONDS: &str = "fanout_parallel_map_duration_seconds";

    // Batch coalescer metrics
    pub const BATCHES_DISPATCHED_TOTAL: &str = "fanout_batches_dispatched_total";
    pub const BATCH_FAILURES_TOTAL: &str = "fanout_batch_failures_total";
    pub const BATCH_SIZE: &str = "fanout_batch_size";
    pub const BATCH_DISPATCH_DURATION_SECONDS: &str = "fanout_batch_dispatch_duration_seconds";

    // Slot invariant violations
    pub const SLOT_DOUBLE_RESOLVE_TOTAL: &str = "fanout_slot_double_resolve_total";
}

/// Record a completed parallel map run.
///
/// Durations go through an `OperationTimer` started with
/// `names::PARALLEL_MAP_DURATION_SECONDS`; this records the counters only.
pub fn record_parallel_map(items: usize, failures: usize) {
    counter!(names::PARALLEL_MAP_ITEMS_TOTAL).increment(items as u64);
    counter!(names::PARALLEL_MAP_FAILURES_TOTAL).increment(failures as u64);
}

/// Record a dispatched batch. Dispatch duration goes through an
/// `OperationTimer` started with `names::BATCH_DISPATCH_DURATION_SECONDS`.
pub fn record_batch_dispatch(size: usize, failed: bool) {
    counter!(names::BATCHES_DISPATCHED_TOTAL).increment(1);
    if failed {
        counter!(names::BATCH_FAILURES_TOTAL).increment(1);
    }
    histogram!(names::BATCH_SIZE).record(size as f64);
}

/// Record a rejected second resolution of a result slot.
pub fn record_double_resolve() {
    counter!(names::SLOT_DOUBLE_RESOLVE_TOTAL).increment(1);
}

/// Wall-clock timer for one named operation.
///
/// `start` captures the instant, `finish` records the duration histogram and
/// returns the elapsed seconds for log lines.
#[derive(Debug)]
pub struct OperationTimer {
    name: &'static str,
    start: Instant,
}

impl OperationTimer {
    /// Start timing a named operation.
    pub fn start(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }

    /// Elapsed time so far.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer, record the duration histogram and return seconds.
    pub fn finish(self) -> f64 {
        let secs = self.start.elapsed().as_secs_f64();
        histogram!(self.name).record(secs);
        secs
    }
}
