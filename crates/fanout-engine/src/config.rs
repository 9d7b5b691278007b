//! Engine configuration.

use std::time::Duration;

/// Multiplier applied to available cores for the default concurrency cap.
/// Work functions are I/O-bound against a remote service, so the useful cap
/// sits well above the core count.
const DEFAULT_CONCURRENCY_MULTIPLIER: usize = 4;

fn default_max_concurrent() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    cores * DEFAULT_CONCURRENCY_MULTIPLIER
}

/// Configuration for a bounded parallel map run.
#[derive(Debug, Clone)]
pub struct ParallelMapConfig {
    /// Maximum in-flight invocations of the work function
    pub max_concurrent: usize,
    /// Optional overall deadline for the whole map operation
    pub timeout: Option<Duration>,
}

impl Default for ParallelMapConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            timeout: None,
        }
    }
}

impl ParallelMapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the concurrency cap (floored at 1).
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Set an overall deadline for the map operation.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_concurrent: std::env::var("FANOUT_MAX_CONCURRENT")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or_else(default_max_concurrent),
            timeout: std::env::var("FANOUT_MAP_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs: &u64| *secs > 0)
                .map(Duration::from_secs),
        }
    }
}

/// Configuration for a batch coalescer instance.
#[derive(Debug, Clone)]
pub struct CoalescerConfig {
    /// Buffer size that triggers an immediate dispatch
    pub batch_size: usize,
    /// Maximum age of the oldest buffered item before dispatch
    pub max_wait: Duration,
    /// How often the drain loop re-checks the dispatch triggers
    pub poll_interval: Duration,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_wait: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl CoalescerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the size trigger (floored at 1).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the age trigger for the oldest buffered item.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Set the drain loop polling interval. Dispatch can lag the nominal
    /// `max_wait` by up to one interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            batch_size: std::env::var("FANOUT_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(10),
            max_wait: Duration::from_millis(
                std::env::var("FANOUT_MAX_WAIT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
            ),
            poll_interval: Duration::from_millis(
                std::env::var("FANOUT_POLL_INTERVAL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(100),
            ),
        }
    }
}
