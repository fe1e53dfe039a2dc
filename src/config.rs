//! Pool configuration (spec §6.1).
//!
//! Plain data, constructible directly by calling code. Parsing these out of
//! a file, environment, or CLI is an external collaborator's job; this
//! module only defines the fields and their defaults.

use crate::queue::QueueStrategy;
use std::time::Duration;

/// Default cap on how many jobs a single `batch_processing` dequeue may
/// return before the worker re-polls.
pub const DEFAULT_BATCH_CAP: usize = 32;

/// Configuration for [`crate::pool::ThreadPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads. Defaults to the hardware parallelism hint.
    pub worker_count: usize,
    /// Governs periodic `on_tick` calls and shutdown responsiveness.
    pub wake_interval: Duration,
    /// Which queue strategy to run.
    pub queue_strategy: QueueStrategy,
    /// When true, a dequeue call may return a small batch of jobs.
    pub batch_processing: bool,
    /// Cap on batch size when `batch_processing` is enabled.
    pub batch_cap: usize,
    /// Telemetry label.
    pub pool_name: String,
    /// Telemetry label, typically unique per constructed instance.
    pub pool_instance_id: String,
}

impl PoolConfig {
    /// Starts from the documented defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_wake_interval(mut self, wake_interval: Duration) -> Self {
        self.wake_interval = wake_interval;
        self
    }

    pub fn with_queue_strategy(mut self, strategy: QueueStrategy) -> Self {
        self.queue_strategy = strategy;
        self
    }

    pub fn with_batch_processing(mut self, enabled: bool) -> Self {
        self.batch_processing = enabled;
        self
    }

    pub fn with_batch_cap(mut self, cap: usize) -> Self {
        self.batch_cap = cap;
        self
    }

    pub fn with_pool_name(mut self, name: impl Into<String>) -> Self {
        self.pool_name = name.into();
        self
    }

    pub fn with_pool_instance_id(mut self, id: impl Into<String>) -> Self {
        self.pool_instance_id = id.into();
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            worker_count: num_cpus::get(),
            wake_interval: Duration::from_millis(100),
            queue_strategy: QueueStrategy::Adaptive,
            batch_processing: false,
            batch_cap: DEFAULT_BATCH_CAP,
            pool_name: "pool".to_string(),
            pool_instance_id: "default".to_string(),
        }
    }
}

/// Configuration for [`crate::typed_pool::TypedThreadPool`].
///
/// `capabilities_per_worker` fixes both the worker count (its length) and
/// what each worker is willing to serve; it has no default since it is
/// inherently application-specific, so callers must always supply it.
#[derive(Debug, Clone)]
pub struct TypedPoolConfig<T> {
    pub wake_interval: Duration,
    pub pool_name: String,
    pub pool_instance_id: String,
    /// One capability set per worker; `capabilities_per_worker.len()` is
    /// the worker count.
    pub capabilities_per_worker: Vec<Vec<T>>,
    /// Consecutive same-priority dispatches before the starvation guard
    /// forces service of a lower-priority, non-empty queue.
    pub starvation_threshold: usize,
}

/// Default starvation-guard threshold (spec §4.6.2).
pub const DEFAULT_STARVATION_THRESHOLD: usize = 32;

impl<T> TypedPoolConfig<T> {
    pub fn new(capabilities_per_worker: Vec<Vec<T>>) -> Self {
        TypedPoolConfig {
            wake_interval: Duration::from_millis(100),
            pool_name: "typed_pool".to_string(),
            pool_instance_id: "default".to_string(),
            capabilities_per_worker,
            starvation_threshold: DEFAULT_STARVATION_THRESHOLD,
        }
    }

    pub fn with_wake_interval(mut self, wake_interval: Duration) -> Self {
        self.wake_interval = wake_interval;
        self
    }

    pub fn with_pool_name(mut self, name: impl Into<String>) -> Self {
        self.pool_name = name.into();
        self
    }

    pub fn with_pool_instance_id(mut self, id: impl Into<String>) -> Self {
        self.pool_instance_id = id.into();
        self
    }

    pub fn with_starvation_threshold(mut self, threshold: usize) -> Self {
        self.starvation_threshold = threshold;
        self
    }
}
