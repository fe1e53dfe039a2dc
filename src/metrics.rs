//! The metrics interface the engine produces and the surrounding
//! integrator consumes (spec §6.3).
//!
//! This crate never aggregates or exports metrics itself; it only calls
//! into a `MetricsSink` when one has been registered through
//! [`crate::registry::ServiceRegistry`]. Absence of a sink is silent.

use crate::error::ErrorKind;
use std::time::Duration;

/// A point-in-time snapshot of process-wide counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemSnapshot {
    pub total_pools: usize,
    pub total_workers: usize,
}

/// A point-in-time snapshot of one pool's counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolSnapshot {
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_failed_cancelled: u64,
    pub jobs_failed_timeout: u64,
    pub jobs_failed_invalid_argument: u64,
    pub jobs_failed_unavailable: u64,
    pub jobs_failed_internal: u64,
    pub avg_execution_time: Duration,
    pub p99_execution_time: Duration,
    pub queue_depth: usize,
    pub strategy_switches: usize,
    /// Only meaningful while the adaptive queue is lock-free backed.
    pub cas_failure_ratio: f64,
}

impl PoolSnapshot {
    /// Records one job outcome into the failure-by-category counters.
    pub fn record_failure(&mut self, kind: ErrorKind) {
        match kind {
            ErrorKind::Cancelled => self.jobs_failed_cancelled += 1,
            ErrorKind::Timeout => self.jobs_failed_timeout += 1,
            ErrorKind::InvalidArgument => self.jobs_failed_invalid_argument += 1,
            ErrorKind::Unavailable => self.jobs_failed_unavailable += 1,
            ErrorKind::Internal => self.jobs_failed_internal += 1,
        }
    }
}

/// A point-in-time snapshot of one worker's counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerSnapshot {
    pub worker_id: usize,
    pub jobs_executed: u64,
    pub jobs_skipped_cancelled: u64,
    pub is_alive: bool,
}

/// Consumed, not defined here: an integrator implements this to receive
/// telemetry the engine produces. Methods take owned snapshots so the sink
/// may hand them off to a background aggregator without borrowing back
/// into the engine.
pub trait MetricsSink: Send + Sync {
    fn update_system_metrics(&self, snapshot: SystemSnapshot);
    fn update_thread_pool_metrics(&self, pool_name: &str, pool_instance_id: &str, snapshot: PoolSnapshot);
    fn update_worker_metrics(&self, worker_id: usize, snapshot: WorkerSnapshot);
    /// Used in tests to observe the latest pool snapshot synchronously.
    fn get_current_snapshot(&self, pool_name: &str, pool_instance_id: &str) -> Option<PoolSnapshot>;
}

/// Accumulates per-job outcomes into a [`PoolSnapshot`]-shaped counter set,
/// shared across every worker thread's result-observer closure so a pool's
/// own snapshot reflects the same totals handed to an external
/// [`MetricsSink`]. Shared by both [`crate::pool::ThreadPool`] and
/// [`crate::typed_pool::TypedThreadPool`].
#[derive(Default)]
pub(crate) struct PoolSnapshotAccumulator {
    pub(crate) completed: u64,
    pub(crate) cancelled: u64,
    pub(crate) timeout: u64,
    pub(crate) invalid_argument: u64,
    pub(crate) unavailable: u64,
    pub(crate) internal: u64,
}

impl PoolSnapshotAccumulator {
    pub(crate) fn record_failure(&mut self, kind: ErrorKind) {
        match kind {
            ErrorKind::Cancelled => self.cancelled += 1,
            ErrorKind::Timeout => self.timeout += 1,
            ErrorKind::InvalidArgument => self.invalid_argument += 1,
            ErrorKind::Unavailable => self.unavailable += 1,
            ErrorKind::Internal => self.internal += 1,
        }
    }

    pub(crate) fn to_snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            jobs_submitted: 0,
            jobs_completed: self.completed,
            jobs_failed_cancelled: self.cancelled,
            jobs_failed_timeout: self.timeout,
            jobs_failed_invalid_argument: self.invalid_argument,
            jobs_failed_unavailable: self.unavailable,
            jobs_failed_internal: self.internal,
            avg_execution_time: Duration::ZERO,
            p99_execution_time: Duration::ZERO,
            queue_depth: 0,
            strategy_switches: 0,
            cas_failure_ratio: 0.0,
        }
    }
}
