//! The adaptive queue wrapper (spec §4.3.3): picks between
//! [`MutexJobQueue`] and [`LockFreeJobQueue`] at construction, and for
//! [`QueueStrategy::Adaptive`] may switch between them at runtime based on
//! observed contention.

use super::{JobQueue, LockFreeJobQueue, MutexJobQueue, TryDequeue};
use crate::error::Result;
use crate::job::Job;
use log::{debug, info};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How the adaptive queue picks its backing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStrategy {
    /// Always the mutex-guarded FIFO; never switches.
    ForceMutex,
    /// Always the lock-free MPMC queue; never switches.
    ForceLockFree,
    /// Chosen once at construction from a concurrency hint, then fixed.
    Auto { expected_concurrency: usize },
    /// May switch at runtime based on observed contention (the default).
    Adaptive,
}

impl Default for QueueStrategy {
    fn default() -> Self {
        QueueStrategy::Adaptive
    }
}

/// Evaluate a switch decision every this many completed operations.
pub const SWITCH_EVAL_INTERVAL: u64 = 1024;
/// Minimum time between two strategy switches.
pub const SWITCH_COOLDOWN: Duration = Duration::from_millis(100);
/// Switch mutex -> lock-free once the blocked-dequeue ratio exceeds this.
pub const MUTEX_BLOCKED_HIGH_WATERMARK: f64 = 0.25;
/// Switch lock-free -> mutex once the CAS-failure ratio exceeds this.
pub const LOCKFREE_CAS_FAIL_HIGH_WATERMARK: f64 = 0.15;
/// Switch lock-free -> mutex when depth stays at or below this (low
/// contention — the simpler strategy wins).
const LOW_CONTENTION_DEPTH: usize = 1;

enum Inner {
    Mutex(MutexJobQueue),
    LockFree(LockFreeJobQueue),
}

impl Inner {
    fn as_queue(&self) -> &dyn JobQueue {
        match self {
            Inner::Mutex(q) => q,
            Inner::LockFree(q) => q,
        }
    }

    fn is_mutex(&self) -> bool {
        matches!(self, Inner::Mutex(_))
    }
}

/// A FIFO job queue that transparently selects one of two strategies and,
/// in [`QueueStrategy::Adaptive`] mode, may switch at runtime without
/// losing or duplicating any migrated job (spec invariant 4).
pub struct AdaptiveJobQueue {
    strategy_mode: QueueStrategy,
    inner: RwLock<Arc<Inner>>,
    ops_since_eval: AtomicU64,
    last_switch: RwLock<Instant>,
    switch_count: AtomicUsize,
}

impl AdaptiveJobQueue {
    pub fn new(strategy: QueueStrategy) -> Self {
        let inner = match strategy {
            QueueStrategy::ForceMutex => Inner::Mutex(MutexJobQueue::new()),
            QueueStrategy::ForceLockFree => Inner::LockFree(LockFreeJobQueue::new()),
            QueueStrategy::Auto { expected_concurrency } => {
                // A cheap one-time heuristic: plenty of expected contenders
                // favors the lock-free queue; otherwise the simpler monitor
                // wins. Never revisited after construction.
                if expected_concurrency > num_cpus::get() {
                    Inner::LockFree(LockFreeJobQueue::new())
                } else {
                    Inner::Mutex(MutexJobQueue::new())
                }
            }
            QueueStrategy::Adaptive => Inner::Mutex(MutexJobQueue::new()),
        };
        AdaptiveJobQueue {
            strategy_mode: strategy,
            inner: RwLock::new(Arc::new(inner)),
            ops_since_eval: AtomicU64::new(0),
            last_switch: RwLock::new(Instant::now()),
            switch_count: AtomicUsize::new(0),
        }
    }

    /// Number of runtime strategy switches performed so far (telemetry).
    pub fn switch_count(&self) -> usize {
        self.switch_count.load(Ordering::Relaxed)
    }

    /// `true` if the queue is currently backed by the mutex strategy.
    pub fn is_mutex_backed(&self) -> bool {
        self.inner.read().is_mutex()
    }

    /// Removes and returns every job currently queued, in FIFO order.
    /// Used by immediate shutdown to account for jobs that will never be
    /// dispatched, not by the runtime dispatch path.
    pub fn drain_all(&self) -> Vec<Box<dyn Job>> {
        let guard = self.inner.read();
        match guard.as_ref() {
            Inner::Mutex(q) => q.drain_all(),
            Inner::LockFree(q) => q.drain_all(),
        }
    }

    fn current(&self) -> Arc<Inner> {
        self.inner.read().clone()
    }

    fn maybe_evaluate_switch(&self) {
        if self.strategy_mode != QueueStrategy::Adaptive {
            return;
        }
        if self.ops_since_eval.fetch_add(1, Ordering::Relaxed) + 1 < SWITCH_EVAL_INTERVAL {
            return;
        }
        self.ops_since_eval.store(0, Ordering::Relaxed);

        {
            let last = *self.last_switch.read();
            if last.elapsed() < SWITCH_COOLDOWN {
                return;
            }
        }

        let current = self.current();
        let should_switch_to_lockfree = match current.as_ref() {
            Inner::Mutex(q) => q.blocked_ratio() > MUTEX_BLOCKED_HIGH_WATERMARK,
            Inner::LockFree(_) => false,
        };
        let should_switch_to_mutex = match current.as_ref() {
            Inner::LockFree(q) => {
                q.cas_failure_ratio() > LOCKFREE_CAS_FAIL_HIGH_WATERMARK
                    || q.size() <= LOW_CONTENTION_DEPTH
            }
            Inner::Mutex(_) => false,
        };

        if should_switch_to_lockfree {
            self.switch_to(Inner::LockFree(LockFreeJobQueue::new()));
        } else if should_switch_to_mutex {
            self.switch_to(Inner::Mutex(MutexJobQueue::new()));
        }
    }

    /// Performs a strategy switch: builds the target queue, migrates every
    /// pending job across in FIFO order under the strategy lock, then
    /// publishes the new strategy. Enqueuers briefly serialize on the
    /// strategy lock during the splice; dequeuers already holding a
    /// reference to the old strategy simply finish against it.
    fn switch_to(&self, target: Inner) {
        let mut guard = self.inner.write();
        let previous = guard.clone();

        let pending = match previous.as_ref() {
            Inner::Mutex(q) => q.drain_all(),
            Inner::LockFree(q) => q.drain_all(),
        };
        if !pending.is_empty() {
            let push_result: Result<()> = match &target {
                Inner::Mutex(q) => q.enqueue_batch(pending),
                Inner::LockFree(q) => q.enqueue_batch(pending),
            };
            if let Err(e) = push_result {
                // The target queue was closed underneath us (shouldn't
                // happen: it is brand new and not yet published). Treat as
                // fatal to the switch; keep the old strategy rather than
                // silently dropping jobs.
                debug!("adaptive queue: abandoning strategy switch, {e}");
                return;
            }
        }

        *guard = Arc::new(target);
        *self.last_switch.write() = Instant::now();
        self.switch_count.fetch_add(1, Ordering::Relaxed);
        info!(
            "adaptive queue switched strategy (switch #{})",
            self.switch_count.load(Ordering::Relaxed)
        );
    }
}

impl JobQueue for AdaptiveJobQueue {
    fn enqueue(&self, job: Box<dyn Job>) -> Result<()> {
        // Hold the strategy read lock across the push itself (not just the
        // `Arc<Inner>` clone): `switch_to`'s write lock then can't publish a
        // new backend and drain the old one until this enqueue has either
        // landed in the old backend or observed the new one, so a job can
        // never be pushed into a backend that has already been drained and
        // orphaned (spec invariant 1).
        let guard = self.inner.read();
        let result = guard.as_queue().enqueue(job);
        drop(guard);
        self.maybe_evaluate_switch();
        result
    }

    fn enqueue_batch(&self, jobs: Vec<Box<dyn Job>>) -> Result<()> {
        let guard = self.inner.read();
        let result = guard.as_queue().enqueue_batch(jobs);
        drop(guard);
        self.maybe_evaluate_switch();
        result
    }

    fn dequeue(&self, timeout: Option<Duration>) -> Result<Box<dyn Job>> {
        let result = self.current().as_queue().dequeue(timeout);
        self.maybe_evaluate_switch();
        result
    }

    fn try_dequeue(&self) -> TryDequeue {
        let result = self.current().as_queue().try_dequeue();
        self.maybe_evaluate_switch();
        result
    }

    fn close(&self) {
        self.current().as_queue().close();
    }

    fn is_closed(&self) -> bool {
        self.current().as_queue().is_closed()
    }

    fn size(&self) -> usize {
        self.current().as_queue().size()
    }
}
