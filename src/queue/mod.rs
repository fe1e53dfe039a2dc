//! The adaptive job queue (spec §4.3) and its two inner strategies.
//!
//! [`JobQueue`] is the single contract both inner queues and the adaptive
//! wrapper implement, so pool and worker code is written once against a
//! `dyn JobQueue` / generic `Q: JobQueue` and is mechanically agnostic to
//! which strategy is backing it (spec invariant 4, "strategy transparency").

mod adaptive;
mod lockfree;
mod mutex;

pub use adaptive::{AdaptiveJobQueue, QueueStrategy};
pub use lockfree::LockFreeJobQueue;
pub use mutex::MutexJobQueue;

use crate::error::{Error, Result};
use crate::job::Job;
use std::time::Duration;

/// Result of a non-blocking dequeue attempt.
pub enum TryDequeue {
    /// A job was dequeued.
    Job(Box<dyn Job>),
    /// The queue is empty but still open.
    Empty,
    /// The queue is closed and drained; no more jobs will ever arrive.
    Closed,
}

/// The common queue contract (spec §4.3).
pub trait JobQueue: Send + Sync {
    /// Places `job` at the tail. Fails with `Unavailable` if closed.
    fn enqueue(&self, job: Box<dyn Job>) -> Result<()>;

    /// Enqueues a batch so that dequeuers either observe all of it or none
    /// of it. Fails the whole batch (none visible) if closed.
    fn enqueue_batch(&self, jobs: Vec<Box<dyn Job>>) -> Result<()>;

    /// Returns the head job, blocking up to `timeout` (or forever if
    /// `None`). Returns `Err(Timeout)` on deadline, `Err(Unavailable)` once
    /// closed and drained.
    fn dequeue(&self, timeout: Option<Duration>) -> Result<Box<dyn Job>>;

    /// Non-blocking dequeue attempt.
    fn try_dequeue(&self) -> TryDequeue;

    /// Marks the queue closed: no further enqueue succeeds; blocked
    /// dequeuers wake and drain remaining jobs before observing closure.
    fn close(&self);

    /// `true` once [`JobQueue::close`] has been called.
    fn is_closed(&self) -> bool;

    /// Best-effort approximate depth; may be slightly stale under the
    /// lock-free strategy.
    fn size(&self) -> usize;
}

/// Helper shared by both inner queues: translate "closed and drained" vs.
/// "closed but jobs remain" vs. "open and empty" into the right error for
/// a timed-out blocking dequeue.
fn unavailable() -> Error {
    Error::unavailable("queue is closed")
}

fn timed_out() -> Error {
    Error::timeout("dequeue timed out")
}
