//! The mutex-guarded inner queue (spec §4.3.1): a classical monitor —
//! one mutex, one condvar, an ordered sequence.

use super::{timed_out, unavailable, JobQueue, TryDequeue};
use crate::error::Result;
use crate::job::Job;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

struct State {
    jobs: VecDeque<Box<dyn Job>>,
}

/// A monitor-style FIFO: correctness is straightforward, contention rises
/// with thread count (this is exactly the regime the adaptive wrapper
/// watches for via the blocked-dequeue ratio, see `queue::adaptive`).
pub struct MutexJobQueue {
    state: Mutex<State>,
    not_empty: Condvar,
    closed: AtomicBool,
    // Telemetry consumed by the adaptive wrapper to decide when to switch
    // strategy: how often dequeue actually had to block vs. find work
    // immediately.
    dequeue_attempts: AtomicU64,
    dequeue_blocked: AtomicU64,
}

impl Default for MutexJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MutexJobQueue {
    pub fn new() -> Self {
        MutexJobQueue {
            state: Mutex::new(State {
                jobs: VecDeque::new(),
            }),
            not_empty: Condvar::new(),
            closed: AtomicBool::new(false),
            dequeue_attempts: AtomicU64::new(0),
            dequeue_blocked: AtomicU64::new(0),
        }
    }

    /// Fraction of dequeue calls in the observation window that had to wait
    /// rather than finding a job immediately. Read by the adaptive wrapper;
    /// resets are handled by the caller via [`MutexJobQueue::reset_telemetry`].
    pub fn blocked_ratio(&self) -> f64 {
        let attempts = self.dequeue_attempts.load(Ordering::Relaxed);
        if attempts == 0 {
            return 0.0;
        }
        self.dequeue_blocked.load(Ordering::Relaxed) as f64 / attempts as f64
    }

    pub fn reset_telemetry(&self) {
        self.dequeue_attempts.store(0, Ordering::Relaxed);
        self.dequeue_blocked.store(0, Ordering::Relaxed);
    }

    /// Drains every pending job, in FIFO order, for migration into another
    /// strategy during an adaptive switch (spec §4.3.3).
    pub fn drain_all(&self) -> Vec<Box<dyn Job>> {
        let mut state = self.state.lock();
        state.jobs.drain(..).collect()
    }
}

impl JobQueue for MutexJobQueue {
    fn enqueue(&self, job: Box<dyn Job>) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(unavailable());
        }
        let mut state = self.state.lock();
        // Re-check under the lock: close() may have raced the check above.
        if self.closed.load(Ordering::Acquire) {
            return Err(unavailable());
        }
        state.jobs.push_back(job);
        self.not_empty.notify_one();
        Ok(())
    }

    fn enqueue_batch(&self, jobs: Vec<Box<dyn Job>>) -> Result<()> {
        if jobs.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(unavailable());
        }
        state.jobs.extend(jobs);
        self.not_empty.notify_all();
        Ok(())
    }

    fn dequeue(&self, timeout: Option<Duration>) -> Result<Box<dyn Job>> {
        self.dequeue_attempts.fetch_add(1, Ordering::Relaxed);
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut state = self.state.lock();
        loop {
            if let Some(job) = state.jobs.pop_front() {
                return Ok(job);
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(unavailable());
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        self.dequeue_blocked.fetch_add(1, Ordering::Relaxed);
                        return Err(timed_out());
                    }
                    let remaining = deadline - now;
                    let wait_result = self.not_empty.wait_for(&mut state, remaining);
                    if wait_result.timed_out()
                        && state.jobs.is_empty()
                        && !self.closed.load(Ordering::Acquire)
                    {
                        self.dequeue_blocked.fetch_add(1, Ordering::Relaxed);
                        return Err(timed_out());
                    }
                }
                None => {
                    self.not_empty.wait(&mut state);
                }
            }
        }
    }

    fn try_dequeue(&self) -> TryDequeue {
        self.dequeue_attempts.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        match state.jobs.pop_front() {
            Some(job) => TryDequeue::Job(job),
            None => {
                if self.closed.load(Ordering::Acquire) {
                    TryDequeue::Closed
                } else {
                    TryDequeue::Empty
                }
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _state = self.state.lock();
        self.not_empty.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn size(&self) -> usize {
        self.state.lock().jobs.len()
    }
}
