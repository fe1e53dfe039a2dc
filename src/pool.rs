//! The untyped thread pool (spec §4.5).

use crate::config::PoolConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::job::Job;
use crate::cancel::CancellationToken;
use crate::metrics::{PoolSnapshot, PoolSnapshotAccumulator, SystemSnapshot};
use crate::queue::{AdaptiveJobQueue, JobQueue, TryDequeue};
use crate::registry::PoolContext;
use crate::worker::{JobSource, NextJob, Worker, WorkerHooks};
use log::{info, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Dequeues one job at a time from a single [`AdaptiveJobQueue`].
struct SingleQueueSource {
    queue: Arc<AdaptiveJobQueue>,
}

impl JobSource for SingleQueueSource {
    fn next_job(&mut self, wake_interval: Duration) -> NextJob {
        match self.queue.dequeue(Some(wake_interval)) {
            Ok(job) => NextJob::Job(job),
            Err(e) if e.kind() == ErrorKind::Timeout => NextJob::Idle,
            Err(_) => NextJob::Closed,
        }
    }
}

/// Dequeues opportunistic batches of up to `batch_cap` jobs, draining the
/// buffer in order before polling the queue again (spec §6.1
/// `batch_processing`).
struct BatchQueueSource {
    queue: Arc<AdaptiveJobQueue>,
    buffer: VecDeque<Box<dyn Job>>,
    batch_cap: usize,
}

impl JobSource for BatchQueueSource {
    fn next_job(&mut self, wake_interval: Duration) -> NextJob {
        if let Some(job) = self.buffer.pop_front() {
            return NextJob::Job(job);
        }
        match self.queue.dequeue(Some(wake_interval)) {
            Ok(first) => {
                self.buffer.push_back(first);
                while self.buffer.len() < self.batch_cap {
                    match self.queue.try_dequeue() {
                        TryDequeue::Job(job) => self.buffer.push_back(job),
                        TryDequeue::Empty | TryDequeue::Closed => break,
                    }
                }
                NextJob::Job(self.buffer.pop_front().expect("just pushed at least one job"))
            }
            Err(e) if e.kind() == ErrorKind::Timeout => NextJob::Idle,
            Err(_) => NextJob::Closed,
        }
    }
}

/// Owns one adaptive queue and a fixed set of worker threads (spec §3.1).
pub struct ThreadPool {
    config: PoolConfig,
    context: PoolContext,
    queue: Arc<AdaptiveJobQueue>,
    pool_token: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    jobs_submitted: AtomicU64,
    snapshot: Arc<Mutex<PoolSnapshotAccumulator>>,
}

impl ThreadPool {
    /// Constructs the pool. No threads are spawned until [`ThreadPool::start`].
    pub fn new(config: PoolConfig) -> Self {
        let queue = Arc::new(AdaptiveJobQueue::new(config.queue_strategy));
        ThreadPool {
            context: PoolContext::from_registry(),
            queue,
            pool_token: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            jobs_submitted: AtomicU64::new(0),
            snapshot: Arc::new(Mutex::new(PoolSnapshotAccumulator::default())),
            config,
        }
    }

    /// Spawns the configured worker set. Idempotent-but-rejecting: calling
    /// `start` twice returns `InvalidArgument` rather than spawning a
    /// second set of workers.
    pub fn start(&self) -> Result<()> {
        if self.config.worker_count == 0 {
            return Err(Error::invalid_argument("worker_count must be positive"));
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::invalid_argument("pool already started"));
        }

        let mut handles = self.workers.lock();
        for id in 0..self.config.worker_count {
            let queue = self.queue.clone();
            let pool_token = self.pool_token.clone();
            let metrics = self.context.metrics.clone();
            let logger = self.context.logger.clone();
            let wake_interval = self.config.wake_interval;
            let batch_processing = self.config.batch_processing;
            let batch_cap = self.config.batch_cap;
            let snapshot_for_observer = self.snapshot.clone();
            let pool_name = self.config.pool_name.clone();
            let pool_instance_id = self.config.pool_instance_id.clone();
            let metrics_for_observer = metrics.clone();

            let handle = std::thread::Builder::new()
                .name(format!("{}-worker-{id}", pool_name))
                .spawn(move || {
                    let worker = Worker::new(id, pool_token, metrics.clone(), logger);
                    let on_result: Box<dyn FnMut(&Result<()>) + Send> =
                        Box::new(move |result: &Result<()>| {
                            let mut acc = snapshot_for_observer.lock();
                            match result {
                                Ok(()) => acc.completed += 1,
                                Err(e) => acc.record_failure(e.kind()),
                            }
                            if let Some(metrics) = &metrics_for_observer {
                                metrics.update_thread_pool_metrics(
                                    &pool_name,
                                    &pool_instance_id,
                                    acc.to_snapshot(),
                                );
                            }
                        });

                    if batch_processing {
                        let source = BatchQueueSource {
                            queue,
                            buffer: VecDeque::new(),
                            batch_cap,
                        };
                        worker.run(source, wake_interval, WorkerHooks::default(), on_result);
                    } else {
                        let source = SingleQueueSource { queue };
                        worker.run(source, wake_interval, WorkerHooks::default(), on_result);
                    }
                })
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }
        info!(
            "pool '{}' started with {} workers",
            self.config.pool_name, self.config.worker_count
        );
        Ok(())
    }

    /// Enqueues `job`. Fails with `Unavailable` if the pool is shutting down.
    pub fn submit(&self, job: Box<dyn Job>) -> Result<()> {
        self.queue.enqueue(job)?;
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// All-or-nothing batch submission (spec §4.3).
    pub fn submit_batch(&self, jobs: Vec<Box<dyn Job>>) -> Result<()> {
        let count = jobs.len() as u64;
        self.queue.enqueue_batch(jobs)?;
        self.jobs_submitted.fetch_add(count, Ordering::Relaxed);
        Ok(())
    }

    /// Current configured worker count.
    pub fn worker_count(&self) -> usize {
        self.config.worker_count
    }

    /// A best-effort snapshot combining this pool's submission count with
    /// the per-job telemetry accumulated so far.
    pub fn snapshot(&self) -> PoolSnapshot {
        let mut snap = self.snapshot.lock().to_snapshot();
        snap.jobs_submitted = self.jobs_submitted.load(Ordering::Relaxed);
        snap.queue_depth = self.queue.size();
        snap.strategy_switches = self.queue.switch_count();
        snap
    }

    /// Closes the queue, waits for workers to drain and exit within
    /// `timeout` (or forever if `None`), then joins them. Jobs still
    /// pending once the timeout elapses are discarded.
    pub fn shutdown_graceful(&self, timeout: Option<Duration>) -> Result<()> {
        if !self.running.load(Ordering::Acquire) {
            return Ok(());
        }
        self.queue.close();
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut handles = self.workers.lock();
        for handle in handles.drain(..) {
            match deadline {
                None => {
                    let _ = handle.join();
                }
                Some(deadline) => {
                    // std::thread::JoinHandle has no timed join; approximate
                    // with a bounded poll loop, matching the "wait up to a
                    // deadline" contract without pulling in an extra crate
                    // for a single call site.
                    while !handle.is_finished() {
                        if Instant::now() >= deadline {
                            self.running.store(false, Ordering::Release);
                            warn!(
                                "pool '{}' shutdown_graceful timed out waiting for workers",
                                self.config.pool_name
                            );
                            // Detach: we cannot forcibly kill an OS thread in
                            // safe Rust. The worker will observe `is_closed`
                            // and exit on its own; we simply stop waiting.
                            std::mem::drop(handle);
                            return Err(Error::timeout("shutdown_graceful deadline elapsed"));
                        }
                        std::thread::sleep(Duration::from_millis(5).min(deadline - Instant::now()));
                    }
                    let _ = handle.join();
                }
            }
        }
        self.running.store(false, Ordering::Release);
        info!("pool '{}' shut down gracefully", self.config.pool_name);
        Ok(())
    }

    /// Closes the queue, cancels the pool-wide token, lets each worker
    /// finish whatever job it is currently executing, then joins. Pending
    /// (not-yet-dispatched) jobs are discarded.
    pub fn shutdown_immediate(&self) -> Result<()> {
        if !self.running.load(Ordering::Acquire) {
            return Ok(());
        }
        self.queue.close();
        self.pool_token.cancel();
        let mut handles = self.workers.lock();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
        self.running.store(false, Ordering::Release);
        info!("pool '{}' shut down immediately", self.config.pool_name);
        Ok(())
    }
}

impl Drop for ThreadPool {
    /// Matches the corpus convention that resource-owning structs clean up
    /// in `Drop`: an abandoned running pool does not leak worker threads.
    fn drop(&mut self) {
        if self.running.load(Ordering::Acquire) {
            let _ = self.shutdown_graceful(Some(Duration::from_secs(30)));
        }
    }
}

/// A process-wide snapshot helper, kept here since `ThreadPool` is the
/// natural owner of "how many pools/workers exist" in the common case of a
/// single pool per process; multi-pool aggregation is left to the
/// integrator's metrics sink.
pub fn system_snapshot(pools: &[&ThreadPool]) -> SystemSnapshot {
    SystemSnapshot {
        total_pools: pools.len(),
        total_workers: pools.iter().map(|p| p.worker_count()).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::CallbackJob;
    use crate::queue::QueueStrategy;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn start_with_zero_workers_is_invalid_argument() {
        let pool = ThreadPool::new(PoolConfig::new().with_worker_count(0));
        let err = pool.start().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn double_start_is_invalid_argument() {
        let pool = ThreadPool::new(PoolConfig::new().with_worker_count(1));
        pool.start().unwrap();
        let err = pool.start().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        pool.shutdown_graceful(Some(Duration::from_secs(1))).unwrap();
    }

    #[test]
    fn submit_after_shutdown_is_unavailable() {
        let pool = ThreadPool::new(
            PoolConfig::new()
                .with_worker_count(2)
                .with_queue_strategy(QueueStrategy::ForceMutex),
        );
        pool.start().unwrap();
        pool.shutdown_graceful(Some(Duration::from_secs(1))).unwrap();
        let err = pool
            .submit(Box::new(CallbackJob::new(|| Ok(()))))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }

    #[test]
    fn basic_throughput_all_jobs_run_exactly_once() {
        let pool = ThreadPool::new(
            PoolConfig::new()
                .with_worker_count(4)
                .with_queue_strategy(QueueStrategy::ForceMutex),
        );
        pool.start().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..1000 {
            let counter = counter.clone();
            pool.submit(Box::new(CallbackJob::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })))
            .unwrap();
        }
        pool.shutdown_graceful(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1000);
    }

    #[test]
    fn empty_batch_submission_is_a_no_op() {
        let pool = ThreadPool::new(PoolConfig::new().with_worker_count(1));
        pool.start().unwrap();
        pool.submit_batch(Vec::new()).unwrap();
        pool.shutdown_graceful(Some(Duration::from_secs(1))).unwrap();
    }

    #[test]
    fn shutdown_immediate_on_already_stopped_pool_is_a_no_op() {
        let pool = ThreadPool::new(PoolConfig::new().with_worker_count(1));
        pool.start().unwrap();
        pool.shutdown_graceful(Some(Duration::from_secs(1))).unwrap();
        assert!(pool.shutdown_immediate().is_ok());
    }

    #[test]
    fn dropping_a_running_pool_joins_its_workers() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = ThreadPool::new(
                PoolConfig::new()
                    .with_worker_count(2)
                    .with_queue_strategy(QueueStrategy::ForceMutex),
            );
            pool.start().unwrap();
            for _ in 0..10 {
                let counter = counter.clone();
                pool.submit(Box::new(CallbackJob::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })))
                .unwrap();
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn batch_processing_runs_all_submitted_jobs() {
        let pool = ThreadPool::new(
            PoolConfig::new()
                .with_worker_count(2)
                .with_batch_processing(true)
                .with_batch_cap(8)
                .with_queue_strategy(QueueStrategy::ForceMutex),
        );
        pool.start().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..200 {
            let counter = counter.clone();
            pool.submit(Box::new(CallbackJob::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })))
            .unwrap();
        }
        pool.shutdown_graceful(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 200);
    }
}
