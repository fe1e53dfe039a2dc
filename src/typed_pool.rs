//! The typed, priority-routed thread pool (spec §4.6).
//!
//! `T` is the caller's job-type enumeration (the typical case: `RealTime`,
//! `Batch`, `Background`). Greater `Ord` rank means higher dispatch
//! priority, matching the natural reading of a derived `enum` ordered from
//! lowest to highest priority.

use crate::cancel::CancellationToken;
use crate::config::TypedPoolConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::job::Job;
use crate::metrics::PoolSnapshotAccumulator;
use crate::queue::{AdaptiveJobQueue, JobQueue, QueueStrategy, TryDequeue};
use crate::registry::PoolContext;
use crate::worker::{NextJob, WorkerHooks};
use log::{info, warn};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

type QueueMap<T> = Arc<RwLock<HashMap<T, Arc<AdaptiveJobQueue>>>>;
type Notify = Arc<(Mutex<()>, Condvar)>;

/// Types a single worker is willing to serve, grouped by equal priority
/// (so a shared `Ord` rank round-robins instead of picking one arbitrarily).
struct PriorityGroup<T> {
    types: Vec<T>,
    rotate: usize,
}

fn build_groups<T: Ord + Clone>(mut capability: Vec<T>) -> Vec<PriorityGroup<T>> {
    // Descending priority: highest-ranked type first.
    capability.sort_by(|a, b| b.cmp(a));
    let mut groups: Vec<PriorityGroup<T>> = Vec::new();
    for t in capability {
        match groups.last_mut() {
            Some(g) if g.types.last().map(|last| last.cmp(&t) == std::cmp::Ordering::Equal).unwrap_or(false) => {
                g.types.push(t);
            }
            _ => groups.push(PriorityGroup {
                types: vec![t],
                rotate: 0,
            }),
        }
    }
    groups
}

/// Per-worker dispatch state implementing §4.6.2's algorithm.
struct TypedJobSource<T> {
    groups: Vec<PriorityGroup<T>>,
    queues: QueueMap<T>,
    notify: Notify,
    starvation_threshold: usize,
    consecutive_top: usize,
}

impl<T: Ord + Clone + Eq + Hash> TypedJobSource<T> {
    fn queue_for(&self, t: &T) -> Option<Arc<AdaptiveJobQueue>> {
        self.queues.read().get(t).cloned()
    }

    fn probe_group(&mut self, group_index: usize) -> Option<Box<dyn Job>> {
        let len = self.groups[group_index].types.len();
        for offset in 0..len {
            let idx = (self.groups[group_index].rotate + offset) % len;
            let t = self.groups[group_index].types[idx].clone();
            let Some(queue) = self.queue_for(&t) else {
                continue;
            };
            if let TryDequeue::Job(job) = queue.try_dequeue() {
                self.groups[group_index].rotate = (idx + 1) % len;
                return Some(job);
            }
        }
        None
    }

    /// `true` if every type across every group currently maps to a closed,
    /// drained queue (or no queue has ever been created for it).
    fn all_closed(&self) -> bool {
        let queues = self.queues.read();
        self.groups.iter().flat_map(|g| g.types.iter()).all(|t| {
            queues
                .get(t)
                .map(|q| q.is_closed() && q.size() == 0)
                .unwrap_or(true)
        })
    }

    fn scan(&mut self) -> Option<(usize, Box<dyn Job>)> {
        if self.groups.is_empty() {
            return None;
        }

        if self.consecutive_top >= self.starvation_threshold {
            for gi in 1..self.groups.len() {
                if let Some(job) = self.probe_group(gi) {
                    self.consecutive_top = 0;
                    return Some((gi, job));
                }
            }
        }

        for gi in 0..self.groups.len() {
            if let Some(job) = self.probe_group(gi) {
                if gi == 0 {
                    self.consecutive_top += 1;
                } else {
                    self.consecutive_top = 0;
                }
                return Some((gi, job));
            }
        }
        None
    }
}

impl<T: Ord + Clone + Eq + Hash + Send + Sync> crate::worker::JobSource for TypedJobSource<T> {
    fn next_job(&mut self, wake_interval: Duration) -> NextJob {
        if let Some((_, job)) = self.scan() {
            return NextJob::Job(job);
        }
        if self.all_closed() {
            return NextJob::Closed;
        }
        let (lock, cv) = &*self.notify;
        let mut guard = lock.lock();
        cv.wait_for(&mut guard, wake_interval);
        NextJob::Idle
    }
}

/// Owns one [`AdaptiveJobQueue`] per distinct `T` value submitted so far,
/// and one worker per entry of `capabilities_per_worker` (spec §4.6).
pub struct TypedThreadPool<T: Ord + Clone + Eq + Hash + Send + Sync + 'static> {
    config: TypedPoolConfig<T>,
    context: PoolContext,
    queues: QueueMap<T>,
    notify: Notify,
    pool_token: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    jobs_submitted: AtomicU64,
    snapshot: Arc<Mutex<PoolSnapshotAccumulator>>,
}

impl<T: Ord + Clone + Eq + Hash + Send + Sync + 'static> TypedThreadPool<T> {
    pub fn new(config: TypedPoolConfig<T>) -> Self {
        TypedThreadPool {
            context: PoolContext::from_registry(),
            queues: Arc::new(RwLock::new(HashMap::new())),
            notify: Arc::new((Mutex::new(()), Condvar::new())),
            pool_token: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            jobs_submitted: AtomicU64::new(0),
            snapshot: Arc::new(Mutex::new(PoolSnapshotAccumulator::default())),
            config,
        }
    }

    fn queue_for(&self, t: &T) -> Arc<AdaptiveJobQueue> {
        if let Some(q) = self.queues.read().get(t) {
            return q.clone();
        }
        // Lazily create the per-type queue on first submission (§9 open
        // question: a never-seen type is accepted, not rejected).
        let mut queues = self.queues.write();
        queues
            .entry(t.clone())
            .or_insert_with(|| Arc::new(AdaptiveJobQueue::new(QueueStrategy::Adaptive)))
            .clone()
    }

    /// Enqueues `job` onto the per-type queue for `job_type`, creating it
    /// lazily if this is the first submission of that type.
    pub fn submit(&self, job: Box<dyn Job>, job_type: T) -> Result<()> {
        let queue = self.queue_for(&job_type);
        queue.enqueue(job)?;
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
        let (_, cv) = &*self.notify;
        cv.notify_all();
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.config.capabilities_per_worker.len()
    }

    /// A best-effort snapshot combining this pool's submission count with
    /// the per-job telemetry accumulated so far across all per-type queues.
    pub fn snapshot(&self) -> crate::metrics::PoolSnapshot {
        let mut snap = self.snapshot.lock().to_snapshot();
        snap.jobs_submitted = self.jobs_submitted.load(Ordering::Relaxed);
        let queues = self.queues.read();
        snap.queue_depth = queues.values().map(|q| q.size()).sum();
        snap.strategy_switches = queues.values().map(|q| q.switch_count()).sum();
        snap
    }

    /// Spawns one worker per configured capability set. Every set must be
    /// non-empty.
    pub fn start(&self) -> Result<()> {
        if self.config.capabilities_per_worker.is_empty() {
            return Err(Error::invalid_argument(
                "typed pool requires at least one worker capability set",
            ));
        }
        if self.config.capabilities_per_worker.iter().any(Vec::is_empty) {
            return Err(Error::invalid_argument(
                "every worker capability set must be non-empty",
            ));
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::invalid_argument("pool already started"));
        }

        let mut handles = self.workers.lock();
        for (id, capability) in self.config.capabilities_per_worker.iter().cloned().enumerate() {
            // Ensure a queue exists for every type this worker can serve so
            // `all_closed` and the priority scan never special-case a
            // not-yet-submitted type.
            for t in &capability {
                let _ = self.queue_for(t);
            }
            let source = TypedJobSource {
                groups: build_groups(capability),
                queues: self.queues.clone(),
                notify: self.notify.clone(),
                starvation_threshold: self.config.starvation_threshold,
                consecutive_top: 0,
            };
            let pool_token = self.pool_token.clone();
            let metrics = self.context.metrics.clone();
            let logger = self.context.logger.clone();
            let wake_interval = self.config.wake_interval;
            let pool_name = self.config.pool_name.clone();
            let pool_instance_id = self.config.pool_instance_id.clone();
            let snapshot_for_observer = self.snapshot.clone();
            let metrics_for_observer = metrics.clone();

            let handle = std::thread::Builder::new()
                .name(format!("{pool_name}-typed-worker-{id}"))
                .spawn(move || {
                    let worker = crate::worker::Worker::new(id, pool_token, metrics, logger);
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
                    worker.run(source, wake_interval, WorkerHooks::default(), on_result);
                })
                .expect("failed to spawn typed worker thread");
            handles.push(handle);
        }
        info!(
            "typed pool '{}' started with {} workers",
            self.config.pool_name,
            self.config.capabilities_per_worker.len()
        );
        Ok(())
    }

    fn close_all_queues(&self) {
        for queue in self.queues.read().values() {
            queue.close();
        }
        let (_, cv) = &*self.notify;
        cv.notify_all();
    }

    pub fn shutdown_graceful(&self, timeout: Option<Duration>) -> Result<()> {
        if !self.running.load(Ordering::Acquire) {
            return Ok(());
        }
        self.close_all_queues();
        let deadline = timeout.map(|d| std::time::Instant::now() + d);
        let mut handles = self.workers.lock();
        for handle in handles.drain(..) {
            match deadline {
                None => {
                    let _ = handle.join();
                }
                Some(deadline) => {
                    while !handle.is_finished() {
                        if std::time::Instant::now() >= deadline {
                            self.running.store(false, Ordering::Release);
                            warn!(
                                "typed pool '{}' shutdown_graceful timed out waiting for workers",
                                self.config.pool_name
                            );
                            std::mem::drop(handle);
                            return Err(Error::timeout("shutdown_graceful deadline elapsed"));
                        }
                        std::thread::sleep(
                            Duration::from_millis(5).min(deadline - std::time::Instant::now()),
                        );
                    }
                    let _ = handle.join();
                }
            }
        }
        self.running.store(false, Ordering::Release);
        info!("typed pool '{}' shut down gracefully", self.config.pool_name);
        Ok(())
    }

    pub fn shutdown_immediate(&self) -> Result<()> {
        if !self.running.load(Ordering::Acquire) {
            return Ok(());
        }
        self.close_all_queues();
        self.pool_token.cancel();
        let mut handles = self.workers.lock();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
        self.running.store(false, Ordering::Release);
        self.discard_remaining_jobs();
        info!("typed pool '{}' shut down immediately", self.config.pool_name);
        Ok(())
    }

    /// Drains every per-type queue once all workers have stopped and
    /// records a `Cancelled` metric entry per discarded job (spec §8.3:
    /// jobs queued for a type no worker is capable of, or simply still
    /// pending when shutdown is immediate, are never dispatched).
    fn discard_remaining_jobs(&self) {
        let discarded: usize = self
            .queues
            .read()
            .values()
            .map(|queue| queue.drain_all().len())
            .sum();
        if discarded == 0 {
            return;
        }
        let mut acc = self.snapshot.lock();
        for _ in 0..discarded {
            acc.record_failure(ErrorKind::Cancelled);
        }
        if let Some(metrics) = &self.context.metrics {
            metrics.update_thread_pool_metrics(
                &self.config.pool_name,
                &self.config.pool_instance_id,
                acc.to_snapshot(),
            );
        }
        warn!(
            "typed pool '{}' discarded {} undispatched job(s) on shutdown_immediate",
            self.config.pool_name, discarded
        );
    }
}

impl<T: Ord + Clone + Eq + Hash + Send + Sync + 'static> Drop for TypedThreadPool<T> {
    fn drop(&mut self) {
        if self.running.load(Ordering::Acquire) {
            let _ = self.shutdown_graceful(Some(Duration::from_secs(30)));
        }
    }
}
