//! The worker loop (spec §4.4).
//!
//! A worker is generic over a [`JobSource`]: the untyped pool hands it a
//! single [`crate::queue::AdaptiveJobQueue`], the typed pool hands it a
//! priority-scanning source over several per-type queues. Either way the
//! loop itself — hooks, cancellation checks, panic containment, telemetry —
//! is written once.

use crate::cancel::CancellationToken;
use crate::error::Error;
use crate::job::Job;
use crate::logger::LogLevel;
use crate::metrics::{MetricsSink, WorkerSnapshot};
use log::{debug, error, warn};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// What a worker got back from its job source on one poll.
pub enum NextJob {
    Job(Box<dyn Job>),
    /// Nothing available within `wake_interval`; time for an `on_tick`.
    Idle,
    /// The source is closed and drained; the worker should exit.
    Closed,
}

/// Abstracts "how a worker gets its next job" over the untyped single-queue
/// case and the typed priority-scan case.
pub trait JobSource: Send {
    fn next_job(&mut self, wake_interval: Duration) -> NextJob;
}

/// Optional lifecycle hooks a pool may attach to a worker.
#[derive(Default)]
pub struct WorkerHooks {
    pub before_start: Option<Box<dyn FnMut() -> crate::error::Result<()> + Send>>,
    pub on_tick: Option<Box<dyn FnMut() + Send>>,
    pub after_stop: Option<Box<dyn FnMut() + Send>>,
}

/// Per-worker outcome callback, invoked once per dispatched job so the pool
/// can fold the result into its own snapshot without the worker needing to
/// know about the pool's aggregation strategy.
pub type ResultObserver = Box<dyn FnMut(&crate::error::Result<()>) + Send>;

pub struct Worker {
    pub id: usize,
    pool_token: CancellationToken,
    metrics: Option<Arc<dyn MetricsSink>>,
    logger: Option<Arc<dyn crate::logger::Logger>>,
}

impl Worker {
    pub fn new(
        id: usize,
        pool_token: CancellationToken,
        metrics: Option<Arc<dyn MetricsSink>>,
        logger: Option<Arc<dyn crate::logger::Logger>>,
    ) -> Self {
        Worker {
            id,
            pool_token,
            metrics,
            logger,
        }
    }

    fn emit(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Trace => debug!("[worker {}] {}", self.id, message),
            LogLevel::Debug => debug!("[worker {}] {}", self.id, message),
            LogLevel::Info => debug!("[worker {}] {}", self.id, message),
            LogLevel::Warn => warn!("[worker {}] {}", self.id, message),
            LogLevel::Error => error!("[worker {}] {}", self.id, message),
        }
        if let Some(logger) = &self.logger {
            logger.log(level, message);
        }
    }

    /// Runs the dispatch loop until cancelled, shut down, or the source
    /// closes. Returns the final snapshot for the pool to fold in.
    pub fn run(
        mut self,
        mut source: impl JobSource,
        wake_interval: Duration,
        mut hooks: WorkerHooks,
        mut on_result: ResultObserver,
    ) -> WorkerSnapshot {
        let mut snapshot = WorkerSnapshot {
            worker_id: self.id,
            jobs_executed: 0,
            jobs_skipped_cancelled: 0,
            is_alive: true,
        };

        if let Some(before_start) = hooks.before_start.as_mut() {
            if let Err(e) = before_start() {
                self.emit(
                    LogLevel::Error,
                    &format!("before_start hook failed, worker exiting: {e}"),
                );
                snapshot.is_alive = false;
                return snapshot;
            }
        }

        loop {
            if self.pool_token.is_cancelled() {
                self.emit(LogLevel::Debug, "cancellation observed, exiting");
                break;
            }

            match source.next_job(wake_interval) {
                NextJob::Job(mut job) => {
                    if job
                        .cancellation_token()
                        .map(|t| t.is_cancelled())
                        .unwrap_or(false)
                    {
                        snapshot.jobs_skipped_cancelled += 1;
                        let result = Err(Error::cancelled());
                        on_result(&result);
                        continue;
                    }

                    let name = job.name().to_string();
                    let outcome = catch_unwind(AssertUnwindSafe(|| job.execute()));
                    let result = match outcome {
                        Ok(r) => r,
                        Err(_) => {
                            self.emit(
                                LogLevel::Error,
                                &format!("job '{name}' panicked; converting to Internal"),
                            );
                            Err(Error::internal(format!("job '{name}' panicked")))
                        }
                    };

                    if let Err(ref e) = result {
                        self.emit(
                            LogLevel::Warn,
                            &format!("job '{name}' failed: {} ({})", e.message(), e.kind()),
                        );
                    }
                    snapshot.jobs_executed += 1;
                    on_result(&result);
                }
                NextJob::Idle => {
                    if let Some(on_tick) = hooks.on_tick.as_mut() {
                        on_tick();
                    }
                }
                NextJob::Closed => {
                    self.emit(LogLevel::Debug, "source closed, exiting");
                    break;
                }
            }
        }

        if let Some(after_stop) = hooks.after_stop.as_mut() {
            after_stop();
        }
        snapshot.is_alive = false;
        if let Some(metrics) = &self.metrics {
            metrics.update_worker_metrics(self.id, snapshot.clone());
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::job::CallbackJob;
    use crate::queue::{AdaptiveJobQueue, JobQueue, QueueStrategy, TryDequeue};
    use std::sync::atomic::{AtomicUsize, Ordering};

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

    #[test]
    fn runs_jobs_until_queue_closed() {
        let queue = Arc::new(AdaptiveJobQueue::new(QueueStrategy::ForceMutex));
        let completed = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let completed = completed.clone();
            queue
                .enqueue(Box::new(CallbackJob::new(move || {
                    completed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })))
                .unwrap();
        }
        queue.close();

        let worker = Worker::new(0, CancellationToken::new(), None, None);
        let source = SingleQueueSource { queue };
        let snapshot = worker.run(
            source,
            Duration::from_millis(20),
            WorkerHooks::default(),
            Box::new(|_| {}),
        );

        assert_eq!(snapshot.jobs_executed, 5);
        assert_eq!(completed.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn cancelled_pool_token_stops_worker_without_draining() {
        let queue = Arc::new(AdaptiveJobQueue::new(QueueStrategy::ForceMutex));
        queue
            .enqueue(Box::new(CallbackJob::new(|| Ok(()))))
            .unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let worker = Worker::new(0, token, None, None);
        let source = SingleQueueSource { queue };
        let snapshot = worker.run(
            source,
            Duration::from_millis(20),
            WorkerHooks::default(),
            Box::new(|_| {}),
        );
        assert_eq!(snapshot.jobs_executed, 0);
    }

    #[test]
    fn panicking_job_is_converted_to_internal_and_worker_continues() {
        let queue = Arc::new(AdaptiveJobQueue::new(QueueStrategy::ForceMutex));
        queue
            .enqueue(Box::new(CallbackJob::new(|| panic!("boom"))))
            .unwrap();
        let completed = Arc::new(AtomicUsize::new(0));
        let completed_cb = completed.clone();
        queue
            .enqueue(Box::new(CallbackJob::new(move || {
                completed_cb.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })))
            .unwrap();
        queue.close();

        let errors = Arc::new(std::sync::Mutex::new(Vec::new()));
        let errors_cb = errors.clone();
        let worker = Worker::new(0, CancellationToken::new(), None, None);
        let source = SingleQueueSource { queue };
        let snapshot = worker.run(
            source,
            Duration::from_millis(20),
            WorkerHooks::default(),
            Box::new(move |result| {
                if let Err(e) = result {
                    errors_cb.lock().unwrap().push(e.kind());
                }
            }),
        );

        assert_eq!(snapshot.jobs_executed, 2);
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert_eq!(errors.lock().unwrap().as_slice(), &[ErrorKind::Internal]);
    }

    #[test]
    fn skips_job_whose_token_is_already_cancelled() {
        let queue = Arc::new(AdaptiveJobQueue::new(QueueStrategy::ForceMutex));
        let token = CancellationToken::new();
        token.cancel();
        let executed = Arc::new(AtomicUsize::new(0));
        let executed_cb = executed.clone();
        queue
            .enqueue(Box::new(
                CallbackJob::new(move || {
                    executed_cb.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .with_cancellation(token.downgrade()),
            ))
            .unwrap();
        queue.close();

        let worker = Worker::new(0, CancellationToken::new(), None, None);
        let source = SingleQueueSource { queue };
        let snapshot = worker.run(
            source,
            Duration::from_millis(20),
            WorkerHooks::default(),
            Box::new(|_| {}),
        );
        assert_eq!(executed.load(Ordering::SeqCst), 0);
        assert_eq!(snapshot.jobs_skipped_cancelled, 1);
    }

    #[test]
    fn idle_ticks_invoke_on_tick_hook() {
        let queue = Arc::new(AdaptiveJobQueue::new(QueueStrategy::ForceMutex));
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticks_cb = ticks.clone();
        let queue_for_source = queue.clone();
        let worker = Worker::new(0, CancellationToken::new(), None, None);
        let handle = std::thread::spawn(move || {
            let source = SingleQueueSource {
                queue: queue_for_source,
            };
            worker.run(
                source,
                Duration::from_millis(5),
                WorkerHooks {
                    before_start: None,
                    on_tick: Some(Box::new(move || {
                        ticks_cb.fetch_add(1, Ordering::SeqCst);
                    })),
                    after_stop: None,
                },
                Box::new(|_| {}),
            )
        });
        std::thread::sleep(Duration::from_millis(30));
        queue.close();
        let snapshot = handle.join().unwrap();
        assert_eq!(snapshot.jobs_executed, 0);
        assert!(ticks.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn before_start_failure_prevents_any_dispatch() {
        let queue = Arc::new(AdaptiveJobQueue::new(QueueStrategy::ForceMutex));
        let executed = Arc::new(AtomicUsize::new(0));
        let executed_cb = executed.clone();
        queue
            .enqueue(Box::new(CallbackJob::new(move || {
                executed_cb.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })))
            .unwrap();

        let worker = Worker::new(0, CancellationToken::new(), None, None);
        let source = SingleQueueSource { queue };
        let snapshot = worker.run(
            source,
            Duration::from_millis(20),
            WorkerHooks {
                before_start: Some(Box::new(|| Err(Error::internal("setup failed")))),
                on_tick: None,
                after_stop: None,
            },
            Box::new(|_| {}),
        );
        assert!(!snapshot.is_alive);
        assert_eq!(executed.load(Ordering::SeqCst), 0);
        let _ = TryDequeue::Empty;
    }
}
