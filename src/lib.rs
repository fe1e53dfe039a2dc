//! A concurrent worker-pool execution engine: an adaptive job queue that
//! transparently switches between a mutex-guarded FIFO and a lock-free
//! MPMC queue, a worker lifecycle with cooperative cancellation, and both
//! an untyped and a typed (priority-routed) thread pool built on top.
//!
//! Start with [`pool::ThreadPool`] for the common case, or
//! [`typed_pool::TypedThreadPool`] when jobs need priority-aware routing
//! across a handful of declared types.

pub mod cancel;
pub mod config;
pub mod error;
pub mod hazard;
pub mod job;
pub mod logger;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod typed_pool;
pub mod worker;

pub use cancel::{CancellationToken, WeakCancellationToken};
pub use config::{PoolConfig, TypedPoolConfig};
pub use error::{Error, ErrorKind, Result};
pub use job::{CallbackJob, Job};
pub use pool::ThreadPool;
pub use queue::QueueStrategy;
pub use typed_pool::TypedThreadPool;
