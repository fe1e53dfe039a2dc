//! Process-wide service registry (spec §4.7).
//!
//! A type-keyed singleton map holding optional collaborators — today a
//! [`Logger`](crate::logger::Logger) and a
//! [`MetricsSink`](crate::metrics::MetricsSink). Pools snapshot the
//! registry once at construction into a [`PoolContext`]; later registry
//! mutations do not retroactively affect already-built pools.

use crate::logger::Logger;
use crate::metrics::MetricsSink;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct Registry {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

/// The process-wide service registry.
pub struct ServiceRegistry {
    inner: RwLock<Registry>,
}

static GLOBAL: OnceCell<ServiceRegistry> = OnceCell::new();

impl ServiceRegistry {
    fn new() -> Self {
        ServiceRegistry {
            inner: RwLock::new(Registry::default()),
        }
    }

    /// Returns the process-wide instance, creating it on first use.
    pub fn global() -> &'static ServiceRegistry {
        GLOBAL.get_or_init(ServiceRegistry::new)
    }

    /// Registers a service under its concrete type. A later call with the
    /// same type replaces the previous registration for future lookups;
    /// pools that already snapshotted a [`PoolContext`] keep the old one.
    pub fn register<S: Any + Send + Sync + 'static>(&self, service: Arc<S>) {
        self.inner
            .write()
            .entries
            .insert(TypeId::of::<S>(), service as Arc<dyn Any + Send + Sync>);
    }

    /// Looks up a previously registered service, if any.
    pub fn get<S: Any + Send + Sync + 'static>(&self) -> Option<Arc<S>> {
        self.inner
            .read()
            .entries
            .get(&TypeId::of::<S>())
            .cloned()
            .and_then(|arc| arc.downcast::<S>().ok())
    }

    /// Removes a prior registration, if any existed.
    pub fn unregister<S: Any + Send + Sync + 'static>(&self) {
        self.inner.write().entries.remove(&TypeId::of::<S>());
    }
}

/// Collaborator handles a pool snapshots at construction time and keeps
/// for its lifetime, regardless of later registry mutation.
#[derive(Clone, Default)]
pub struct PoolContext {
    pub logger: Option<Arc<dyn Logger>>,
    pub metrics: Option<Arc<dyn MetricsSink>>,
}

impl PoolContext {
    /// Snapshots whatever is currently registered in the global registry.
    pub fn from_registry() -> Self {
        let registry = ServiceRegistry::global();
        PoolContext {
            logger: registry.get::<DynLogger>().map(|wrapped| wrapped.0.clone()),
            metrics: registry.get::<DynMetricsSink>().map(|wrapped| wrapped.0.clone()),
        }
    }
}

/// Newtype wrapper so a trait-object logger can be stored in the
/// `TypeId`-keyed registry (which requires `Sized` keys).
struct DynLogger(Arc<dyn Logger>);
struct DynMetricsSink(Arc<dyn MetricsSink>);

impl ServiceRegistry {
    /// Registers the process-wide logger.
    pub fn register_logger(&self, logger: Arc<dyn Logger>) {
        self.register(Arc::new(DynLogger(logger)));
    }

    /// Registers the process-wide metrics sink.
    pub fn register_metrics(&self, metrics: Arc<dyn MetricsSink>) {
        self.register(Arc::new(DynMetricsSink(metrics)));
    }

    /// Removes the process-wide logger, if one is registered.
    pub fn unregister_logger(&self) {
        self.unregister::<DynLogger>();
    }

    /// Removes the process-wide metrics sink, if one is registered.
    pub fn unregister_metrics(&self) {
        self.unregister::<DynMetricsSink>();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LogLevel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLogger {
        calls: AtomicUsize,
    }

    impl Logger for CountingLogger {
        fn log(&self, _level: LogLevel, _message: &str) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn register_and_snapshot_logger() {
        let logger = Arc::new(CountingLogger {
            calls: AtomicUsize::new(0),
        });
        ServiceRegistry::global().register_logger(logger.clone());
        let ctx = PoolContext::from_registry();
        assert!(ctx.logger.is_some());
        ctx.logger.unwrap().log(LogLevel::Info, "hello");
        assert_eq!(logger.calls.load(Ordering::SeqCst), 1);
        ServiceRegistry::global().unregister::<DynLogger>();
    }

    #[test]
    fn absent_service_snapshots_to_none() {
        ServiceRegistry::global().unregister::<DynMetricsSink>();
        let ctx = PoolContext::from_registry();
        assert!(ctx.metrics.is_none());
    }
}
