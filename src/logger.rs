//! The optional injectable logger interface (spec §6.2).
//!
//! The engine's own code logs unconditionally through the `log` facade
//! (`log::{trace, debug, info, warn, error}`); this trait is an *additional*
//! path for integrators who want structured capture without installing a
//! global `log` subscriber. When registered via
//! [`crate::registry::ServiceRegistry`], a pool's [`crate::registry::PoolContext`]
//! forwards the same events to it.

use std::fmt;

/// Mirrors `log::Level` so an integrator already using the `log` facade
/// does not need to learn a second severity scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// A thread-safe log sink. Implementors are responsible for their own
/// internal synchronization; the engine calls this from arbitrary worker
/// threads without additional locking.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}
