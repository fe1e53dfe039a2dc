//! Closed error taxonomy for the engine (spec §7).
//!
//! Every fallible operation in this crate returns [`Result<T>`], whose error
//! variant is a small, closed set of categories. Job-internal failures never
//! escape as Rust panics across the worker boundary; they are captured here.

use std::fmt;
use thiserror::Error;

/// The closed set of failure categories the engine can produce.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The operation's cancellation token was signalled before it ran.
    #[error("operation was cancelled")]
    Cancelled,
    /// A `dequeue` or `shutdown_graceful` deadline elapsed.
    #[error("operation timed out")]
    Timeout,
    /// Caller misuse: double-start, empty capability set, zero workers, etc.
    #[error("invalid argument")]
    InvalidArgument,
    /// The pool is shutting down or the queue has been closed.
    #[error("pool or queue unavailable")]
    Unavailable,
    /// An unexpected condition: a caught panic, a violated internal
    /// invariant, or resource exhaustion.
    #[error("internal error")]
    Internal,
}

/// An engine error: a category tag plus a human-readable message.
///
/// `Error` deliberately does not implement `From` for arbitrary upstream
/// error types; callers construct one with [`Error::new`] or one of the
/// `Error::cancelled` / `Error::timeout` / ... helpers, and any inner
/// error is kept around as the `source` for diagnostics.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation was cancelled")
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Crate-local result alias, used throughout instead of spelling out
/// `std::result::Result<T, Error>` at every call site.
pub type Result<T> = std::result::Result<T, Error>;
