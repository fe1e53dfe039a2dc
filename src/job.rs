//! The job abstraction (spec §4.1).
//!
//! A job is anything with a single `execute` entry point. The trait is the
//! engine's one polymorphism point; `CallbackJob` is the concrete,
//! closure-wrapping variant provided out of the box rather than a deep
//! hierarchy of job kinds (§9).

use crate::cancel::WeakCancellationToken;
use crate::error::Result;

/// A unit of work a pool can execute exactly once.
///
/// `execute` must not unwind: any panic inside a job is caught by the
/// worker at the dispatch boundary and converted to
/// [`crate::error::ErrorKind::Internal`], so implementors are free to
/// write ordinary, panicking Rust and rely on the worker for containment.
pub trait Job: Send {
    /// Runs the job to completion.
    fn execute(&mut self) -> Result<()>;

    /// A display name used only for telemetry and error messages.
    fn name(&self) -> &str {
        "job"
    }

    /// The cancellation token this job should be checked against before
    /// dispatch, if any.
    fn cancellation_token(&self) -> Option<&WeakCancellationToken> {
        None
    }
}

/// A [`Job`] built from a plain closure, for callers who don't want to
/// define a type. The closure is invoked at most once.
pub struct CallbackJob {
    name: String,
    token: Option<WeakCancellationToken>,
    callback: Option<Box<dyn FnMut() -> Result<()> + Send + 'static>>,
}

impl CallbackJob {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        CallbackJob {
            name: "callback_job".to_string(),
            token: None,
            callback: Some(Box::new(callback)),
        }
    }

    /// Attaches a display name used for telemetry and error messages.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Attaches a cancellation token the worker checks before dispatch.
    pub fn with_cancellation(mut self, token: WeakCancellationToken) -> Self {
        self.token = Some(token);
        self
    }
}

impl Job for CallbackJob {
    fn execute(&mut self) -> Result<()> {
        match self.callback.as_mut() {
            Some(cb) => cb(),
            // Defensive: execute() is only ever called once per job by the
            // worker, but a misbehaving caller invoking it twice directly
            // should see a structured error rather than a panic.
            None => Err(crate::error::Error::internal(
                "CallbackJob executed more than once",
            )),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn cancellation_token(&self) -> Option<&WeakCancellationToken> {
        self.token.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn callback_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_cb = calls.clone();
        let mut job = CallbackJob::new(move || {
            calls_cb.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        job.execute().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn name_defaults_and_can_be_set() {
        let job = CallbackJob::new(|| Ok(()));
        assert_eq!(job.name(), "callback_job");
        let job = job.with_name("my-job");
        assert_eq!(job.name(), "my-job");
    }

    #[test]
    fn cancellation_token_round_trips() {
        let token = CancellationToken::new();
        let job = CallbackJob::new(|| Ok(())).with_cancellation(token.downgrade());
        assert!(!job.cancellation_token().unwrap().is_cancelled());
        token.cancel();
        assert!(job.cancellation_token().unwrap().is_cancelled());
    }
}
