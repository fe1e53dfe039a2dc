//! Cancellation tokens (spec §4.2).
//!
//! A [`CancellationToken`] is a monotonic, thread-safe signal: once
//! cancelled it stays cancelled. Tokens may be linked in a parent/child
//! tree so that cancelling a parent cancels every descendant, without the
//! parent and child keeping each other alive (§3.3, §9 "weak parent/child
//! token graph").

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct Inner {
    cancelled: AtomicBool,
    // Callbacks waiting to fire. Drained (and invoked outside the lock) the
    // moment the token is cancelled.
    callbacks: Mutex<Vec<Callback>>,
    children: Mutex<Vec<Weak<Inner>>>,
}

impl Inner {
    fn new() -> Self {
        Inner {
            cancelled: AtomicBool::new(false),
            callbacks: Mutex::new(Vec::new()),
            children: Mutex::new(Vec::new()),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Cancels this node and propagates to live children. Returns the
    /// callbacks that should run on the calling thread (drained from the
    /// lock before invocation, per the "callbacks fire outside any internal
    /// lock" contract).
    fn cancel(self: &Arc<Self>) {
        // Monotone: only the thread that flips false->true drives the fan-out.
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        for cb in callbacks {
            cb();
        }

        let children = self.children.lock().clone();
        for weak_child in children {
            if let Some(child) = weak_child.upgrade() {
                child.cancel();
            }
        }
    }

    fn on_cancel(self: &Arc<Self>, cb: Callback) {
        if self.is_cancelled() {
            cb();
            return;
        }
        let mut callbacks = self.callbacks.lock();
        // Re-check under the lock: cancel() may have raced us and already drained.
        if self.is_cancelled() {
            drop(callbacks);
            cb();
        } else {
            callbacks.push(cb);
        }
    }
}

/// A cancellation signal, optionally linked into a parent/child tree.
///
/// Clones of a `CancellationToken` share the same underlying signal; use
/// [`CancellationToken::link_child`] to create an independently-cancellable
/// token that also observes the parent.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// Creates a fresh, unlinked token.
    pub fn new() -> Self {
        CancellationToken {
            inner: Arc::new(Inner::new()),
        }
    }

    /// Signals cancellation. Idempotent: the second and later calls are
    /// no-ops (spec invariant 5, §8.2 "`cancel()` then `cancel()` invokes
    /// callbacks exactly once").
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Lock-free read of the cancellation state.
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Registers a callback to run when this token is cancelled. If the
    /// token is already cancelled, the callback runs immediately on the
    /// calling thread before this method returns.
    pub fn on_cancel<F>(&self, cb: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.on_cancel(Box::new(cb));
    }

    /// Produces a child token that is cancelled whenever `self` is
    /// cancelled. The child may be cancelled independently without
    /// affecting the parent or its other children. The parent holds only a
    /// weak reference to the child, so letting the child go out of scope
    /// does not leak.
    pub fn link_child(&self) -> CancellationToken {
        let child = CancellationToken::new();

        if self.inner.is_cancelled() {
            child.cancel();
            return child;
        }

        let mut children = self.inner.children.lock();
        // Re-check: a concurrent cancel() may have drained/cancelled between
        // our first check and taking the lock.
        if self.inner.is_cancelled() {
            drop(children);
            child.cancel();
        } else {
            children.push(Arc::downgrade(&child.inner));
        }
        child
    }

    /// A weak, non-owning handle suitable for storing on a [`crate::job::Job`]
    /// without keeping the token alive past its owner.
    pub fn downgrade(&self) -> WeakCancellationToken {
        WeakCancellationToken {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// A non-owning observer of a [`CancellationToken`].
///
/// Jobs hold this rather than a strong `CancellationToken` so that a
/// cancellation token dropped by its creator does not keep an enqueued
/// job's dependency graph alive (spec §9, avoiding intrusive back-pointers).
#[derive(Clone)]
pub struct WeakCancellationToken {
    inner: Weak<Inner>,
}

impl WeakCancellationToken {
    /// Returns `true` if the token still exists and is cancelled. A token
    /// whose owner has been dropped is treated as not-cancelled: absence of
    /// a cancellation source is not itself a cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        self.inner
            .upgrade()
            .map(|inner| inner.is_cancelled())
            .unwrap_or(false)
    }
}
