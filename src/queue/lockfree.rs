//! The lock-free inner queue (spec §4.3.2): a Michael–Scott MPMC queue with
//! hazard-pointer reclamation, a per-thread node-pool cache, and an
//! adaptive spin/yield/park backoff on the blocking path.

use super::{timed_out, unavailable, JobQueue, TryDequeue};
use crate::error::Result;
use crate::hazard::HazardDomain;
use crate::job::Job;
use crossbeam_utils::Backoff;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex as ParkMutex};
use std::cell::RefCell;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// One process-wide hazard directory shared by every lock-free queue
/// instance (spec: "HazardPointer / NodePool ... Process-wide,
/// lazy-initialized").
static HAZARDS: Lazy<HazardDomain> = Lazy::new(HazardDomain::new);

struct Node {
    /// `Some` (non-null) for a live, unclaimed job node; null for a dummy
    /// head node or a node whose job has already been claimed by a
    /// dequeuer. Claiming is a single atomic swap so at most one thread
    /// ever takes ownership of a given node's payload.
    data: AtomicPtr<Box<dyn Job>>,
    next: AtomicPtr<Node>,
}

impl Node {
    fn dummy() -> *mut Node {
        Box::into_raw(Box::new(Node {
            data: AtomicPtr::new(ptr::null_mut()),
            next: AtomicPtr::new(ptr::null_mut()),
        }))
    }
}

// Process-wide per-thread cache of retired node allocations, reused to
// avoid the allocator hot path on the enqueue fast path (spec: "a node
// pool with per-thread freelist caches").
mod nodepool {
    use super::Node;
    use std::cell::RefCell;
    use std::ptr;
    use std::sync::atomic::{AtomicPtr, Ordering};

    const CACHE_CAP: usize = 128;

    /// Owns the raw node pointers cached on this thread; frees them on
    /// thread exit so a recycling thread leaves nothing behind.
    struct NodeCache(Vec<*mut Node>);

    impl Drop for NodeCache {
        fn drop(&mut self) {
            for node in self.0.drain(..) {
                drop(unsafe { Box::from_raw(node) });
            }
        }
    }

    thread_local! {
        static FREE: RefCell<NodeCache> = RefCell::new(NodeCache(Vec::new()));
    }

    pub fn acquire_with_job(job: Box<dyn Job>) -> *mut Node {
        let data_ptr: *mut Box<dyn Job> = Box::into_raw(Box::new(job));
        acquire_raw(data_ptr)
    }

    fn acquire_raw(data_ptr: *mut Box<dyn Job>) -> *mut Node {
        let reused = FREE.with(|cache| cache.borrow_mut().0.pop());
        match reused {
            Some(node) => {
                // SAFETY: nodes on the freelist were retired only after
                // being unlinked and confirmed unhazarded; we have
                // exclusive access here.
                unsafe {
                    (*node).data.store(data_ptr, Ordering::Relaxed);
                    (*node).next.store(ptr::null_mut(), Ordering::Relaxed);
                }
                node
            }
            None => Box::into_raw(Box::new(Node {
                data: AtomicPtr::new(data_ptr),
                next: AtomicPtr::new(ptr::null_mut()),
            })),
        }
    }

    /// Reclaims a node that is guaranteed unreachable and unhazarded: either
    /// recycles it into this thread's cache, or frees it outright.
    pub fn release(node: *mut Node) {
        // SAFETY: caller guarantees exclusive ownership at this point
        // (hazard-domain confirmed no live hazard pointer references it).
        let leftover_data = unsafe { (*node).data.swap(ptr::null_mut(), Ordering::AcqRel) };
        if !leftover_data.is_null() {
            drop(unsafe { Box::from_raw(leftover_data) });
        }
        let cached = FREE.with(|cache| {
            let mut cache = cache.borrow_mut();
            if cache.0.len() < CACHE_CAP {
                cache.0.push(node);
                true
            } else {
                false
            }
        });
        if !cached {
            drop(unsafe { Box::from_raw(node) });
        }
    }
}

fn release_unpublished_chain(mut node: *mut Node) {
    while !node.is_null() {
        let next = unsafe { (*node).next.load(Ordering::Relaxed) };
        nodepool::release(node);
        node = next;
    }
}

pub struct LockFreeJobQueue {
    head: AtomicPtr<Node>,
    tail: AtomicPtr<Node>,
    closed: AtomicBool,
    len: AtomicUsize,
    park_lock: ParkMutex<()>,
    park_cv: Condvar,
    cas_attempts: AtomicU64,
    cas_failures: AtomicU64,
}

unsafe impl Send for LockFreeJobQueue {}
unsafe impl Sync for LockFreeJobQueue {}

impl Default for LockFreeJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl LockFreeJobQueue {
    pub fn new() -> Self {
        let dummy = Node::dummy();
        LockFreeJobQueue {
            head: AtomicPtr::new(dummy),
            tail: AtomicPtr::new(dummy),
            closed: AtomicBool::new(false),
            len: AtomicUsize::new(0),
            park_lock: ParkMutex::new(()),
            park_cv: Condvar::new(),
            cas_attempts: AtomicU64::new(0),
            cas_failures: AtomicU64::new(0),
        }
    }

    /// Fraction of CAS attempts on the fast paths that had to retry due to
    /// contention. Read by the adaptive wrapper.
    pub fn cas_failure_ratio(&self) -> f64 {
        let attempts = self.cas_attempts.load(Ordering::Relaxed);
        if attempts == 0 {
            return 0.0;
        }
        self.cas_failures.load(Ordering::Relaxed) as f64 / attempts as f64
    }

    pub fn reset_telemetry(&self) {
        self.cas_attempts.store(0, Ordering::Relaxed);
        self.cas_failures.store(0, Ordering::Relaxed);
    }

    fn notify_waiters(&self) {
        let _guard = self.park_lock.lock();
        self.park_cv.notify_all();
    }

    fn push_chain(&self, first: *mut Node, last: *mut Node, count: usize) -> Result<()> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                release_unpublished_chain(first);
                return Err(unavailable());
            }
            let hp_tail = HAZARDS.acquire(0);
            let tail_ptr = self.tail.load(Ordering::Acquire);
            hp_tail.protect(tail_ptr);
            if tail_ptr != self.tail.load(Ordering::Acquire) {
                continue;
            }
            let next = unsafe { (*tail_ptr).next.load(Ordering::Acquire) };
            if tail_ptr != self.tail.load(Ordering::Acquire) {
                continue;
            }
            if !next.is_null() {
                // Tail lagging behind the real end; help it along and retry.
                let _ =
                    self.tail
                        .compare_exchange(tail_ptr, next, Ordering::AcqRel, Ordering::Acquire);
                continue;
            }
            self.cas_attempts.fetch_add(1, Ordering::Relaxed);
            match unsafe {
                (*tail_ptr).next.compare_exchange(
                    ptr::null_mut(),
                    first,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
            } {
                Ok(_) => {
                    let _ = self.tail.compare_exchange(
                        tail_ptr,
                        last,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                    self.len.fetch_add(count, Ordering::Relaxed);
                    self.notify_waiters();
                    return Ok(());
                }
                Err(_) => {
                    self.cas_failures.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            }
        }
    }

    /// A single non-blocking pop attempt: `None` means the queue was
    /// observed empty at some instant (caller decides whether that means
    /// "try again" or "closed", since closure is a separate flag).
    fn try_pop(&self) -> Option<Box<dyn Job>> {
        loop {
            let hp_head = HAZARDS.acquire(0);
            let head_ptr = self.head.load(Ordering::Acquire);
            hp_head.protect(head_ptr);
            if head_ptr != self.head.load(Ordering::Acquire) {
                continue;
            }

            let tail_ptr = self.tail.load(Ordering::Acquire);
            let hp_next = HAZARDS.acquire(1);
            let next = unsafe { (*head_ptr).next.load(Ordering::Acquire) };
            hp_next.protect(next);
            if head_ptr != self.head.load(Ordering::Acquire) {
                continue;
            }

            if head_ptr == tail_ptr {
                if next.is_null() {
                    return None;
                }
                // Tail lagging behind a linked-but-unswung node; help it along.
                let _ = self.tail.compare_exchange(
                    tail_ptr,
                    next,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                continue;
            }

            // SAFETY: `next` is hazard-protected and non-null here.
            let claimed = unsafe { (*next).data.swap(ptr::null_mut(), Ordering::AcqRel) };
            if claimed.is_null() {
                // Another thread already claimed this node's payload; the
                // head CAS below is theirs to make. Retry from the top.
                continue;
            }

            self.cas_attempts.fetch_add(1, Ordering::Relaxed);
            if self
                .head
                .compare_exchange(head_ptr, next, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                // Unreachable in a correct run (we are the unique claimant
                // for this head/next pair) but handled defensively: we
                // already own `claimed` uniquely regardless of this CAS.
                self.cas_failures.fetch_add(1, Ordering::Relaxed);
            }

            self.len.fetch_sub(1, Ordering::Relaxed);
            HAZARDS.retire(head_ptr, nodepool::release);
            let job = unsafe { Box::from_raw(claimed) };
            return Some(*job);
        }
    }
}

impl JobQueue for LockFreeJobQueue {
    fn enqueue(&self, job: Box<dyn Job>) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(unavailable());
        }
        let node = nodepool::acquire_with_job(job);
        self.push_chain(node, node, 1)
    }

    fn enqueue_batch(&self, jobs: Vec<Box<dyn Job>>) -> Result<()> {
        if jobs.is_empty() {
            return Ok(());
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(unavailable());
        }
        let count = jobs.len();
        let mut first: *mut Node = ptr::null_mut();
        let mut prev: *mut Node = ptr::null_mut();
        for job in jobs {
            let node = nodepool::acquire_with_job(job);
            if first.is_null() {
                first = node;
            } else {
                unsafe { (*prev).next.store(node, Ordering::Relaxed) };
            }
            prev = node;
        }
        self.push_chain(first, prev, count)
    }

    fn dequeue(&self, timeout: Option<Duration>) -> Result<Box<dyn Job>> {
        let deadline = timeout.map(|d| Instant::now() + d);
        let backoff = Backoff::new();

        loop {
            if let Some(job) = self.try_pop() {
                return Ok(job);
            }
            if self.closed.load(Ordering::Acquire) {
                // One last check: a racing enqueue may have landed between
                // our pop attempt and the closed check.
                if let Some(job) = self.try_pop() {
                    return Ok(job);
                }
                return Err(unavailable());
            }

            if !backoff.is_completed() {
                backoff.snooze();
                continue;
            }

            let remaining = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Err(timed_out());
                    }
                    Some(d - now)
                }
                None => None,
            };

            let mut guard = self.park_lock.lock();
            if let Some(job) = self.try_pop() {
                return Ok(job);
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(unavailable());
            }
            match remaining {
                Some(r) => {
                    self.park_cv.wait_for(&mut guard, r);
                }
                None => {
                    self.park_cv.wait(&mut guard);
                }
            }
            drop(guard);
            backoff.reset();
        }
    }

    fn try_dequeue(&self) -> TryDequeue {
        match self.try_pop() {
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
        self.closed.store(true, Ordering::SeqCst);
        self.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn size(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }
}

impl LockFreeJobQueue {
    /// Drains every pending job in FIFO order, for migration into another
    /// strategy during an adaptive switch (spec §4.3.3). Does not close
    /// the queue.
    pub fn drain_all(&self) -> Vec<Box<dyn Job>> {
        let mut drained = Vec::new();
        while let Some(job) = self.try_pop() {
            drained.push(job);
        }
        drained
    }
}

impl Drop for LockFreeJobQueue {
    fn drop(&mut self) {
        let mut current = *self.head.get_mut();
        while !current.is_null() {
            let next = unsafe { (*current).next.load(Ordering::Relaxed) };
            let data = unsafe { (*current).data.swap(ptr::null_mut(), Ordering::Relaxed) };
            if !data.is_null() {
                drop(unsafe { Box::from_raw(data) });
            }
            drop(unsafe { Box::from_raw(current) });
            current = next;
        }
    }
}
