//! A process-wide hazard-pointer directory (spec §4.3.2, §5 "Hazard-pointer
//! slots are thread-local with a global directory; reclamation batches are
//! process-wide").
//!
//! This module is deliberately untyped at the storage layer: slots hold
//! type-erased `*mut ()` and retirement carries its own reclaim closure, so
//! a single [`HazardDomain`] can protect nodes for every lock-free queue in
//! the process rather than one directory per queue instance.

use parking_lot::{Mutex, RwLock};
use std::cell::RefCell;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

/// Hazard slots published per participating thread. Two slots are enough
/// for a Michael–Scott queue traversal (the node currently read as `head`,
/// and the node read as `head`'s `next`).
pub const HAZARDS_PER_THREAD: usize = 2;

/// Retired-list reclamation runs once the list exceeds
/// `registered_threads * HAZARDS_PER_THREAD * RECLAIM_BATCH_FACTOR`,
/// i.e. a threshold proportional to the number of hazard slots in play.
const RECLAIM_BATCH_FACTOR: usize = 2;

struct ThreadRecord {
    slots: [AtomicPtr<()>; HAZARDS_PER_THREAD],
}

impl ThreadRecord {
    fn new() -> Self {
        ThreadRecord {
            slots: [
                AtomicPtr::new(ptr::null_mut()),
                AtomicPtr::new(ptr::null_mut()),
            ],
        }
    }

    fn holds(&self, target: *mut ()) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.load(Ordering::Acquire) == target)
    }
}

struct Retired {
    ptr: *mut (),
    reclaim: Box<dyn FnOnce(*mut ()) + Send>,
}

// SAFETY: `ptr` is an opaque handle only ever dereferenced by `reclaim`,
// which fully owns the pointee's type information; the `Retired` entry
// itself does not expose access to it.
unsafe impl Send for Retired {}

/// A published hazard pointer. Clearing (on drop, or explicitly) makes the
/// protected node eligible for reclamation again.
pub struct HazardPointer {
    record: Arc<ThreadRecord>,
    index: usize,
}

impl HazardPointer {
    /// Publishes `ptr` as protected. Callers must re-validate that the
    /// value they intend to dereference is still current after this call
    /// returns (the classic hazard-pointer publish/re-read/validate
    /// protocol), since publication alone does not prevent a concurrent
    /// unlink, only a concurrent *reclamation* of an already-unlinked node.
    pub fn protect<T>(&self, ptr: *mut T) {
        self.record.slots[self.index].store(ptr as *mut (), Ordering::Release);
    }

    pub fn clear(&self) {
        self.record.slots[self.index].store(ptr::null_mut(), Ordering::Release);
    }
}

impl Drop for HazardPointer {
    fn drop(&mut self) {
        self.clear();
    }
}

/// The process-wide hazard-pointer + retired-node directory.
pub struct HazardDomain {
    threads: RwLock<Vec<Arc<ThreadRecord>>>,
    retired: Mutex<Vec<Retired>>,
}

impl Default for HazardDomain {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    static LOCAL_RECORD: RefCell<Option<Arc<ThreadRecord>>> = const { RefCell::new(None) };
}

impl HazardDomain {
    pub fn new() -> Self {
        HazardDomain {
            threads: RwLock::new(Vec::new()),
            retired: Mutex::new(Vec::new()),
        }
    }

    fn local_record(&self) -> Arc<ThreadRecord> {
        LOCAL_RECORD.with(|cell| {
            if let Some(existing) = cell.borrow().as_ref() {
                return existing.clone();
            }
            let record = Arc::new(ThreadRecord::new());
            self.threads.write().push(record.clone());
            *cell.borrow_mut() = Some(record.clone());
            record
        })
    }

    /// Acquires hazard slot `index` (`0..HAZARDS_PER_THREAD`) for the
    /// calling thread, registering the thread with the directory on first
    /// use.
    pub fn acquire(&self, index: usize) -> HazardPointer {
        debug_assert!(index < HAZARDS_PER_THREAD);
        HazardPointer {
            record: self.local_record(),
            index,
        }
    }

    /// `true` if any currently-published hazard pointer protects `ptr`.
    pub fn is_protected<T>(&self, ptr: *mut T) -> bool {
        if ptr.is_null() {
            return false;
        }
        let target = ptr as *mut ();
        self.threads.read().iter().any(|rec| rec.holds(target))
    }

    /// Retires `ptr`, invoking `reclaim` once no thread's hazard pointer
    /// protects it. Reclamation may happen immediately on this call (if the
    /// retired-list threshold is hit) or be deferred to a later retire call
    /// by another thread (spec invariant 6: a node is never reused while
    /// hazarded).
    pub fn retire<T, F>(&self, ptr: *mut T, reclaim: F)
    where
        T: 'static,
        F: FnOnce(*mut ()) + Send + 'static,
    {
        let erased = ptr as *mut ();
        let mut retired = self.retired.lock();
        retired.push(Retired {
            ptr: erased,
            reclaim: Box::new(reclaim),
        });

        let registered = self.threads.read().len().max(1);
        let threshold = registered * HAZARDS_PER_THREAD * RECLAIM_BATCH_FACTOR;
        if retired.len() >= threshold {
            self.reclaim_batch(&mut retired);
        }
    }

    fn reclaim_batch(&self, retired: &mut Vec<Retired>) {
        let threads = self.threads.read();
        let mut still_hazarded = Vec::new();
        for entry in retired.drain(..) {
            if threads.iter().any(|rec| rec.holds(entry.ptr)) {
                still_hazarded.push(entry);
            } else {
                (entry.reclaim)(entry.ptr);
            }
        }
        *retired = still_hazarded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc as StdArc;

    #[test]
    fn retire_without_hazard_reclaims_eventually() {
        let domain = HazardDomain::new();
        let reclaimed = StdArc::new(AtomicUsize::new(0));
        // Push enough retirements to cross the (single-thread) threshold.
        for _ in 0..(HAZARDS_PER_THREAD * RECLAIM_BATCH_FACTOR + 1) {
            let reclaimed = reclaimed.clone();
            let boxed: *mut u32 = Box::into_raw(Box::new(0u32));
            domain.retire(boxed, move |p| {
                reclaimed.fetch_add(1, Ordering::SeqCst);
                drop(unsafe { Box::from_raw(p as *mut u32) });
            });
        }
        assert!(reclaimed.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn protected_node_is_not_reclaimed() {
        let domain = HazardDomain::new();
        let boxed: *mut u32 = Box::into_raw(Box::new(42u32));
        let hp = domain.acquire(0);
        hp.protect(boxed);

        let reclaimed = StdArc::new(AtomicUsize::new(0));
        for _ in 0..(HAZARDS_PER_THREAD * RECLAIM_BATCH_FACTOR + 2) {
            let reclaimed = reclaimed.clone();
            let other: *mut u32 = Box::into_raw(Box::new(0u32));
            domain.retire(other, move |p| {
                reclaimed.fetch_add(1, Ordering::SeqCst);
                drop(unsafe { Box::from_raw(p as *mut u32) });
            });
        }
        assert!(domain.is_protected(boxed));
        drop(hp);
        drop(unsafe { Box::from_raw(boxed) });
    }
}
