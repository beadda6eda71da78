// Reader-majority gate tuned for "many readers, rare writer" traffic, used
// by the checkpoint subsystem to pause readers during a structural remap.
//
// Readers on the fast path never touch the inner `Latch` at all — they only
// bump a pair of split counters — so the only thing an exclusive acquirer
// can do to observe quiescence is poll `sharedAcquire.sum() ==
// sharedRelease.sum()`. The poll is a `park_timeout` with exponential
// backoff rather than a busy spin, and the shared release path unparks it
// early when the counts already line up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, Thread, ThreadId};
use std::time::Duration;

use crossbeam::utils::CachePadded;
use parking_lot::Mutex;

use crate::latch::Latch;

const INITIAL_BACKOFF: Duration = Duration::from_micros(1);
const MAX_BACKOFF: Duration = Duration::from_millis(10);

thread_local! {
    static REENTRANCY: std::cell::RefCell<std::collections::HashMap<usize, u32>> =
        std::cell::RefCell::new(std::collections::HashMap::new());
}

/// Reader-majority gate built from a [`Latch`] plus split counters.
pub struct CommitLatch {
    shared_acquire: CachePadded<AtomicU64>,
    shared_release: CachePadded<AtomicU64>,
    inner: Latch,
    exclusive_owner: Mutex<Option<ThreadId>>,
    exclusive_waiter: Mutex<Option<Thread>>,
}

impl Default for CommitLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl CommitLatch {
    pub fn new() -> Self {
        Self {
            shared_acquire: CachePadded::new(AtomicU64::new(0)),
            shared_release: CachePadded::new(AtomicU64::new(0)),
            inner: Latch::new(),
            exclusive_owner: Mutex::new(None),
            exclusive_waiter: Mutex::new(None),
        }
    }

    fn identity(&self) -> usize {
        self as *const Self as usize
    }

    fn local_reentrancy(&self) -> u32 {
        let id = self.identity();
        REENTRANCY.with(|m| *m.borrow().get(&id).unwrap_or(&0))
    }

    fn bump_reentrancy(&self, delta: i64) {
        let id = self.identity();
        REENTRANCY.with(|m| {
            let mut map = m.borrow_mut();
            let count = map.entry(id).or_insert(0);
            *count = (*count as i64 + delta).max(0) as u32;
            if *count == 0 {
                map.remove(&id);
            }
        });
    }

    /// `true` once every acquired shared hold has been released.
    pub fn has_shared_lockers(&self) -> bool {
        self.shared_acquire.load(Ordering::Acquire) != self.shared_release.load(Ordering::Acquire)
    }

    /// Acquires the gate in shared mode. On the fast path (no exclusive
    /// holder/acquirer, or the calling thread is already reentrant) this is
    /// a single counter increment; otherwise it rendezvous briefly with the
    /// inner latch so a racing exclusive acquirer is guaranteed to observe
    /// the new reader before declaring quiescence.
    pub fn acquire_shared(&self) -> CommitSharedGuard<'_> {
        let reentrant = self.local_reentrancy() > 0;
        if !reentrant && self.exclusive_owner.lock().is_some() {
            let _rendezvous = self.inner.acquire_shared();
            self.shared_acquire.fetch_add(1, Ordering::AcqRel);
        } else {
            self.shared_acquire.fetch_add(1, Ordering::AcqRel);
        }
        self.bump_reentrancy(1);
        CommitSharedGuard { latch: self }
    }

    fn release_shared(&self) {
        self.shared_release.fetch_add(1, Ordering::AcqRel);
        if self.exclusive_owner.lock().is_some() && !self.has_shared_lockers() {
            if let Some(thread) = self.exclusive_waiter.lock().clone() {
                thread.unpark();
            }
        }
        self.bump_reentrancy(-1);
    }

    /// Acquires the gate exclusively. Blocks out new non-reentrant readers
    /// immediately (via the inner latch), then waits for in-flight readers
    /// to drain with exponentially increasing park timeouts.
    pub fn acquire_exclusive(&self) -> CommitExclusiveGuard<'_> {
        let inner_guard = self.inner.acquire_exclusive();
        *self.exclusive_owner.lock() = Some(thread::current().id());
        *self.exclusive_waiter.lock() = Some(thread::current());

        let mut backoff = INITIAL_BACKOFF;
        while self.has_shared_lockers() {
            thread::park_timeout(backoff);
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }

        *self.exclusive_waiter.lock() = None;
        CommitExclusiveGuard {
            latch: self,
            _inner: inner_guard,
        }
    }

    fn release_exclusive(&self) {
        *self.exclusive_owner.lock() = None;
    }
}

pub struct CommitSharedGuard<'a> {
    latch: &'a CommitLatch,
}

impl Drop for CommitSharedGuard<'_> {
    fn drop(&mut self) {
        self.latch.release_shared();
    }
}

pub struct CommitExclusiveGuard<'a> {
    latch: &'a CommitLatch,
    _inner: crate::latch::ExclusiveLatchGuard<'a>,
}

impl Drop for CommitExclusiveGuard<'_> {
    fn drop(&mut self) {
        self.latch.release_exclusive();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn shared_guards_balance_counters() {
        let latch = CommitLatch::new();
        let a = latch.acquire_shared();
        let b = latch.acquire_shared();
        assert!(latch.has_shared_lockers());
        drop(a);
        assert!(latch.has_shared_lockers());
        drop(b);
        assert!(!latch.has_shared_lockers());
    }

    #[test]
    fn reentrant_shared_acquire_on_same_thread_does_not_block() {
        let latch = CommitLatch::new();
        let _a = latch.acquire_shared();
        let _b = latch.acquire_shared();
    }

    #[test]
    fn exclusive_acquire_waits_for_readers_to_drain() {
        let latch = Arc::new(CommitLatch::new());
        let reader = latch.acquire_shared();

        let l2 = latch.clone();
        let writer = thread::spawn(move || {
            let _g = l2.acquire_exclusive();
        });

        thread::sleep(Duration::from_millis(20));
        drop(reader);
        writer.join().unwrap();
    }

    #[test]
    fn many_readers_and_one_writer_eventually_all_complete() {
        let latch = Arc::new(CommitLatch::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let l = latch.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    let _g = l.acquire_shared();
                    thread::yield_now();
                }
            }));
        }
        let l2 = latch.clone();
        let writer = thread::spawn(move || {
            let _g = l2.acquire_exclusive();
        });
        for h in handles {
            h.join().unwrap();
        }
        writer.join().unwrap();
        assert!(!latch.has_shared_lockers());
    }
}
