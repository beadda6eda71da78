// Wait queue for the multi-mode latch.
//
// The spec describes a lock-free singly-linked list of wait nodes with a
// back-pointer used only to splice out cancelled entries. That shape is a
// correctness minefield to hand-roll without a toolchain to validate it
// against. The Design Notes explicitly sanction a "standard parking-lot
// style intrusive queue" instead, provided FIFO-per-mode, removable timed
// waiters, and fair handoff are preserved — this is that substitute: a
// `Mutex`-guarded `VecDeque` of waiter tickets.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};

use parking_lot::Mutex;

/// Which mode a parked thread is waiting to acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    Shared,
    Exclusive,
}

/// One parked thread's ticket in a latch's wait queue.
///
/// Ownership transfer and the state word update happen together, under the
/// same atomic step, in the releaser before the waiting thread is unparked
/// (see `Latch::drain_to_exclusive_or_clear`/`release_exclusive`). That
/// ordering is what lets `is_granted` be trusted without a separate "denied"
/// signal: by the time a parked thread observes `granted`, the state word
/// already reflects its ownership, so there is no window in which a barging
/// thread could have raced it for the same slot.
#[derive(Debug)]
pub struct Waiter {
    thread: Thread,
    pub mode: WaitMode,
    granted: AtomicBool,
}

impl Waiter {
    fn new(mode: WaitMode) -> Arc<Self> {
        Arc::new(Self {
            thread: thread::current(),
            mode,
            granted: AtomicBool::new(false),
        })
    }

    pub fn is_granted(&self) -> bool {
        self.granted.load(Ordering::Acquire)
    }

    fn grant_and_unpark(&self) {
        self.granted.store(true, Ordering::Release);
        self.thread.unpark();
    }
}

/// FIFO queue of parked latch waiters, partitioned by mode so the latch can
/// wake "a contiguous prefix of shared waiters" or a single exclusive
/// waiter without scanning past the boundary it cares about.
#[derive(Default, Debug)]
pub struct WaitQueue {
    waiters: Mutex<VecDeque<Arc<Waiter>>>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self {
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }

    pub fn front_mode(&self) -> Option<WaitMode> {
        self.waiters.lock().front().map(|w| w.mode)
    }

    /// Enqueues a new waiter for the calling thread and returns its ticket.
    pub fn enqueue(&self, mode: WaitMode) -> Arc<Waiter> {
        let waiter = Waiter::new(mode);
        self.waiters.lock().push_back(waiter.clone());
        waiter
    }

    /// Removes a specific waiter (used on timeout/cancellation). Returns
    /// true if it was still queued, false if a releaser already popped it
    /// (in which case the caller must honor the grant rather than return
    /// a timeout).
    pub fn remove(&self, waiter: &Arc<Waiter>) -> bool {
        let mut q = self.waiters.lock();
        if let Some(pos) = q.iter().position(|w| Arc::ptr_eq(w, waiter)) {
            q.remove(pos);
            true
        } else {
            false
        }
    }

    /// Pops and hands off to the head waiter, whatever its mode. Used by
    /// `releaseExclusive` to transfer ownership fairly to the next waiter
    /// in FIFO order.
    pub fn pop_and_grant(&self) -> Option<Arc<Waiter>> {
        let mut q = self.waiters.lock();
        let waiter = q.pop_front()?;
        drop(q);
        waiter.grant_and_unpark();
        Some(waiter)
    }

    /// Pops a contiguous prefix of `Shared` waiters from the front (stopping
    /// at the first `Exclusive` waiter or an empty queue) and hands off to
    /// all of them. Used by `downgrade` and by shared-only release wakeups.
    ///
    /// Returns the number of waiters granted.
    pub fn pop_and_grant_shared_prefix(&self) -> usize {
        let mut granted = Vec::new();
        {
            let mut q = self.waiters.lock();
            while let Some(front) = q.front() {
                if front.mode != WaitMode::Shared {
                    break;
                }
                granted.push(q.pop_front().unwrap());
            }
        }
        let count = granted.len();
        for w in granted {
            w.grant_and_unpark();
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_preserved() {
        let q = WaitQueue::new();
        let _a = q.enqueue(WaitMode::Shared);
        let _b = q.enqueue(WaitMode::Exclusive);
        assert_eq!(q.front_mode(), Some(WaitMode::Shared));
    }

    #[test]
    fn remove_absent_waiter_returns_false() {
        let q = WaitQueue::new();
        let a = q.enqueue(WaitMode::Shared);
        assert!(q.remove(&a));
        assert!(!q.remove(&a));
    }

    #[test]
    fn shared_prefix_stops_at_exclusive() {
        let q = WaitQueue::new();
        let _a = q.enqueue(WaitMode::Shared);
        let _b = q.enqueue(WaitMode::Shared);
        let _c = q.enqueue(WaitMode::Exclusive);
        let _d = q.enqueue(WaitMode::Shared);
        let granted = q.pop_and_grant_shared_prefix();
        assert_eq!(granted, 2);
        assert_eq!(q.front_mode(), Some(WaitMode::Exclusive));
    }
}
