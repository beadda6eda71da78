//! The per-key `Lock` record and its FIFO wait queue.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};

use crate::common::{IndexId, LockerId};

use super::types::LockMode;

/// Identifies a single lockable key within an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub index_id: IndexId,
    pub key: Box<[u8]>,
}

impl LockKey {
    pub fn new(index_id: IndexId, key: &[u8]) -> Self {
        Self {
            index_id,
            key: key.into(),
        }
    }
}

/// One parked request in a [`Lock`]'s wait queue.
pub struct LockWaiter {
    pub locker_id: LockerId,
    pub mode: LockMode,
    thread: Thread,
    granted: AtomicBool,
}

impl LockWaiter {
    fn new(locker_id: LockerId, mode: LockMode) -> Arc<Self> {
        Arc::new(Self {
            locker_id,
            mode,
            thread: thread::current(),
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

/// State for one key: who owns it, in what mode, and who is waiting.
///
/// Every field here is mutated only while the owning [`LockShard`]'s latch
/// is held — there is no internal synchronization on `Lock` itself.
///
/// [`LockShard`]: super::shard::LockShard
#[derive(Default)]
pub struct Lock {
    /// Holder of `Upgradable` or `Exclusive`, if any.
    pub owner: Option<LockerId>,
    /// `true` iff `owner` holds `Exclusive` rather than `Upgradable`.
    pub owner_exclusive: bool,
    /// Every locker currently holding `Shared`.
    pub shared_owners: HashSet<LockerId>,
    /// Set once at least one exclusive request is queued; new shared
    /// requests must queue behind it rather than barging ahead.
    pub exclusive_wait: bool,
    wait_queue: VecDeque<Arc<LockWaiter>>,
}

impl Lock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared_count(&self) -> usize {
        self.shared_owners.len()
    }

    pub fn is_free(&self) -> bool {
        self.owner.is_none() && self.shared_owners.is_empty()
    }

    pub fn is_unreferenced(&self) -> bool {
        self.is_free() && self.wait_queue.is_empty()
    }

    pub fn enqueue(&mut self, locker_id: LockerId, mode: LockMode) -> Arc<LockWaiter> {
        if mode == LockMode::Exclusive {
            self.exclusive_wait = true;
        }
        let waiter = LockWaiter::new(locker_id, mode);
        self.wait_queue.push_back(waiter.clone());
        waiter
    }

    /// Removes a specific waiter (timeout/interrupt path). Returns `true`
    /// if it was still queued; `false` means a releaser already granted it.
    pub fn remove_waiter(&mut self, waiter: &Arc<LockWaiter>) -> bool {
        if let Some(pos) = self.wait_queue.iter().position(|w| Arc::ptr_eq(w, waiter)) {
            self.wait_queue.remove(pos);
            if !self.wait_queue.iter().any(|w| w.mode == LockMode::Exclusive) {
                self.exclusive_wait = false;
            }
            true
        } else {
            false
        }
    }

    pub fn has_queued_exclusive(&self) -> bool {
        self.wait_queue
            .iter()
            .any(|w| w.mode == LockMode::Exclusive)
    }

    /// Wakes whichever prefix of the queue the current state now permits:
    /// a single exclusive waiter if the lock is fully free, otherwise every
    /// contiguous `Shared`/`Upgradable` waiter the current state admits.
    ///
    /// Mutates `owner`/`shared_owners` on the caller's behalf to reflect
    /// each grant before unparking it, exactly as `release_exclusive` does
    /// for [`crate::latch::Latch`].
    pub fn wake_after_release(&mut self) {
        loop {
            let Some(front) = self.wait_queue.front().cloned() else {
                self.exclusive_wait = false;
                return;
            };
            match front.mode {
                LockMode::Exclusive => {
                    if !self.is_free() {
                        return;
                    }
                    self.wait_queue.pop_front();
                    self.owner = Some(front.locker_id);
                    self.owner_exclusive = true;
                    self.exclusive_wait = self.has_queued_exclusive();
                    front.grant_and_unpark();
                    return;
                }
                LockMode::Upgradable => {
                    if self.owner.is_some() {
                        return;
                    }
                    self.wait_queue.pop_front();
                    self.shared_owners.remove(&front.locker_id);
                    self.owner = Some(front.locker_id);
                    self.owner_exclusive = false;
                    front.grant_and_unpark();
                    // Upgradable does not block further shared grants.
                    continue;
                }
                LockMode::Shared => {
                    if self.owner_exclusive {
                        return;
                    }
                    self.wait_queue.pop_front();
                    self.shared_owners.insert(front.locker_id);
                    front.grant_and_unpark();
                    continue;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_lock_is_unreferenced() {
        let lock = Lock::new();
        assert!(lock.is_unreferenced());
    }

    #[test]
    fn enqueue_exclusive_sets_wait_flag() {
        let mut lock = Lock::new();
        lock.shared_owners.insert(1);
        let w = lock.enqueue(2, LockMode::Exclusive);
        assert!(lock.exclusive_wait);
        assert!(lock.remove_waiter(&w));
        assert!(!lock.exclusive_wait);
    }
}
