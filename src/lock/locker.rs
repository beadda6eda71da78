//! [`Locker`]: a transaction's scoped view onto the [`LockManager`].

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::common::{IndexId, LockerId};

use super::error::LockError;
use super::manager::LockManager;
use super::pending::PendingTxn;
use super::record::LockKey;
use super::stack::{LockStack, StackEntry};
use super::types::{LockMode, LockResult};

/// A transaction's per-thread handle onto the lock manager.
///
/// Not thread-safe: exactly one thread may call methods on a given
/// `Locker` at a time (the stack has no internal synchronization). A
/// `Locker` may be handed off between threads as long as the caller
/// establishes a happens-before edge, which is why it is `Send` but
/// deliberately not `Sync` — the `UnsafeCell` marker below exists purely
/// to opt out of the auto-derived `Sync` impl.
pub struct Locker {
    id: LockerId,
    manager: Arc<LockManager>,
    stack: LockStack,
    frames: Vec<usize>,
    _not_sync: PhantomData<UnsafeCell<()>>,
}

impl Locker {
    pub fn new(id: LockerId, manager: Arc<LockManager>) -> Self {
        Self {
            id,
            manager,
            stack: LockStack::new(),
            frames: Vec::new(),
            _not_sync: PhantomData,
        }
    }

    pub fn id(&self) -> LockerId {
        self.id
    }

    pub fn nesting_level(&self) -> usize {
        self.frames.len()
    }

    pub fn is_nested(&self) -> bool {
        !self.frames.is_empty()
    }

    pub fn last_locked_index(&self) -> Option<IndexId> {
        self.stack.top().map(|e| e.index_id)
    }

    pub fn last_locked_key(&self) -> Option<&[u8]> {
        self.stack.top().map(|e| &*e.key)
    }

    fn scope_start(&self) -> usize {
        self.frames.last().copied().unwrap_or(0)
    }

    pub fn lock_shared(
        &mut self,
        index_id: IndexId,
        key: &[u8],
        timeout: Duration,
    ) -> Result<LockResult, LockError> {
        self.acquire(index_id, key, LockMode::Shared, timeout)
    }

    pub fn lock_upgradable(
        &mut self,
        index_id: IndexId,
        key: &[u8],
        timeout: Duration,
    ) -> Result<LockResult, LockError> {
        self.acquire(index_id, key, LockMode::Upgradable, timeout)
    }

    pub fn lock_exclusive(
        &mut self,
        index_id: IndexId,
        key: &[u8],
        timeout: Duration,
    ) -> Result<LockResult, LockError> {
        self.acquire(index_id, key, LockMode::Exclusive, timeout)
    }

    pub fn check(&self, index_id: IndexId, key: &[u8]) -> LockResult {
        self.manager.check(self.id, index_id, key)
    }

    fn acquire(
        &mut self,
        index_id: IndexId,
        key: &[u8],
        mode: LockMode,
        timeout: Duration,
    ) -> Result<LockResult, LockError> {
        let result = match mode {
            LockMode::Shared => self.manager.try_lock_shared(self.id, index_id, key, timeout),
            LockMode::Upgradable => {
                self.manager.try_lock_upgradable(self.id, index_id, key, timeout)
            }
            LockMode::Exclusive => {
                self.manager.try_lock_exclusive(self.id, index_id, key, timeout)
            }
        }?;
        self.record_push(index_id, key, mode, result);
        Ok(result)
    }

    /// Applies the stack push rules: suppress (and bump in place) if the
    /// top-of-stack entry is the same key acquired in this same scope,
    /// otherwise push a new entry, flagged with `demote_to` when it
    /// strengthens a mode already held from an earlier, still-open scope.
    fn record_push(&mut self, index_id: IndexId, key: &[u8], mode: LockMode, result: LockResult) {
        let scope_start = self.scope_start();
        let suppress = self.stack.len() > scope_start
            && self
                .stack
                .top()
                .is_some_and(|e| e.index_id == index_id && &*e.key == key);
        if suppress {
            if let Some(top) = self.stack.top_mut() {
                if mode > top.mode {
                    top.mode = mode;
                }
            }
            return;
        }
        let demote_to = match result {
            LockResult::Acquired => None,
            _ => self.stack.find_mode(index_id, key),
        };
        self.stack.push(StackEntry {
            index_id,
            key: key.into(),
            mode,
            demote_to,
        });
    }

    fn release_entry(&self, entry: &StackEntry) -> Result<(), LockError> {
        match entry.demote_to {
            None => self.manager.unlock(self.id, entry.index_id, &entry.key),
            Some(LockMode::Shared) => {
                self.manager
                    .unlock_to_shared(self.id, entry.index_id, &entry.key)
            }
            Some(LockMode::Upgradable) => {
                self.manager
                    .unlock_to_upgradable(self.id, entry.index_id, &entry.key)
            }
            Some(LockMode::Exclusive) => {
                unreachable!("demote_to never targets Exclusive, the strongest mode")
            }
        }
    }

    /// Releases only the most recently pushed entry. Fails with
    /// [`LockError::ScopeMismatch`] if the stack top belongs to an
    /// enclosing scope, and with [`LockError::NonImmediateUpgrade`] if it
    /// represents a strengthening of an earlier hold rather than a fresh
    /// acquisition.
    pub fn unlock_last(&mut self) -> Result<(), LockError> {
        let scope_start = self.scope_start();
        if self.stack.len() <= scope_start {
            return Err(LockError::ScopeMismatch);
        }
        let top = self.stack.top().ok_or(LockError::ScopeMismatch)?;
        if top.demote_to.is_some() {
            return Err(LockError::NonImmediateUpgrade);
        }
        let entry = self.stack.pop().expect("checked non-empty above");
        self.manager.unlock(self.id, entry.index_id, &entry.key)
    }

    pub fn unlock_last_to_shared(&mut self) -> Result<(), LockError> {
        let scope_start = self.scope_start();
        if self.stack.len() <= scope_start {
            return Err(LockError::ScopeMismatch);
        }
        let top = self.stack.top_mut().ok_or(LockError::ScopeMismatch)?;
        let (index_id, key) = (top.index_id, top.key.clone());
        top.mode = LockMode::Shared;
        self.manager.unlock_to_shared(self.id, index_id, &key)
    }

    pub fn unlock_last_to_upgradable(&mut self) -> Result<(), LockError> {
        let scope_start = self.scope_start();
        if self.stack.len() <= scope_start {
            return Err(LockError::ScopeMismatch);
        }
        let top = self.stack.top_mut().ok_or(LockError::ScopeMismatch)?;
        let (index_id, key) = (top.index_id, top.key.clone());
        top.mode = LockMode::Upgradable;
        self.manager.unlock_to_upgradable(self.id, index_id, &key)
    }

    /// Opens a new nested scope; acquisitions made from here are unwound
    /// by the matching [`Locker::scope_exit`].
    pub fn scope_enter(&mut self) {
        self.frames.push(self.stack.len());
    }

    /// Folds the current scope's acquisitions into the enclosing one: a
    /// subsequent `scope_exit` on this same frame will no longer release
    /// them.
    pub fn promote(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            *frame = self.stack.len();
        }
    }

    /// Releases everything acquired since the matching `scope_enter` and
    /// pops the frame. The observable lock set afterward equals what it
    /// was at `scope_enter` time.
    pub fn scope_exit(&mut self) -> Result<(), LockError> {
        let Some(target_len) = self.frames.pop() else {
            return Ok(());
        };
        for entry in self.stack.truncate_to(target_len) {
            self.release_entry(&entry)?;
        }
        Ok(())
    }

    /// Unwinds every open scope, including the base scope.
    pub fn scope_exit_all(&mut self) -> Result<(), LockError> {
        while !self.frames.is_empty() {
            self.scope_exit()?;
        }
        for entry in self.stack.truncate_to(0) {
            self.release_entry(&entry)?;
        }
        Ok(())
    }

    /// Releases everything acquired in the current scope without popping
    /// its frame — the scope stays open and can acquire fresh locks.
    pub fn scope_unlock_all(&mut self) -> Result<(), LockError> {
        let target_len = self.scope_start();
        for entry in self.stack.truncate_to(target_len) {
            self.release_entry(&entry)?;
        }
        Ok(())
    }

    /// Hands off every exclusive hold in the current (top) scope to a new
    /// [`PendingTxn`] under `pending_id`, for the caller to schedule an
    /// eventual release once an asynchronous commit completes. Any
    /// non-exclusive entries in that scope are discarded from this
    /// locker's bookkeeping without being released — the caller must have
    /// already downgraded or released them before calling this.
    pub fn transfer_exclusive(&mut self, pending_id: LockerId) -> PendingTxn {
        let scope_start = self.scope_start();
        let popped = self.stack.truncate_to(scope_start);
        let keys = popped
            .into_iter()
            .filter(|e| e.mode == LockMode::Exclusive)
            .map(|e| LockKey::new(e.index_id, &e.key))
            .collect();
        let pending = PendingTxn::new(pending_id, self.id, keys);
        self.manager.transfer_exclusive(&pending);
        pending
    }

    /// Abandons this locker without releasing anything it holds. For use
    /// only on unrecoverable failure, where restoring lock-set invariants
    /// is impossible; the held locks leak deliberately.
    pub fn discard_all_locks(self) {}
}
