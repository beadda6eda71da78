//! [`PendingTxn`]: the placeholder identity exclusive locks are handed to
//! when a locker commits asynchronously and can't stick around to release
//! them itself.

use crate::common::LockerId;

use super::manager::LockManager;
use super::record::LockKey;

/// Holds the exclusive locks transferred out of a [`Locker`](super::locker::Locker)
/// at `transferExclusive` time, until the surrounding engine calls
/// [`PendingTxn::release`] once the async commit actually completes.
pub struct PendingTxn {
    id: LockerId,
    from: LockerId,
    keys: Vec<LockKey>,
}

impl PendingTxn {
    pub(crate) fn new(id: LockerId, from: LockerId, keys: Vec<LockKey>) -> Self {
        Self { id, from, keys }
    }

    pub fn id(&self) -> LockerId {
        self.id
    }

    pub(crate) fn from(&self) -> LockerId {
        self.from
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &LockKey> {
        self.keys.iter()
    }

    /// Releases every transferred lock. Consumes `self` — a `PendingTxn`
    /// is single-use, mirroring the one-shot handoff `transferExclusive`
    /// describes.
    pub fn release(self, manager: &LockManager) {
        for key in &self.keys {
            let _ = manager.unlock(self.id, key.index_id, &key.key);
        }
    }
}
