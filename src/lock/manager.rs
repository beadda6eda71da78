//! [`LockManager`]: the sharded entry point surfaced to the rest of the
//! storage engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::common::{available_parallelism, DefaultKeyHasher, IndexId, KeyHasher, LockerId};

use super::deadlock::DeadlockDetector;
use super::error::LockError;
use super::pending::PendingTxn;
use super::record::LockKey;
use super::shard::{LockShard, TryOutcome};
use super::types::{LockMode, LockResult, UpgradeRule};

/// Construction-time knobs for a [`LockManager`].
///
/// Mirrors the reference design's constructor parameters; there is no
/// separate builder type since every field has a sensible default and the
/// set is small.
pub struct LockManagerConfig {
    /// Shard count; rounded up to the next power of two. Defaults to
    /// `cores * 4`.
    pub shard_count: usize,
    pub upgrade_rule: UpgradeRule,
    pub key_hasher: Arc<dyn KeyHasher>,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            shard_count: (available_parallelism() * 4).next_power_of_two(),
            upgrade_rule: UpgradeRule::Strict,
            key_hasher: Arc::new(DefaultKeyHasher),
        }
    }
}

pub struct LockManager {
    shards: Vec<LockShard>,
    shard_mask: usize,
    key_hasher: Arc<dyn KeyHasher>,
    /// `locker_id -> key it is currently parked on`, consulted only by the
    /// deadlock detector. This is the transient substitute for the
    /// reference design's `Locker.waitingFor` field: rather than reaching
    /// into each `Locker` (which is `Send` but not `Sync`, and may live on
    /// a thread the detector does not own), every waiter publishes its
    /// target here for the duration of the wait.
    waiting_for: Mutex<HashMap<LockerId, LockKey>>,
}

impl LockManager {
    pub fn new(config: LockManagerConfig) -> Self {
        let shard_count = config.shard_count.next_power_of_two().max(1);
        let shards = (0..shard_count)
            .map(|_| LockShard::new(config.upgrade_rule))
            .collect();
        Self {
            shards,
            shard_mask: shard_count - 1,
            key_hasher: config.key_hasher,
            waiting_for: Mutex::new(HashMap::new()),
        }
    }

    fn shard_for(&self, index_id: IndexId, key: &[u8]) -> &LockShard {
        let hash = self.key_hasher.hash_key(index_id, key) as usize;
        &self.shards[hash & self.shard_mask]
    }

    fn shard_for_key(&self, key: &LockKey) -> &LockShard {
        self.shard_for(key.index_id, &key.key)
    }

    pub(crate) fn holders_of(&self, key: &LockKey) -> Vec<LockerId> {
        self.shard_for_key(key).holders_of(key)
    }

    pub(crate) fn waiting_target_of(&self, locker_id: LockerId) -> Option<LockKey> {
        self.waiting_for.lock().get(&locker_id).cloned()
    }

    pub fn check(&self, locker_id: LockerId, index_id: IndexId, key: &[u8]) -> LockResult {
        let lock_key = LockKey::new(index_id, key);
        self.shard_for_key(&lock_key).check(locker_id, &lock_key)
    }

    pub fn try_lock_shared(
        &self,
        locker_id: LockerId,
        index_id: IndexId,
        key: &[u8],
        timeout: Duration,
    ) -> Result<LockResult, LockError> {
        self.request(locker_id, index_id, key, LockMode::Shared, timeout)
    }

    pub fn try_lock_upgradable(
        &self,
        locker_id: LockerId,
        index_id: IndexId,
        key: &[u8],
        timeout: Duration,
    ) -> Result<LockResult, LockError> {
        self.request(locker_id, index_id, key, LockMode::Upgradable, timeout)
    }

    pub fn try_lock_exclusive(
        &self,
        locker_id: LockerId,
        index_id: IndexId,
        key: &[u8],
        timeout: Duration,
    ) -> Result<LockResult, LockError> {
        self.request(locker_id, index_id, key, LockMode::Exclusive, timeout)
    }

    /// Blocking acquire with no timeout.
    pub fn lock_shared(
        &self,
        locker_id: LockerId,
        index_id: IndexId,
        key: &[u8],
    ) -> Result<LockResult, LockError> {
        self.try_lock_shared(locker_id, index_id, key, Duration::MAX)
    }

    pub fn lock_upgradable(
        &self,
        locker_id: LockerId,
        index_id: IndexId,
        key: &[u8],
    ) -> Result<LockResult, LockError> {
        self.try_lock_upgradable(locker_id, index_id, key, Duration::MAX)
    }

    pub fn lock_exclusive(
        &self,
        locker_id: LockerId,
        index_id: IndexId,
        key: &[u8],
    ) -> Result<LockResult, LockError> {
        self.try_lock_exclusive(locker_id, index_id, key, Duration::MAX)
    }

    fn request(
        &self,
        locker_id: LockerId,
        index_id: IndexId,
        key: &[u8],
        mode: LockMode,
        timeout: Duration,
    ) -> Result<LockResult, LockError> {
        let lock_key = LockKey::new(index_id, key);
        let shard = self.shard_for_key(&lock_key);
        let deadline = if timeout == Duration::MAX {
            None
        } else {
            Instant::now().checked_add(timeout)
        };

        let waiter = match shard.try_request(locker_id, &lock_key, mode) {
            TryOutcome::Done(result) => return Ok(result),
            TryOutcome::Illegal => return Err(LockError::IllegalUpgrade(locker_id)),
            TryOutcome::Queued(waiter) => waiter,
        };

        self.waiting_for
            .lock()
            .insert(locker_id, lock_key.clone());
        let outcome = loop {
            if waiter.is_granted() {
                break Ok(LockResult::Acquired);
            }
            match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        if shard.cancel_wait(&lock_key, &waiter) {
                            if let Some(participants) =
                                DeadlockDetector::new(self).find_cycle(locker_id, &lock_key)
                            {
                                warn!(
                                    locker = locker_id,
                                    ?participants,
                                    "deadlock detected while waiting for lock"
                                );
                                break Err(LockError::Deadlock {
                                    guilty: locker_id,
                                    participants,
                                });
                            }
                            debug!(locker = locker_id, "lock wait timed out");
                            break Err(LockError::TimedOut(timeout));
                        }
                        break Ok(LockResult::Acquired);
                    }
                    thread::park_timeout(d - now);
                }
                None => thread::park(),
            }
        };
        self.waiting_for.lock().remove(&locker_id);
        outcome
    }

    pub fn unlock(&self, locker_id: LockerId, index_id: IndexId, key: &[u8]) -> Result<(), LockError> {
        let lock_key = LockKey::new(index_id, key);
        self.shard_for_key(&lock_key).unlock(locker_id, &lock_key)
    }

    pub fn unlock_to_shared(
        &self,
        locker_id: LockerId,
        index_id: IndexId,
        key: &[u8],
    ) -> Result<(), LockError> {
        let lock_key = LockKey::new(index_id, key);
        self.shard_for_key(&lock_key)
            .unlock_to_shared(locker_id, &lock_key)
    }

    pub fn unlock_to_upgradable(
        &self,
        locker_id: LockerId,
        index_id: IndexId,
        key: &[u8],
    ) -> Result<(), LockError> {
        let lock_key = LockKey::new(index_id, key);
        self.shard_for_key(&lock_key)
            .unlock_to_upgradable(locker_id, &lock_key)
    }

    /// Hands off every exclusive hold recorded in `pending` to the pending
    /// transaction's identity, without touching any wait queue. See
    /// [`crate::lock::locker::Locker::transfer_exclusive`].
    pub fn transfer_exclusive(&self, pending: &PendingTxn) {
        for lock_key in pending.keys() {
            self.shard_for_key(lock_key)
                .transfer_exclusive(pending.from(), pending.id(), lock_key);
        }
    }
}
