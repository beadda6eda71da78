//! One hash-bucket shard of the [`LockManager`](super::manager::LockManager).
//!
//! The reference design backs each shard with a hand-rolled power-of-two
//! open-chained hash table that resizes under the shard latch. A
//! `parking_lot::Mutex<HashMap<..>>` is the idiomatic substitute: every
//! shard operation in this design already takes the shard latch
//! exclusively ("lookups use exclusive mode for simplicity"), so nothing is
//! lost by letting `std`'s hash table manage its own load factor and
//! growth instead of reimplementing chaining by hand.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::common::LockerId;

use super::error::LockError;
use super::record::{Lock, LockKey, LockWaiter};
use super::types::{LockMode, LockResult, UpgradeRule};
use std::sync::Arc;

/// Immediate (non-waiting) outcome of a try-lock attempt against a shard.
pub enum TryOutcome {
    Done(LockResult),
    Illegal,
    /// The request was queued; the caller must park on the returned waiter.
    Queued(Arc<LockWaiter>),
}

pub struct LockShard {
    table: Mutex<HashMap<LockKey, Lock>>,
    upgrade_rule: UpgradeRule,
}

impl LockShard {
    pub fn new(upgrade_rule: UpgradeRule) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            upgrade_rule,
        }
    }

    pub fn check(&self, locker_id: LockerId, key: &LockKey) -> LockResult {
        let table = self.table.lock();
        let Some(lock) = table.get(key) else {
            return LockResult::Unowned;
        };
        if lock.owner == Some(locker_id) {
            return if lock.owner_exclusive {
                LockResult::OwnedExclusive
            } else {
                LockResult::OwnedUpgradable
            };
        }
        if lock.shared_owners.contains(&locker_id) {
            return LockResult::OwnedShared;
        }
        LockResult::Unowned
    }

    pub fn try_request(
        &self,
        locker_id: LockerId,
        key: &LockKey,
        mode: LockMode,
    ) -> TryOutcome {
        let mut table = self.table.lock();
        let lock = table.entry(key.clone()).or_insert_with(Lock::new);

        match mode {
            LockMode::Shared => {
                if lock.shared_owners.contains(&locker_id) {
                    return TryOutcome::Done(LockResult::OwnedShared);
                }
                if lock.owner == Some(locker_id) {
                    // Already holds upgradable/exclusive, which dominates shared.
                    return TryOutcome::Done(if lock.owner_exclusive {
                        LockResult::OwnedExclusive
                    } else {
                        LockResult::OwnedUpgradable
                    });
                }
                if !lock.owner_exclusive && !lock.exclusive_wait {
                    lock.shared_owners.insert(locker_id);
                    TryOutcome::Done(LockResult::Acquired)
                } else {
                    let waiter = lock.enqueue(locker_id, LockMode::Shared);
                    TryOutcome::Queued(waiter)
                }
            }
            LockMode::Upgradable => {
                if lock.owner == Some(locker_id) {
                    return TryOutcome::Done(if lock.owner_exclusive {
                        LockResult::OwnedExclusive
                    } else {
                        LockResult::OwnedUpgradable
                    });
                }
                if lock.shared_owners.contains(&locker_id) {
                    let permitted = match self.upgrade_rule {
                        UpgradeRule::Strict => false,
                        UpgradeRule::Lenient => lock.shared_count() == 1,
                        UpgradeRule::Unchecked => true,
                    };
                    if !permitted {
                        return TryOutcome::Illegal;
                    }
                    if lock.owner.is_none() {
                        lock.shared_owners.remove(&locker_id);
                        lock.owner = Some(locker_id);
                        lock.owner_exclusive = false;
                        return TryOutcome::Done(LockResult::Upgraded);
                    }
                    let waiter = lock.enqueue(locker_id, LockMode::Upgradable);
                    return TryOutcome::Queued(waiter);
                }
                if lock.owner.is_none() {
                    lock.owner = Some(locker_id);
                    lock.owner_exclusive = false;
                    TryOutcome::Done(LockResult::Acquired)
                } else {
                    let waiter = lock.enqueue(locker_id, LockMode::Upgradable);
                    TryOutcome::Queued(waiter)
                }
            }
            LockMode::Exclusive => {
                if lock.owner == Some(locker_id) {
                    if lock.owner_exclusive {
                        return TryOutcome::Done(LockResult::OwnedExclusive);
                    }
                    if lock.shared_count() == 0 {
                        lock.owner_exclusive = true;
                        return TryOutcome::Done(LockResult::Upgraded);
                    }
                    if lock.shared_count() == 1 && lock.shared_owners.contains(&locker_id) {
                        lock.shared_owners.remove(&locker_id);
                        lock.owner_exclusive = true;
                        return TryOutcome::Done(LockResult::Upgraded);
                    }
                    let waiter = lock.enqueue(locker_id, LockMode::Exclusive);
                    return TryOutcome::Queued(waiter);
                }
                if lock.is_free() {
                    lock.owner = Some(locker_id);
                    lock.owner_exclusive = true;
                    TryOutcome::Done(LockResult::Acquired)
                } else {
                    let waiter = lock.enqueue(locker_id, LockMode::Exclusive);
                    TryOutcome::Queued(waiter)
                }
            }
        }
    }

    /// Removes a timed-out or interrupted waiter. Returns `false` if a
    /// releaser already granted it (the caller must treat the lock as
    /// held rather than reporting failure).
    pub fn cancel_wait(&self, key: &LockKey, waiter: &Arc<LockWaiter>) -> bool {
        let mut table = self.table.lock();
        match table.get_mut(key) {
            Some(lock) => lock.remove_waiter(waiter),
            None => false,
        }
    }

    pub fn unlock(&self, locker_id: LockerId, key: &LockKey) -> Result<(), LockError> {
        let mut table = self.table.lock();
        let Some(lock) = table.get_mut(key) else {
            return Ok(());
        };
        if lock.owner == Some(locker_id) {
            lock.owner = None;
            lock.owner_exclusive = false;
        } else {
            lock.shared_owners.remove(&locker_id);
        }
        lock.wake_after_release();
        if lock.is_unreferenced() {
            table.remove(key);
        }
        Ok(())
    }

    pub fn unlock_to_shared(&self, locker_id: LockerId, key: &LockKey) -> Result<(), LockError> {
        let mut table = self.table.lock();
        let Some(lock) = table.get_mut(key) else {
            return Ok(());
        };
        if lock.owner == Some(locker_id) {
            lock.owner = None;
            lock.owner_exclusive = false;
        }
        lock.shared_owners.insert(locker_id);
        lock.wake_after_release();
        Ok(())
    }

    pub fn unlock_to_upgradable(&self, locker_id: LockerId, key: &LockKey) -> Result<(), LockError> {
        let mut table = self.table.lock();
        let Some(lock) = table.get_mut(key) else {
            return Ok(());
        };
        if lock.owner == Some(locker_id) {
            lock.owner_exclusive = false;
        }
        lock.wake_after_release();
        Ok(())
    }

    /// Transfers exclusive ownership to a different (pending) identity
    /// without touching the wait queue. Used by `transferExclusive`.
    pub fn transfer_exclusive(&self, from: LockerId, to: LockerId, key: &LockKey) {
        let mut table = self.table.lock();
        if let Some(lock) = table.get_mut(key) {
            if lock.owner == Some(from) && lock.owner_exclusive {
                lock.owner = Some(to);
            }
        }
    }

    /// Enumerates the current holders of a key for the deadlock detector.
    /// Never blocks beyond this shard's own mutex.
    pub fn holders_of(&self, key: &LockKey) -> Vec<LockerId> {
        let table = self.table.lock();
        match table.get(key) {
            Some(lock) => {
                let mut holders: Vec<LockerId> = lock.shared_owners.iter().copied().collect();
                if let Some(owner) = lock.owner {
                    holders.push(owner);
                }
                holders
            }
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(k: &[u8]) -> LockKey {
        LockKey::new(1, k)
    }

    #[test]
    fn shared_acquires_are_compatible() {
        let shard = LockShard::new(UpgradeRule::Strict);
        assert!(matches!(
            shard.try_request(1, &key(b"a"), LockMode::Shared),
            TryOutcome::Done(LockResult::Acquired)
        ));
        assert!(matches!(
            shard.try_request(2, &key(b"a"), LockMode::Shared),
            TryOutcome::Done(LockResult::Acquired)
        ));
    }

    #[test]
    fn upgradable_does_not_block_shared() {
        let shard = LockShard::new(UpgradeRule::Strict);
        assert!(matches!(
            shard.try_request(1, &key(b"a"), LockMode::Upgradable),
            TryOutcome::Done(LockResult::Acquired)
        ));
        assert!(matches!(
            shard.try_request(2, &key(b"a"), LockMode::Shared),
            TryOutcome::Done(LockResult::Acquired)
        ));
    }

    #[test]
    fn exclusive_on_held_key_queues() {
        let shard = LockShard::new(UpgradeRule::Strict);
        let k = key(b"a");
        shard.try_request(1, &k, LockMode::Shared);
        match shard.try_request(2, &k, LockMode::Exclusive) {
            TryOutcome::Queued(_) => {}
            _ => panic!("expected queued"),
        }
    }

    #[test]
    fn strict_rule_forbids_shared_to_upgradable() {
        let shard = LockShard::new(UpgradeRule::Strict);
        let k = key(b"a");
        shard.try_request(1, &k, LockMode::Shared);
        assert!(matches!(
            shard.try_request(1, &k, LockMode::Upgradable),
            TryOutcome::Illegal
        ));
    }

    #[test]
    fn lenient_rule_allows_sole_holder_upgrade() {
        let shard = LockShard::new(UpgradeRule::Lenient);
        let k = key(b"a");
        shard.try_request(1, &k, LockMode::Shared);
        assert!(matches!(
            shard.try_request(1, &k, LockMode::Upgradable),
            TryOutcome::Done(LockResult::Upgraded)
        ));
    }

    #[test]
    fn unlock_releases_and_removes_unreferenced_lock() {
        let shard = LockShard::new(UpgradeRule::Strict);
        let k = key(b"a");
        shard.try_request(1, &k, LockMode::Exclusive);
        shard.unlock(1, &k).unwrap();
        assert_eq!(shard.check(1, &k), LockResult::Unowned);
    }
}
