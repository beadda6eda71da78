//! Lock manager error type.
//!
//! A single `thiserror` enum stands in for what the reference design
//! expresses as a small exception hierarchy (`DeadlockException`,
//! `LockTimeoutException`, `IllegalUpgradeException`,
//! `LockInterruptedException`, `LockFailureException`) — each exception
//! becomes one variant here instead of a subclass.

use thiserror::Error;

use crate::common::LockerId;

pub type LockResultT<T> = std::result::Result<T, LockError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Raised by the blocking `lock*` operations (but not `try_lock*`,
    /// which reports this case as a value rather than an error) when the
    /// wait exceeds the caller's timeout and the deadlock detector could
    /// not prove a cycle.
    #[error("timed out waiting for lock after {0:?}")]
    TimedOut(std::time::Duration),

    /// The detector walked the live wait-for graph and found a cycle
    /// containing the waiting locker.
    #[error("deadlock detected: locker {guilty} waits on a cycle through {participants:?}")]
    Deadlock {
        guilty: LockerId,
        participants: Vec<LockerId>,
    },

    /// A shared-to-upgradable request was refused by the shard's
    /// [`UpgradeRule`](crate::lock::types::UpgradeRule).
    #[error("illegal upgrade: locker {0} may not promote shared to upgradable under the active rule")]
    IllegalUpgrade(LockerId),

    /// The waiting thread was interrupted (its cancellation flag was set)
    /// before the lock could be granted.
    #[error("interrupted while waiting for lock")]
    Interrupted,

    /// `unlockLast` was called on a stack entry whose upgrade bit is set —
    /// releasing a non-immediate upgrade would corrupt the scope's lock
    /// set.
    #[error("cannot unlock a non-immediate upgrade entry")]
    NonImmediateUpgrade,

    /// An unlock or scope operation referenced a lock acquired in a
    /// different (already-exited) scope than the one being unwound.
    #[error("lock does not belong to the scope being exited")]
    ScopeMismatch,

    /// The manager has been shut down and refuses new lock requests.
    #[error("lock manager is closed")]
    Closed,
}
