//! Shared vocabulary for the lock manager: modes, outcomes, and the
//! configurable upgrade policy.

use std::fmt;

/// The three modes a [`crate::lock::locker::Locker`] may hold on a key.
///
/// Ordered by strength for upgrade comparisons: `Shared < Upgradable <
/// Exclusive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockMode {
    Shared,
    Upgradable,
    Exclusive,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LockMode::Shared => "shared",
            LockMode::Upgradable => "upgradable",
            LockMode::Exclusive => "exclusive",
        };
        f.write_str(s)
    }
}

/// Outcome of a successful (non-erroring) lock acquisition or inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockResult {
    /// The lock was free and is now held in the requested mode.
    Acquired,
    /// The locker already held a weaker mode and this call strengthened it.
    Upgraded,
    /// The locker already held shared mode; no state change occurred.
    OwnedShared,
    /// The locker already held upgradable mode; no state change occurred.
    OwnedUpgradable,
    /// The locker already held exclusive mode; no state change occurred.
    OwnedExclusive,
    /// The locker holds no mode on this key.
    Unowned,
}

impl LockResult {
    /// True for every variant that represents the locker currently holding
    /// *some* mode on the key, including the no-op "already owned" results.
    pub fn is_held(&self) -> bool {
        !matches!(self, LockResult::Unowned)
    }
}

/// Policy governing whether a locker holding `Shared` may additionally
/// request `Upgradable` on the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpgradeRule {
    /// Shared-to-upgradable is always illegal; the locker must release and
    /// re-acquire. Safest default — avoids the classic shared-to-exclusive
    /// upgrade deadlock between two lockers both holding shared.
    #[default]
    Strict,
    /// Shared-to-upgradable is allowed only when this locker is the sole
    /// shared holder (`shared_count == 1`).
    Lenient,
    /// Always allowed; the caller is responsible for avoiding upgrade
    /// deadlocks.
    Unchecked,
}
