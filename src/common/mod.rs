// # Common Types and Traits
//
// Shared identifiers and the small set of external interfaces the lock
// manager core consumes: a key hash function and a clock source. The third
// external interface named by the design, a thread-park primitive, is
// std::thread itself and is used directly by the latch wait queue rather
// than abstracted behind a trait.

use std::fmt;
use std::time::Instant;

/// Identifies the lock-holding identity of a single transaction.
///
/// Assigned by the caller (the surrounding storage engine); this crate
/// never generates its own ids.
pub type LockerId = u64;

/// Identifies an index (or table) whose keys are being locked.
pub type IndexId = u64;

/// Number of hardware threads visible to this process, used to size the
/// latch's spin limit and the default shard count.
pub fn available_parallelism() -> usize {
    num_cpus::get().max(1)
}

/// Hashes a `(index_id, key)` pair into the 32-bit code that drives shard
/// selection and in-shard bucket placement.
///
/// This is one of the interfaces the lock manager core consumes rather than
/// implements: callers may supply a faster or domain-specific hasher (for
/// example one that exploits key locality) via [`LockManagerConfig`].
///
/// [`LockManagerConfig`]: crate::lock::manager::LockManagerConfig
pub trait KeyHasher: Send + Sync {
    fn hash_key(&self, index_id: IndexId, key: &[u8]) -> u32;
}

/// Default hasher: CRC-32 over the index id's bytes followed by the key.
///
/// Chosen because it is already the checksum primitive the rest of the host
/// storage engine links against, not because it is cryptographically
/// strong — collisions only cost a longer hash-chain walk, not correctness.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultKeyHasher;

impl KeyHasher for DefaultKeyHasher {
    fn hash_key(&self, index_id: IndexId, key: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&index_id.to_le_bytes());
        hasher.update(key);
        hasher.finalize()
    }
}

/// Clock source consumed by timeout-bearing wait operations.
///
/// Abstracted so tests can drive deterministic timeouts without sleeping;
/// production callers use [`SystemClock`].
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

/// The real wall clock, backed by [`std::time::Instant`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_hasher_is_deterministic() {
        let h = DefaultKeyHasher;
        let a = h.hash_key(7, b"row-1");
        let b = h.hash_key(7, b"row-1");
        assert_eq!(a, b);
    }

    #[test]
    fn default_hasher_distinguishes_index_id() {
        let h = DefaultKeyHasher;
        let a = h.hash_key(1, b"row-1");
        let b = h.hash_key(2, b"row-1");
        assert_ne!(a, b);
    }

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        let t1 = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let t2 = clock.now();
        assert!(t2 > t1);
    }
}
