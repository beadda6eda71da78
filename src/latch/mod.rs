// Multi-mode reader/writer gate with queued waiters.
//
// State is packed into a single 32-bit word:
//   0                       unheld
//   1 ..= 0x7fff_ffff        held shared by N readers
//   0x8000_0000              held exclusively
//   0x8000_0000 | N (N > 0)  shared held AND exclusive requested — new
//                            shared acquires must queue behind the drain
//
// Unlike the reference design's lock-free intrusive queue (with its
// backlink-splice for cancelled nodes), waiters here live in a
// `Mutex`-guarded `VecDeque` (see `queue.rs`). The state word and the
// decision of who a release hands off to are always updated together under
// the same compare-exchange or fetch-sub, before the woken thread is
// unparked, so a "denied" flag guarding a barge race never becomes
// necessary — by the time a parked thread observes its grant, the state
// word already reflects it.

mod queue;

use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::common::available_parallelism;
use queue::{WaitMode, WaitQueue, Waiter};

const EXCLUSIVE_BIT: u32 = 0x8000_0000;
const COUNT_MASK: u32 = 0x7fff_ffff;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchError {
    #[error("timed out waiting for latch")]
    TimedOut,
    #[error("interrupted while waiting for latch")]
    Interrupted,
}

enum WaitOutcome {
    Granted,
    TimedOut,
    Cancelled,
}

/// Generic multi-mode reader/writer gate.
///
/// `Latch` is a bare coordination primitive — it guards no data of its own.
/// Callers pair it with the structure it protects (a `LockShard`'s hash
/// table, a `CommitLatch`'s counters, a mapped region) the way the rest of
/// this crate does.
#[derive(Debug)]
pub struct Latch {
    state: AtomicU32,
    queue: WaitQueue,
    spin_limit: u32,
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl Latch {
    pub fn new() -> Self {
        Self {
            state: AtomicU32::new(0),
            queue: WaitQueue::new(),
            spin_limit: available_parallelism() as u32,
        }
    }

    /// Non-blocking exclusive acquire: CAS `0 -> EXCLUSIVE_BIT`.
    pub fn try_acquire_exclusive(&self) -> Option<ExclusiveLatchGuard<'_>> {
        self.state
            .compare_exchange(0, EXCLUSIVE_BIT, Ordering::AcqRel, Ordering::Relaxed)
            .ok()
            .map(|_| ExclusiveLatchGuard { latch: self })
    }

    /// Non-blocking shared acquire: CAS `state -> state + 1`, only while the
    /// exclusive bit is clear.
    pub fn try_acquire_shared(&self) -> Option<SharedLatchGuard<'_>> {
        loop {
            let state = self.state.load(Ordering::Acquire);
            if state & EXCLUSIVE_BIT != 0 {
                return None;
            }
            if state & COUNT_MASK == COUNT_MASK {
                panic!("too many concurrent shared latch holders");
            }
            if self
                .state
                .compare_exchange_weak(state, state + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(SharedLatchGuard { latch: self });
            }
        }
    }

    pub fn acquire_exclusive(&self) -> ExclusiveLatchGuard<'_> {
        self.acquire_exclusive_timeout(Duration::MAX)
            .expect("untimed exclusive acquire cannot time out")
    }

    pub fn acquire_shared(&self) -> SharedLatchGuard<'_> {
        self.acquire_shared_timeout(Duration::MAX)
            .expect("untimed shared acquire cannot time out")
    }

    pub fn acquire_exclusive_timeout(
        &self,
        timeout: Duration,
    ) -> Result<ExclusiveLatchGuard<'_>, LatchError> {
        self.acquire_exclusive_internal(timeout, None)
    }

    pub fn acquire_shared_timeout(
        &self,
        timeout: Duration,
    ) -> Result<SharedLatchGuard<'_>, LatchError> {
        self.acquire_shared_internal(timeout, None)
    }

    /// Interruptible exclusive acquire: `cancel` is polled between spins and
    /// park intervals; setting it mid-wait aborts the acquire.
    pub fn acquire_exclusive_interruptible(
        &self,
        cancel: &std::sync::atomic::AtomicBool,
    ) -> Result<ExclusiveLatchGuard<'_>, LatchError> {
        self.acquire_exclusive_internal(Duration::MAX, Some(cancel))
    }

    pub fn acquire_shared_interruptible(
        &self,
        cancel: &std::sync::atomic::AtomicBool,
    ) -> Result<SharedLatchGuard<'_>, LatchError> {
        self.acquire_shared_internal(Duration::MAX, Some(cancel))
    }

    fn acquire_exclusive_internal(
        &self,
        timeout: Duration,
        cancel: Option<&std::sync::atomic::AtomicBool>,
    ) -> Result<ExclusiveLatchGuard<'_>, LatchError> {
        let deadline = deadline_for(timeout);
        let mut spins = 0u32;
        loop {
            let state = self.state.load(Ordering::Acquire);
            if state == 0 {
                if self
                    .state
                    .compare_exchange_weak(0, EXCLUSIVE_BIT, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    return Ok(ExclusiveLatchGuard { latch: self });
                }
                continue;
            }
            if state & EXCLUSIVE_BIT == 0 {
                // Shared-only: request a drain so new readers start queuing.
                if self
                    .state
                    .compare_exchange_weak(
                        state,
                        state | EXCLUSIVE_BIT,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    )
                    .is_err()
                {
                    continue;
                }
            }
            if spins < self.spin_limit {
                spins += 1;
                std::hint::spin_loop();
                continue;
            }
            let waiter = self.queue.enqueue(WaitMode::Exclusive);
            match park_waiter(&waiter, deadline, cancel) {
                WaitOutcome::Granted => return Ok(ExclusiveLatchGuard { latch: self }),
                WaitOutcome::TimedOut => {
                    if self.queue.remove(&waiter) {
                        self.release_exclusive_request_if_unwanted();
                        return Err(LatchError::TimedOut);
                    }
                    return Ok(ExclusiveLatchGuard { latch: self });
                }
                WaitOutcome::Cancelled => {
                    if self.queue.remove(&waiter) {
                        self.release_exclusive_request_if_unwanted();
                        return Err(LatchError::Interrupted);
                    }
                    return Ok(ExclusiveLatchGuard { latch: self });
                }
            }
        }
    }

    fn acquire_shared_internal(
        &self,
        timeout: Duration,
        cancel: Option<&std::sync::atomic::AtomicBool>,
    ) -> Result<SharedLatchGuard<'_>, LatchError> {
        let deadline = deadline_for(timeout);
        let mut spins = 0u32;
        loop {
            let state = self.state.load(Ordering::Acquire);
            if state & EXCLUSIVE_BIT == 0 {
                if state & COUNT_MASK == COUNT_MASK {
                    panic!("too many concurrent shared latch holders");
                }
                if self
                    .state
                    .compare_exchange_weak(state, state + 1, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    return Ok(SharedLatchGuard { latch: self });
                }
                continue;
            }
            if spins < self.spin_limit {
                spins += 1;
                std::hint::spin_loop();
                continue;
            }
            let waiter = self.queue.enqueue(WaitMode::Shared);
            match park_waiter(&waiter, deadline, cancel) {
                WaitOutcome::Granted => return Ok(SharedLatchGuard { latch: self }),
                WaitOutcome::TimedOut => {
                    if self.queue.remove(&waiter) {
                        return Err(LatchError::TimedOut);
                    }
                    return Ok(SharedLatchGuard { latch: self });
                }
                WaitOutcome::Cancelled => {
                    if self.queue.remove(&waiter) {
                        return Err(LatchError::Interrupted);
                    }
                    return Ok(SharedLatchGuard { latch: self });
                }
            }
        }
    }

    /// Called after a canceled/timed-out exclusive waiter pulls itself out
    /// of the queue. If no exclusive waiter remains behind it and readers
    /// are still active, the drain request it set is now nobody's to
    /// collect — clear it so those readers aren't blocked forever waiting
    /// on an exclusive acquirer that gave up.
    fn release_exclusive_request_if_unwanted(&self) {
        if self.queue.front_mode() == Some(WaitMode::Exclusive) {
            return;
        }
        loop {
            let state = self.state.load(Ordering::Acquire);
            if state & EXCLUSIVE_BIT == 0 {
                return;
            }
            let count = state & COUNT_MASK;
            if count == 0 {
                // A concurrent releaseShared is mid-handoff for this exact
                // transition; it owns resolving the state from here.
                return;
            }
            if self
                .state
                .compare_exchange_weak(state, count, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.queue.pop_and_grant_shared_prefix();
                return;
            }
        }
    }

    fn release_shared(&self) {
        let old = self.state.fetch_sub(1, Ordering::AcqRel);
        let old_count = old & COUNT_MASK;
        debug_assert!(old_count > 0, "releaseShared on an unheld latch");
        if old_count == 1 && (old & EXCLUSIVE_BIT != 0) {
            self.drain_to_exclusive_or_clear();
        }
    }

    /// Invoked exactly when the last reader has left while an exclusive
    /// drain was requested: state is now precisely `EXCLUSIVE_BIT`. Hands
    /// off to the queue head, whatever its mode, or clears the bit if
    /// nobody is waiting.
    fn drain_to_exclusive_or_clear(&self) {
        if let Some(waiter) = self.queue.pop_and_grant() {
            if waiter.mode == WaitMode::Shared {
                self.state.store(1, Ordering::Release);
                let more = self.queue.pop_and_grant_shared_prefix();
                if more > 0 {
                    self.state.fetch_add(more as u32, Ordering::AcqRel);
                }
            }
        } else {
            self.state.store(0, Ordering::Release);
        }
    }

    fn release_exclusive(&self) {
        if let Some(waiter) = self.queue.pop_and_grant() {
            match waiter.mode {
                WaitMode::Exclusive => {
                    // Ownership transfers directly; state stays EXCLUSIVE_BIT.
                }
                WaitMode::Shared => {
                    self.state.store(1, Ordering::Release);
                    let more = self.queue.pop_and_grant_shared_prefix();
                    if more > 0 {
                        self.state.fetch_add(more as u32, Ordering::AcqRel);
                    }
                    self.reassert_exclusive_request_if_queued();
                }
            }
        } else {
            self.state.store(0, Ordering::Release);
        }
    }

    /// After granting a shared prefix out of a release, an exclusive waiter
    /// may now sit behind newly-active readers; re-set the drain bit so it
    /// isn't starved waiting on a bit that got cleared out from under it.
    fn reassert_exclusive_request_if_queued(&self) {
        if self.queue.front_mode() != Some(WaitMode::Exclusive) {
            return;
        }
        loop {
            let state = self.state.load(Ordering::Acquire);
            if state & EXCLUSIVE_BIT != 0 {
                return;
            }
            if self
                .state
                .compare_exchange_weak(
                    state,
                    state | EXCLUSIVE_BIT,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return;
            }
        }
    }

    /// Downgrades an exclusive hold to shared in one step: wakes a
    /// contiguous prefix of queued shared waiters along with the caller.
    fn downgrade(&self) {
        self.state.store(1, Ordering::Release);
        let more = self.queue.pop_and_grant_shared_prefix();
        if more > 0 {
            self.state.fetch_add(more as u32, Ordering::AcqRel);
        }
        self.reassert_exclusive_request_if_queued();
    }
}

fn deadline_for(timeout: Duration) -> Option<Instant> {
    if timeout == Duration::MAX {
        None
    } else {
        Instant::now().checked_add(timeout)
    }
}

fn park_waiter(
    waiter: &Waiter,
    deadline: Option<Instant>,
    cancel: Option<&std::sync::atomic::AtomicBool>,
) -> WaitOutcome {
    loop {
        if waiter.is_granted() {
            return WaitOutcome::Granted;
        }
        if let Some(flag) = cancel {
            if flag.load(Ordering::Acquire) {
                return WaitOutcome::Cancelled;
            }
        }
        match deadline {
            Some(d) => {
                let now = Instant::now();
                if now >= d {
                    return WaitOutcome::TimedOut;
                }
                thread::park_timeout(d - now);
            }
            None => thread::park(),
        }
    }
}

/// RAII guard for a shared hold on a [`Latch`]. Dropping it calls
/// `release_shared`.
pub struct SharedLatchGuard<'a> {
    latch: &'a Latch,
}

impl Drop for SharedLatchGuard<'_> {
    fn drop(&mut self) {
        self.latch.release_shared();
    }
}

/// RAII guard for an exclusive hold on a [`Latch`]. Dropping it calls
/// `release_exclusive`.
#[derive(Debug)]
pub struct ExclusiveLatchGuard<'a> {
    latch: &'a Latch,
}

impl<'a> ExclusiveLatchGuard<'a> {
    /// Downgrades to a shared hold without ever releasing the latch
    /// entirely, so no exclusive waiter can barge in between.
    pub fn downgrade(self) -> SharedLatchGuard<'a> {
        let latch = self.latch;
        std::mem::forget(self);
        latch.downgrade();
        SharedLatchGuard { latch }
    }
}

impl Drop for ExclusiveLatchGuard<'_> {
    fn drop(&mut self) {
        self.latch.release_exclusive();
    }
}
