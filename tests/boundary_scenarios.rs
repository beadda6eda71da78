// End-to-end boundary scenarios.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rowlock_core::commit_latch::CommitLatch;
use rowlock_core::lock::{
    LockError, LockManager, LockManagerConfig, LockResult, Locker, UpgradeRule,
};

fn manager() -> Arc<LockManager> {
    Arc::new(LockManager::new(LockManagerConfig::default()))
}

fn lenient_manager() -> Arc<LockManager> {
    Arc::new(LockManager::new(LockManagerConfig {
        upgrade_rule: UpgradeRule::Lenient,
        ..LockManagerConfig::default()
    }))
}

// Scenario 1: T1 holds shared on K; T2's exclusive request times out.
#[test]
fn shared_holder_blocks_exclusive_until_timeout() {
    let mgr = manager();
    mgr.lock_shared(1, 1, b"k").unwrap();

    let start = std::time::Instant::now();
    let err = mgr
        .try_lock_exclusive(2, 1, b"k", Duration::from_millis(10))
        .unwrap_err();
    assert_eq!(err, LockError::TimedOut(Duration::from_millis(10)));
    assert!(start.elapsed() >= Duration::from_millis(10));

    assert_eq!(mgr.check(1, 1, b"k"), LockResult::OwnedShared);
}

// Scenario 2: T1 holds upgradable on K; T2's shared request is granted
// immediately.
#[test]
fn upgradable_does_not_block_shared_requests() {
    let mgr = manager();
    mgr.lock_upgradable(1, 1, b"k").unwrap();
    let result = mgr
        .try_lock_shared(2, 1, b"k", Duration::from_millis(50))
        .unwrap();
    assert_eq!(result, LockResult::Acquired);
}

// Scenario 3: T1 shared, T2 waits exclusive, T3 requests shared after the
// exclusive wait bit is set and must queue behind it; releases cascade in
// FIFO order.
#[test]
fn exclusive_wait_bit_orders_later_shared_requests_behind_it() {
    let mgr = manager();
    mgr.lock_shared(1, 1, b"k").unwrap();

    let mgr2 = mgr.clone();
    let t2 = thread::spawn(move || {
        mgr2.lock_exclusive(2, 1, b"k").unwrap();
        thread::sleep(Duration::from_millis(20));
        mgr2.unlock(2, 1, b"k").unwrap();
    });

    // Give T2 time to enqueue and set the exclusive-wait bit.
    thread::sleep(Duration::from_millis(20));

    let mgr3 = mgr.clone();
    let t3 = thread::spawn(move || {
        mgr3.lock_shared(3, 1, b"k").unwrap();
        mgr3.unlock(3, 1, b"k").unwrap();
    });

    thread::sleep(Duration::from_millis(10));
    mgr.unlock(1, 1, b"k").unwrap();

    t2.join().unwrap();
    t3.join().unwrap();
}

// Scenario 4: T1 holds A shared and waits exclusive on B; T2 holds B
// shared and waits exclusive on A. The deadlock detector must fire for
// at least one side.
#[test]
fn cross_transaction_deadlock_is_detected() {
    let mgr = manager();
    mgr.lock_shared(1, 1, b"a").unwrap();
    mgr.lock_shared(2, 1, b"b").unwrap();

    let mgr1 = mgr.clone();
    let t1 = thread::spawn(move || {
        mgr1.try_lock_exclusive(1, 1, b"b", Duration::from_secs(1))
    });
    // Let T1 publish its wait-for edge before T2 starts waiting on the
    // cycle's other edge.
    thread::sleep(Duration::from_millis(20));
    let mgr2 = mgr.clone();
    let t2 = thread::spawn(move || {
        mgr2.try_lock_exclusive(2, 1, b"a", Duration::from_secs(1))
    });

    let r1 = t1.join().unwrap();
    let r2 = t2.join().unwrap();

    let deadlocked = matches!(r1, Err(LockError::Deadlock { .. }))
        || matches!(r2, Err(LockError::Deadlock { .. }));
    assert!(deadlocked, "expected at least one side to detect the cycle");
}

// Scenario 5: a locker enters a nested scope, re-acquires a key it already
// holds shared in the outer scope at a stronger mode, and attempts an
// immediate unlock of that entry.
#[test]
fn non_immediate_upgrade_cannot_be_unlocked_directly() {
    let mgr = lenient_manager();
    let mut locker = Locker::new(1, mgr.clone());

    locker.lock_shared(1, b"k", Duration::MAX).unwrap();
    locker.scope_enter();
    locker.lock_upgradable(1, b"k", Duration::MAX).unwrap();

    let err = locker.unlock_last().unwrap_err();
    assert_eq!(err, LockError::NonImmediateUpgrade);

    // The correct way out is scope_exit, which demotes instead of
    // releasing outright.
    locker.scope_exit().unwrap();
    assert_eq!(mgr.check(1, 1, b"k"), LockResult::OwnedShared);
}

// Scenario 6: 8 reader threads hammer 1000 random keys via lockShared while
// one thread runs CommitLatch::acquire_exclusive; afterward every acquire
// has a matching release and the exclusive acquirer returned.
#[test]
fn commit_latch_survives_concurrent_reader_load() {
    let latch = Arc::new(CommitLatch::new());
    let mut handles = Vec::new();

    for t in 0..8u64 {
        let l = latch.clone();
        handles.push(thread::spawn(move || {
            let mut x = t.wrapping_mul(2654435761);
            for _ in 0..1000 {
                x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
                let _g = l.acquire_shared();
                if x % 64 == 0 {
                    thread::yield_now();
                }
            }
        }));
    }

    let writer_latch = latch.clone();
    let writer = thread::spawn(move || {
        let _g = writer_latch.acquire_exclusive();
    });

    for h in handles {
        h.join().unwrap();
    }
    writer.join().unwrap();

    assert!(!latch.has_shared_lockers());
}
