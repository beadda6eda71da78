// LockManager performance benchmarks.
// Exercises shard contention, shared-lock fast path throughput, and
// exclusive lock hand-off latency under multiple threads.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rowlock_core::lock::{LockManager, LockManagerConfig, LockMode};
use std::sync::Arc;
use std::time::Duration;

fn manager() -> Arc<LockManager> {
    Arc::new(LockManager::new(LockManagerConfig::default()))
}

fn bench_uncontended_shared_acquire(c: &mut Criterion) {
    let mgr = manager();
    let mut next = 0u64;

    c.bench_function("shared_acquire_release_uncontended", |b| {
        b.iter(|| {
            next += 1;
            let key = next.to_le_bytes();
            mgr.lock_shared(1, 1, &key).unwrap();
            mgr.unlock(1, 1, &key).unwrap();
            black_box(next);
        });
    });
}

fn bench_hotspot_shared_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("shared_hotspot_contention");

    for num_threads in [1, 2, 4, 8] {
        group.bench_with_input(
            BenchmarkId::from_parameter(num_threads),
            &num_threads,
            |b, &num_threads| {
                let mgr = manager();
                b.iter(|| {
                    let handles: Vec<_> = (0..num_threads)
                        .map(|i| {
                            let mgr = mgr.clone();
                            std::thread::spawn(move || {
                                for _ in 0..100 {
                                    mgr.lock_shared(i as u64 + 1, 1, b"hotspot").unwrap();
                                    mgr.unlock(i as u64 + 1, 1, b"hotspot").unwrap();
                                }
                            })
                        })
                        .collect();
                    for h in handles {
                        h.join().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_exclusive_handoff(c: &mut Criterion) {
    c.bench_function("exclusive_handoff_two_threads", |b| {
        b.iter(|| {
            let mgr = manager();
            let mgr2 = mgr.clone();
            let writer = std::thread::spawn(move || {
                for i in 0..50u64 {
                    mgr2.lock_exclusive(1, 1, b"k").unwrap();
                    mgr2.unlock(1, 1, b"k").unwrap();
                    black_box(i);
                }
            });
            for i in 0..50u64 {
                let _ = mgr.try_lock_exclusive(2, 1, b"k", Duration::from_micros(50));
                black_box(i);
            }
            writer.join().unwrap();
        });
    });
}

fn bench_shard_distribution(c: &mut Criterion) {
    let mgr = manager();
    c.bench_function("mixed_mode_across_many_keys", |b| {
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            let key = n.to_le_bytes();
            let mode = match n % 3 {
                0 => LockMode::Shared,
                1 => LockMode::Upgradable,
                _ => LockMode::Exclusive,
            };
            match mode {
                LockMode::Shared => {
                    mgr.lock_shared(1, 1, &key).unwrap();
                }
                LockMode::Upgradable => {
                    mgr.lock_upgradable(1, 1, &key).unwrap();
                }
                LockMode::Exclusive => {
                    mgr.lock_exclusive(1, 1, &key).unwrap();
                }
            }
            mgr.unlock(1, 1, &key).unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_uncontended_shared_acquire,
    bench_hotspot_shared_contention,
    bench_exclusive_handoff,
    bench_shard_distribution
);
criterion_main!(benches);
