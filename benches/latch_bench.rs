// Latch and CommitLatch performance benchmarks.
// Tests the shared fast path, exclusive acquire/release round trip, and
// reader-throughput-under-writer behavior that the commit latch is tuned
// for.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rowlock_core::commit_latch::CommitLatch;
use rowlock_core::latch::Latch;
use std::sync::Arc;

fn bench_uncontended_shared(c: &mut Criterion) {
    let latch = Latch::new();
    c.bench_function("latch_shared_acquire_release", |b| {
        b.iter(|| {
            let g = latch.try_acquire_shared().unwrap();
            black_box(&g);
        });
    });
}

fn bench_uncontended_exclusive(c: &mut Criterion) {
    let latch = Latch::new();
    c.bench_function("latch_exclusive_acquire_release", |b| {
        b.iter(|| {
            let g = latch.try_acquire_exclusive().unwrap();
            black_box(&g);
        });
    });
}

fn bench_shared_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("latch_shared_scaling");
    for num_threads in [1, 2, 4, 8] {
        group.bench_with_input(
            BenchmarkId::from_parameter(num_threads),
            &num_threads,
            |b, &num_threads| {
                let latch = Arc::new(Latch::new());
                b.iter(|| {
                    let handles: Vec<_> = (0..num_threads)
                        .map(|_| {
                            let latch = latch.clone();
                            std::thread::spawn(move || {
                                for _ in 0..200 {
                                    let _g = latch.acquire_shared();
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

fn bench_commit_latch_reader_throughput(c: &mut Criterion) {
    let latch = CommitLatch::new();
    c.bench_function("commit_latch_shared_fast_path", |b| {
        b.iter(|| {
            let g = latch.acquire_shared();
            black_box(&g);
        });
    });
}

fn bench_commit_latch_readers_vs_writer(c: &mut Criterion) {
    c.bench_function("commit_latch_readers_and_one_writer", |b| {
        b.iter(|| {
            let latch = Arc::new(CommitLatch::new());
            let mut handles = Vec::new();
            for _ in 0..4 {
                let l = latch.clone();
                handles.push(std::thread::spawn(move || {
                    for _ in 0..100 {
                        let _g = l.acquire_shared();
                    }
                }));
            }
            let l2 = latch.clone();
            handles.push(std::thread::spawn(move || {
                let _g = l2.acquire_exclusive();
            }));
            for h in handles {
                h.join().unwrap();
            }
        });
    });
}

criterion_group!(
    benches,
    bench_uncontended_shared,
    bench_uncontended_exclusive,
    bench_shared_scaling,
    bench_commit_latch_reader_throughput,
    bench_commit_latch_readers_vs_writer
);
criterion_main!(benches);
