//! Thread-pool dispatch throughput.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use uthread_core::pthread::pool::ThreadPool;
use uthread_core::sem::Sem;

fn bench_pool_dispatch(c: &mut Criterion) {
    uthread_kern::boot();
    let mut group = c.benchmark_group("pool_dispatch");

    for &workers in &[1usize, 3] {
        group.bench_with_input(
            BenchmarkId::new("submit_drain_100", workers),
            &workers,
            |b, &workers| {
                let pool = ThreadPool::create(workers).unwrap();
                let done = Arc::new(Sem::new());
                done.init(0, 0).unwrap();
                let counter = Arc::new(AtomicUsize::new(0));

                b.iter(|| {
                    for _ in 0..100 {
                        let done = Arc::clone(&done);
                        let counter = Arc::clone(&counter);
                        pool.add(move || {
                            counter.fetch_add(1, Ordering::Relaxed);
                            done.post().unwrap();
                        })
                        .unwrap();
                    }
                    for _ in 0..100 {
                        done.wait().unwrap();
                    }
                });

                let mut pool = pool;
                pool.destroy(true).unwrap();
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_pool_dispatch);
criterion_main!(benches);
