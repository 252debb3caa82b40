//! Uncontended hot-path costs of the trap-backed primitives.

use criterion::{Criterion, criterion_group, criterion_main};
use std::sync::atomic::AtomicI32;

use uthread_core::pthread::mutex::Mutex;
use uthread_core::pthread::spin::{PROCESS_PRIVATE, SpinLock};
use uthread_core::sem::Sem;
use uthread_core::{atomic, pthread::thread};

fn ensure_multithreaded() {
    uthread_kern::boot();
    let tid = thread::create(None, || 0).unwrap();
    thread::join(tid).unwrap();
}

fn bench_mutex_uncontended(c: &mut Criterion) {
    ensure_multithreaded();
    let m = Mutex::new();
    m.init(None).unwrap();

    let mut group = c.benchmark_group("mutex_uncontended");
    group.bench_function("lock_unlock", |b| {
        b.iter(|| {
            m.lock().unwrap();
            m.unlock().unwrap();
        });
    });
    group.bench_function("trylock_unlock", |b| {
        b.iter(|| {
            m.trylock().unwrap();
            m.unlock().unwrap();
        });
    });
    group.finish();
    m.destroy().unwrap();
}

fn bench_spin_uncontended(c: &mut Criterion) {
    ensure_multithreaded();
    let lock = SpinLock::init(PROCESS_PRIVATE).unwrap();

    c.bench_function("spin_lock_unlock", |b| {
        b.iter(|| {
            lock.lock().unwrap();
            lock.unlock().unwrap();
        });
    });
    lock.destroy().unwrap();
}

fn bench_sem_fast_paths(c: &mut Criterion) {
    ensure_multithreaded();
    let sem = Sem::new();
    sem.init(0, 1).unwrap();

    let mut group = c.benchmark_group("sem_fast_path");
    group.bench_function("trywait_post", |b| {
        b.iter(|| {
            sem.trywait().unwrap();
            sem.post().unwrap();
        });
    });
    group.bench_function("wait_post", |b| {
        b.iter(|| {
            sem.wait().unwrap();
            sem.post().unwrap();
        });
    });
    group.finish();
    sem.destroy().unwrap();
}

fn bench_atomic_trap(c: &mut Criterion) {
    ensure_multithreaded();
    let word = AtomicI32::new(0);

    c.bench_function("atomic_cas_roundtrip", |b| {
        b.iter(|| {
            assert!(atomic::cas(&word, 0, 1));
            assert!(atomic::cas(&word, 1, 0));
        });
    });
}

criterion_group!(
    benches,
    bench_mutex_uncontended,
    bench_spin_uncontended,
    bench_sem_fast_paths,
    bench_atomic_trap
);
criterion_main!(benches);
