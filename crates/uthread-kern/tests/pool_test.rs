//! Thread pool: graceful shutdown runs every submitted task exactly once,
//! single-submitter ordering holds, and a dead pool refuses new work.

use std::sync::{Arc, Mutex as StdMutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use uthread_core::errno;
use uthread_core::pthread::pool::ThreadPool;
use uthread_core::pthread::thread;

fn boot() {
    uthread_kern::boot();
}

#[test]
fn graceful_destroy_runs_every_task_once() {
    boot();
    const TASKS: usize = 100;
    let log = Arc::new(StdMutex::new(Vec::new()));

    let mut pool = ThreadPool::create(3).unwrap();
    assert_eq!(pool.started(), 3);
    for arg in 0..TASKS {
        let log = Arc::clone(&log);
        pool.add(move || {
            log.lock().unwrap().push(arg);
        })
        .unwrap();
    }
    pool.destroy(true).unwrap();

    let mut seen = log.lock().unwrap().clone();
    assert_eq!(seen.len(), TASKS, "every task must run exactly once");
    seen.sort_unstable();
    let expected: Vec<usize> = (0..TASKS).collect();
    assert_eq!(seen, expected);
}

#[test]
fn single_worker_preserves_submission_order() {
    boot();
    const TASKS: usize = 50;
    let log = Arc::new(StdMutex::new(Vec::new()));

    let mut pool = ThreadPool::create(1).unwrap();
    for arg in 0..TASKS {
        let log = Arc::clone(&log);
        pool.add(move || {
            log.lock().unwrap().push(arg);
        })
        .unwrap();
    }
    pool.destroy(true).unwrap();

    let seen = log.lock().unwrap().clone();
    let expected: Vec<usize> = (0..TASKS).collect();
    assert_eq!(seen, expected, "single-submitter order must be preserved");
}

#[test]
fn zero_thread_request_clamps_to_one_worker() {
    boot();
    let mut pool = ThreadPool::create(0).unwrap();
    assert_eq!(pool.started(), 1);
    let ran = Arc::new(AtomicUsize::new(0));
    let observer = Arc::clone(&ran);
    pool.add(move || {
        observer.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    pool.destroy(true).unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn destroyed_pool_rejects_tasks() {
    boot();
    let mut pool = ThreadPool::create(2).unwrap();
    pool.destroy(true).unwrap();
    assert_eq!(pool.add(|| {}), Err(errno::EINVAL));
}

#[test]
fn concurrent_submitters_lose_no_tasks() {
    boot();
    const SUBMITTERS: usize = 4;
    const PER_SUBMITTER: usize = 25;
    let ran = Arc::new(AtomicUsize::new(0));

    let pool = Arc::new(StdMutex::new(Some(ThreadPool::create(3).unwrap())));

    let mut tids = Vec::new();
    for _ in 0..SUBMITTERS {
        let pool = Arc::clone(&pool);
        let ran = Arc::clone(&ran);
        tids.push(
            thread::create(None, move || {
                for _ in 0..PER_SUBMITTER {
                    let ran = Arc::clone(&ran);
                    let guard = pool.lock().unwrap();
                    if let Some(p) = guard.as_ref() {
                        p.add(move || {
                            ran.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap();
                    }
                }
                0
            })
            .unwrap(),
        );
    }
    for tid in tids {
        thread::join(tid).unwrap();
    }
    if let Some(mut p) = pool.lock().unwrap().take() {
        p.destroy(true).unwrap();
    }
    assert_eq!(ran.load(Ordering::SeqCst), SUBMITTERS * PER_SUBMITTER);
}
