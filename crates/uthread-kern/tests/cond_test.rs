//! Condition variable contracts: deadline handling, wakeup delivery,
//! magic validation, and busy destroy.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use uthread_core::errno;
use uthread_core::pthread::cond::Cond;
use uthread_core::pthread::mutex::Mutex;
use uthread_core::pthread::thread;
use uthread_core::time::{ClockId, now};

fn boot() {
    uthread_kern::boot();
}

#[test]
fn timedwait_past_deadline_is_immediate_etimedout() {
    boot();
    let m = Mutex::new();
    m.init(None).unwrap();
    let cv = Cond::new();
    cv.init().unwrap();

    m.lock().unwrap();
    let past = uthread_core::time::TimeSpec { sec: 1, nsec: 0 };
    let start = std::time::Instant::now();
    assert_eq!(cv.timedwait(&m, &past), Err(errno::ETIMEDOUT));
    assert!(start.elapsed() < std::time::Duration::from_millis(50));
    m.unlock().unwrap();

    cv.destroy().unwrap();
    m.destroy().unwrap();
}

#[test]
fn timedwait_times_out_and_reacquires_mutex() {
    boot();
    let m = Mutex::new();
    m.init(None).unwrap();
    let cv = Cond::new();
    cv.init().unwrap();

    m.lock().unwrap();
    let deadline = now(ClockId::Realtime).plus_millis(60);
    assert_eq!(cv.timedwait(&m, &deadline), Err(errno::ETIMEDOUT));
    // The mutex must be held again on the way out.
    m.unlock().unwrap();

    cv.destroy().unwrap();
    m.destroy().unwrap();
}

#[test]
fn signal_wakes_waiter_with_predicate() {
    boot();
    struct Shared {
        m: Mutex,
        cv: Cond,
        ready: AtomicBool,
    }
    let shared = Arc::new(Shared {
        m: Mutex::new(),
        cv: Cond::new(),
        ready: AtomicBool::new(false),
    });
    shared.m.init(None).unwrap();
    shared.cv.init().unwrap();

    let waiter = Arc::clone(&shared);
    let tid = thread::create(None, move || {
        waiter.m.lock().unwrap();
        while !waiter.ready.load(Ordering::Relaxed) {
            waiter.cv.wait(&waiter.m).unwrap();
        }
        waiter.m.unlock().unwrap();
        1
    })
    .unwrap();

    let _ = thread::sleep_ms(30);
    shared.m.lock().unwrap();
    shared.ready.store(true, Ordering::Relaxed);
    shared.cv.signal().unwrap();
    shared.m.unlock().unwrap();

    assert_eq!(thread::join(tid).unwrap(), 1);
    shared.cv.destroy().unwrap();
    shared.m.destroy().unwrap();
}

#[test]
fn destroy_with_waiter_is_ebusy() {
    boot();
    struct Shared {
        m: Mutex,
        cv: Cond,
        done: AtomicBool,
    }
    let shared = Arc::new(Shared {
        m: Mutex::new(),
        cv: Cond::new(),
        done: AtomicBool::new(false),
    });
    shared.m.init(None).unwrap();
    shared.cv.init().unwrap();

    let waiter = Arc::clone(&shared);
    let tid = thread::create(None, move || {
        waiter.m.lock().unwrap();
        while !waiter.done.load(Ordering::Relaxed) {
            waiter.cv.wait(&waiter.m).unwrap();
        }
        waiter.m.unlock().unwrap();
        0
    })
    .unwrap();

    // Let the waiter park, then refuse to tear the cv down under it.
    let _ = thread::sleep_ms(50);
    assert_eq!(shared.cv.destroy(), Err(errno::EBUSY));

    shared.m.lock().unwrap();
    shared.done.store(true, Ordering::Relaxed);
    shared.cv.broadcast().unwrap();
    shared.m.unlock().unwrap();
    thread::join(tid).unwrap();

    shared.cv.destroy().unwrap();
    shared.m.destroy().unwrap();
}

#[test]
fn dead_magic_is_einval() {
    boot();
    let m = Mutex::new();
    m.init(None).unwrap();
    let cv = Cond::new();

    // Never initialized: no magic, no handle.
    assert_eq!(cv.wait(&m), Err(errno::EINVAL));
    cv.init().unwrap();
    cv.destroy().unwrap();
    // Destroyed: magic cleared.
    assert_eq!(cv.signal(), Err(errno::EINVAL));
    assert_eq!(cv.wait(&m), Err(errno::EINVAL));

    m.destroy().unwrap();
}

#[test]
fn broadcast_wakes_every_waiter() {
    boot();
    struct Shared {
        m: Mutex,
        cv: Cond,
        go: AtomicBool,
    }
    let shared = Arc::new(Shared {
        m: Mutex::new(),
        cv: Cond::new(),
        go: AtomicBool::new(false),
    });
    shared.m.init(None).unwrap();
    shared.cv.init().unwrap();

    let mut tids = Vec::new();
    for _ in 0..4 {
        let w = Arc::clone(&shared);
        tids.push(
            thread::create(None, move || {
                w.m.lock().unwrap();
                while !w.go.load(Ordering::Relaxed) {
                    w.cv.wait(&w.m).unwrap();
                }
                w.m.unlock().unwrap();
                1
            })
            .unwrap(),
        );
    }

    let _ = thread::sleep_ms(50);
    shared.m.lock().unwrap();
    shared.go.store(true, Ordering::Relaxed);
    shared.cv.broadcast().unwrap();
    shared.m.unlock().unwrap();

    let mut woken = 0;
    for tid in tids {
        woken += thread::join(tid).unwrap();
    }
    assert_eq!(woken, 4);
    shared.cv.destroy().unwrap();
    shared.m.destroy().unwrap();
}
