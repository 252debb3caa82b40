//! Reader-writer lock: shared readers, exclusive writer, try variants,
//! and use-after-destroy rejection.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use uthread_core::errno;
use uthread_core::pthread::rwlock::RwLock;
use uthread_core::pthread::thread;

fn boot() {
    uthread_kern::boot();
}

#[test]
fn readers_share_writers_exclude() {
    boot();
    let rw = Arc::new(RwLock::new());
    rw.init().unwrap();

    rw.rdlock().unwrap();
    // A second reader gets in alongside the first.
    let reader = Arc::clone(&rw);
    let tid = thread::create(None, move || {
        let r = reader.tryrdlock();
        if r.is_ok() {
            reader.unlock().unwrap();
            0
        } else {
            1
        }
    })
    .unwrap();
    assert_eq!(thread::join(tid).unwrap(), 0);

    // But a writer cannot.
    let writer = Arc::clone(&rw);
    let tid = thread::create(None, move || writer.trywrlock().err().unwrap_or(0) as usize).unwrap();
    assert_eq!(thread::join(tid).unwrap(), errno::EBUSY as usize);

    rw.unlock().unwrap();
    rw.destroy().unwrap();
}

#[test]
fn writer_blocks_readers_until_release() {
    boot();
    let rw = Arc::new(RwLock::new());
    rw.init().unwrap();
    rw.wrlock().unwrap();

    let reader = Arc::clone(&rw);
    let tid = thread::create(None, move || {
        // Blocks until the writer lets go.
        reader.rdlock().unwrap();
        reader.unlock().unwrap();
        7
    })
    .unwrap();

    assert_eq!(thread::try_join(tid), Err(errno::EBUSY));
    let _ = thread::sleep_ms(30);
    rw.unlock().unwrap();
    assert_eq!(thread::join(tid).unwrap(), 7);
    rw.destroy().unwrap();
}

#[test]
fn writers_serialize_updates() {
    boot();
    const READERS: usize = 3;
    const ROUNDS: usize = 200;

    struct Shared {
        rw: RwLock,
        value: AtomicUsize,
    }
    let shared = Arc::new(Shared {
        rw: RwLock::new(),
        value: AtomicUsize::new(0),
    });
    shared.rw.init().unwrap();

    let mut tids = Vec::new();
    for _ in 0..READERS {
        let shared = Arc::clone(&shared);
        tids.push(
            thread::create(None, move || {
                for _ in 0..ROUNDS {
                    shared.rw.wrlock().unwrap();
                    let v = shared.value.load(Ordering::Relaxed);
                    shared.value.store(v + 1, Ordering::Relaxed);
                    shared.rw.unlock().unwrap();
                }
                0
            })
            .unwrap(),
        );
    }
    for tid in tids {
        thread::join(tid).unwrap();
    }
    shared.rw.rdlock().unwrap();
    assert_eq!(shared.value.load(Ordering::Relaxed), READERS * ROUNDS);
    shared.rw.unlock().unwrap();
    shared.rw.destroy().unwrap();
}

#[test]
fn unlock_without_hold_is_eperm() {
    boot();
    let rw = RwLock::new();
    rw.init().unwrap();
    assert_eq!(rw.unlock(), Err(errno::EPERM));
    rw.destroy().unwrap();
}

#[test]
fn destroy_held_lock_is_ebusy_then_use_is_einval() {
    boot();
    let rw = RwLock::new();
    rw.init().unwrap();
    rw.wrlock().unwrap();
    assert_eq!(rw.destroy(), Err(errno::EBUSY));
    rw.unlock().unwrap();
    rw.destroy().unwrap();
    assert_eq!(rw.rdlock(), Err(errno::EINVAL));
    assert_eq!(rw.destroy(), Err(errno::EINVAL));
}
