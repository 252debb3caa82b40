//! Single-threaded-mode semaphores: anonymous kernel-slot semaphores and
//! named semaphores over `/U/SHM`, including deferred unlink.
//!
//! This file must never create a runtime thread: the whole point is that
//! the multithreaded flag stays unlatched, which routes the semaphore to
//! its kernel-slot mode. Integration test files run in their own process,
//! so other suites cannot latch the flag under us.

use uthread_core::errno;
use uthread_core::pthread::thread;
use uthread_core::sem::named::{self, O_CREAT, O_EXCL};
use uthread_core::sem::{SEM_VALUE_MAX, Sem};
use uthread_core::time::{ClockId, now};

fn boot() {
    uthread_kern::boot();
    assert!(
        !thread::is_multithreaded(),
        "named-semaphore tests require single-threaded mode"
    );
}

#[test]
fn anonymous_sem_counts_in_kernel_slot_mode() {
    boot();
    let sem = Sem::new();
    sem.init(0, 2).unwrap();
    sem.wait().unwrap();
    sem.wait().unwrap();
    assert_eq!(sem.trywait(), Err(errno::EAGAIN));
    assert_eq!(errno::get_errno(), errno::EAGAIN);
    sem.post().unwrap();
    sem.wait().unwrap();
    sem.destroy().unwrap();
}

#[test]
fn anonymous_sem_timedwait_expires() {
    boot();
    let sem = Sem::new();
    sem.init(0, 0).unwrap();
    let deadline = now(ClockId::Realtime).plus_millis(60);
    let start = std::time::Instant::now();
    assert_eq!(sem.timedwait(&deadline), Err(errno::ETIMEDOUT));
    assert!(start.elapsed() >= std::time::Duration::from_millis(40));
    sem.destroy().unwrap();
}

#[test]
fn named_sem_create_use_reopen_unlink() {
    boot();
    let sem = named::open("/q", O_CREAT | O_EXCL, 2).unwrap();

    // Two tokens are immediately takeable.
    sem.wait().unwrap();
    sem.wait().unwrap();
    assert_eq!(sem.trywait(), Err(errno::EAGAIN));

    // A reopen sees the same record: its posts feed our waits.
    let reopened = named::open("/q", 0, 0).unwrap();
    assert!(std::ptr::eq(sem, reopened), "same shared block expected");
    reopened.post().unwrap();
    reopened.post().unwrap();
    sem.wait().unwrap();
    assert_eq!(sem.getvalue().unwrap(), 1);

    named::close(reopened).unwrap();
    named::close(sem).unwrap();
    named::unlink("/q").unwrap();
    assert!(matches!(named::open("/q", 0, 0), Err(e) if e == errno::ENOENT));
    assert_eq!(errno::get_errno(), errno::ENOENT);
}

#[test]
fn unlink_while_open_defers_teardown() {
    boot();
    let sem = named::open("/d", O_CREAT, 1).unwrap();
    named::unlink("/d").unwrap();

    // The name is gone immediately, but our handle still works.
    assert!(matches!(named::open("/d", 0, 0), Err(e) if e == errno::ENOENT));
    sem.wait().unwrap();
    sem.post().unwrap();

    named::close(sem).unwrap();
    // Fully gone: recreating starts fresh.
    let fresh = named::open("/d", O_CREAT | O_EXCL, 0).unwrap();
    assert_eq!(fresh.getvalue().unwrap(), 0);
    named::close(fresh).unwrap();
    named::unlink("/d").unwrap();
}

#[test]
fn excl_create_of_existing_name_is_eexist() {
    boot();
    let sem = named::open("/x", O_CREAT, 0).unwrap();
    assert!(matches!(
        named::open("/x", O_CREAT | O_EXCL, 0),
        Err(e) if e == errno::EEXIST
    ));
    named::close(sem).unwrap();
    named::unlink("/x").unwrap();
}

#[test]
fn name_validation_errors() {
    boot();
    assert!(matches!(named::open("noslash", O_CREAT, 0), Err(e) if e == errno::EINVAL));
    assert!(matches!(named::open("/", O_CREAT, 0), Err(e) if e == errno::EINVAL));
    assert!(matches!(named::open("/_sys", O_CREAT, 0), Err(e) if e == errno::ENOENT));
    assert!(matches!(
        named::open("/toolong", O_CREAT, 0),
        Err(e) if e == errno::ENAMETOOLONG
    ));
    assert!(matches!(
        named::open("/v", O_CREAT, SEM_VALUE_MAX as u32 + 1),
        Err(e) if e == errno::EINVAL
    ));
    assert!(matches!(named::unlink("/none"), Err(e) if e == errno::ENOENT));
}

#[test]
fn clockwait_in_slot_mode_honors_deadline() {
    boot();
    let sem = Sem::new();
    sem.init(0, 1).unwrap();
    // Token available: returns at once even with a generous deadline.
    let deadline = now(ClockId::Monotonic).plus_millis(5_000);
    let start = std::time::Instant::now();
    sem.clockwait(1, &deadline).unwrap();
    assert!(start.elapsed() < std::time::Duration::from_millis(500));
    sem.destroy().unwrap();
}

#[test]
fn destroy_clears_slot_identity() {
    boot();
    let sem = Sem::new();
    sem.init(0, 1).unwrap();
    sem.destroy().unwrap();
    assert_eq!(sem.wait(), Err(errno::EINVAL));
}
