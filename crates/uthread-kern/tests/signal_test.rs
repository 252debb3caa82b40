//! Per-thread signals: masks, targeted kill, wait/timedwait, broadcast,
//! pending queries, and alarms.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use uthread_core::errno;
use uthread_core::pthread::signal::{self, SigSet};
use uthread_core::pthread::thread;

const SIGUSR: i32 = 10;
const SIGALRM: i32 = 14;

fn boot() {
    uthread_kern::boot();
}

#[test]
fn pending_signal_is_consumed_by_wait() {
    boot();
    let tid = thread::create(None, || {
        let mut set = SigSet::empty();
        set.add(SIGUSR).unwrap();
        // Nothing pending yet: polling returns EAGAIN.
        assert_eq!(signal::sigtimedwait(&set, 0), Err(errno::EAGAIN));
        let me = thread::current();
        signal::kill(me, SIGUSR).unwrap();
        assert!(signal::pending().unwrap().has(SIGUSR));
        let got = signal::sigwait(&set).unwrap();
        assert!(!signal::pending().unwrap().has(SIGUSR));
        got as usize
    })
    .unwrap();
    assert_eq!(thread::join(tid).unwrap(), SIGUSR as usize);
}

#[test]
fn kill_wakes_blocked_sigwaiter() {
    boot();
    let tid = thread::create(None, || {
        let mut set = SigSet::empty();
        set.add(SIGUSR).unwrap();
        signal::sigwait(&set).unwrap() as usize
    })
    .unwrap();

    let _ = thread::sleep_ms(50);
    signal::kill(tid, SIGUSR).unwrap();
    assert_eq!(thread::join(tid).unwrap(), SIGUSR as usize);
}

#[test]
fn sigtimedwait_expires_with_eagain() {
    boot();
    let tid = thread::create(None, || {
        let mut set = SigSet::empty();
        set.add(SIGUSR).unwrap();
        let start = std::time::Instant::now();
        let result = signal::sigtimedwait(&set, 50);
        assert!(start.elapsed() >= std::time::Duration::from_millis(40));
        match result {
            Err(e) => e as usize,
            Ok(_) => 0,
        }
    })
    .unwrap();
    assert_eq!(thread::join(tid).unwrap(), errno::EAGAIN as usize);
}

#[test]
fn mask_block_and_unblock_roundtrip() {
    boot();
    let tid = thread::create(None, || {
        let mut set = SigSet::empty();
        set.add(SIGUSR).unwrap();
        set.add(SIGALRM).unwrap();
        signal::sigmask(signal::HOW_BLOCK, Some(&set), None).unwrap();

        let mut observed = SigSet::empty();
        signal::sigmask(signal::HOW_BLOCK, None, Some(&mut observed)).unwrap();
        assert!(observed.has(SIGUSR) && observed.has(SIGALRM));

        let mut drop_usr = SigSet::empty();
        drop_usr.add(SIGUSR).unwrap();
        signal::sigmask(signal::HOW_UNBLOCK, Some(&drop_usr), None).unwrap();

        let mut observed = SigSet::empty();
        signal::sigmask(signal::HOW_SETMASK, Some(&SigSet::empty()), Some(&mut observed)).unwrap();
        assert!(!observed.has(SIGUSR) && observed.has(SIGALRM));
        0
    })
    .unwrap();
    assert_eq!(thread::join(tid).unwrap(), 0);
}

#[test]
fn invalid_how_is_einval() {
    boot();
    let set = SigSet::empty();
    assert_eq!(signal::sigmask(99, Some(&set), None), Err(errno::EINVAL));
}

#[test]
fn broadcast_reaches_every_sigwaiter() {
    boot();
    let woken = Arc::new(AtomicUsize::new(0));
    let mut tids = Vec::new();
    for _ in 0..3 {
        let woken = Arc::clone(&woken);
        tids.push(
            thread::create(None, move || {
                let mut set = SigSet::empty();
                set.add(SIGUSR).unwrap();
                let sig = signal::sigwait(&set).unwrap();
                assert_eq!(sig, SIGUSR);
                woken.fetch_add(1, Ordering::SeqCst);
                0
            })
            .unwrap(),
        );
    }

    let _ = thread::sleep_ms(60);
    signal::kill_all(SIGUSR).unwrap();
    for tid in tids {
        thread::join(tid).unwrap();
    }
    assert_eq!(woken.load(Ordering::SeqCst), 3);
}

#[test]
fn alarm_delivers_sigalrm_to_target_thread() {
    boot();
    let tid = thread::create(None, || {
        let me = thread::current();
        signal::alarm_thread(me, 30).unwrap();
        let mut set = SigSet::empty();
        set.add(SIGALRM).unwrap();
        signal::sigwait(&set).unwrap() as usize
    })
    .unwrap();
    assert_eq!(thread::join(tid).unwrap(), SIGALRM as usize);
}

#[test]
fn kill_unknown_thread_is_esrch() {
    boot();
    assert_eq!(signal::kill(987_654, SIGUSR), Err(errno::ESRCH));
}

#[test]
fn handler_registration_is_accepted() {
    boot();
    fn on_usr(_sig: i32) {}
    signal::handler(SIGUSR, on_usr).unwrap();
    signal::handler_arg(SIGUSR, 42).unwrap();
    assert_eq!(signal::handler(0, on_usr), Err(errno::EINVAL));
}

#[test]
fn mode_toggles_and_reports_previous() {
    boot();
    let was = signal::mode(true).unwrap();
    assert_eq!(signal::mode(true).unwrap(), true);
    let _ = signal::mode(was).unwrap();
}
