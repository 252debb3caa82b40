//! Thread lifecycle against the reference kernel: create/join/detach,
//! try-join, self-join, naming, and the multithreaded flag.

use uthread_core::errno;
use uthread_core::pthread::attr::{STACK_MIN, ThreadAttr};
use uthread_core::pthread::thread;

fn boot() {
    uthread_kern::boot();
}

#[test]
fn create_and_join_returns_value() {
    boot();
    let tid = thread::create(None, || 0xDEAD_BEEF_usize).unwrap();
    assert!(tid > 0, "thread ids are positive");
    assert_eq!(thread::join(tid).unwrap(), 0xDEAD_BEEF);
}

#[test]
fn exit_value_reaches_joiner() {
    boot();
    let tid = thread::create(None, || {
        thread::exit(41);
    })
    .unwrap();
    assert_eq!(thread::join(tid).unwrap(), 41);
}

#[test]
fn join_unknown_thread_is_esrch() {
    boot();
    assert_eq!(thread::join(999_999), Err(errno::ESRCH));
}

#[test]
fn self_join_is_edeadlk() {
    boot();
    let tid = thread::create(None, || {
        let me = thread::current();
        assert_eq!(thread::join(me), Err(errno::EDEADLK));
        7
    })
    .unwrap();
    assert_eq!(thread::join(tid).unwrap(), 7);
}

#[test]
fn try_join_busy_then_succeeds() {
    boot();
    let tid = thread::create(None, || {
        let _ = thread::sleep_ms(100);
        13
    })
    .unwrap();
    assert_eq!(thread::try_join(tid), Err(errno::EBUSY));
    loop {
        match thread::try_join(tid) {
            Ok(v) => {
                assert_eq!(v, 13);
                break;
            }
            Err(e) => {
                assert_eq!(e, errno::EBUSY);
                thread::yield_now();
            }
        }
    }
}

#[test]
fn join_after_detach_is_einval() {
    boot();
    let tid = thread::create(None, || {
        let _ = thread::sleep_ms(50);
        0
    })
    .unwrap();
    thread::detach(tid).unwrap();
    assert_eq!(thread::join(tid), Err(errno::EINVAL));
    assert_eq!(thread::detach(tid), Err(errno::EINVAL));
}

#[test]
fn detached_at_create_is_unjoinable() {
    boot();
    let mut attr = ThreadAttr::new();
    attr.set_detach_state(uthread_core::pthread::attr::CREATE_DETACHED)
        .unwrap();
    let tid = thread::create(Some(&attr), || {
        let _ = thread::sleep_ms(200);
        0
    })
    .unwrap();
    assert_eq!(thread::join(tid), Err(errno::EINVAL));
}

#[test]
fn stack_size_floor_applies_to_attr() {
    let mut attr = ThreadAttr::new();
    assert_eq!(attr.set_stack_size(STACK_MIN - 1), Err(errno::EINVAL));
    attr.set_stack_size(STACK_MIN).unwrap();
    boot();
    let tid = thread::create(Some(&attr), || 5).unwrap();
    assert_eq!(thread::join(tid).unwrap(), 5);
}

#[test]
fn name_round_trips_with_nul_termination() {
    boot();
    let tid = thread::create(None, || {
        let _ = thread::sleep_ms(100);
        0
    })
    .unwrap();
    thread::setname(tid, "worker-a").unwrap();
    assert_eq!(thread::getname(tid).unwrap(), "worker-a");

    // 15 characters is the ceiling; 16 overflows.
    thread::setname(tid, "exactly15chars!").unwrap();
    assert_eq!(thread::getname(tid).unwrap(), "exactly15chars!");
    assert_eq!(thread::setname(tid, "sixteen-chars-xx"), Err(errno::ERANGE));

    thread::join(tid).unwrap();
}

#[test]
fn equal_and_current() {
    boot();
    let me = thread::current();
    assert!(me > 0);
    assert!(thread::equal(me, thread::current()));
}

#[test]
fn multithreaded_flag_latches() {
    boot();
    let tid = thread::create(None, || 0).unwrap();
    thread::join(tid).unwrap();
    assert!(thread::is_multithreaded());
}

#[test]
fn status_reports_zombie_before_reap() {
    boot();
    let tid = thread::create(None, || {
        let _ = thread::sleep_ms(300);
        0
    })
    .unwrap();
    assert_eq!(thread::status(tid).unwrap(), thread::STATE_RUNNING);
    std::thread::sleep(std::time::Duration::from_millis(600));
    assert_eq!(thread::status(tid).unwrap(), thread::STATE_ZOMBIE);
    thread::join(tid).unwrap();
    assert_eq!(thread::status(tid), Err(errno::ESRCH));
}

#[test]
fn msleep_returns_after_interval() {
    boot();
    let start = std::time::Instant::now();
    thread::msleep(30).unwrap();
    assert!(start.elapsed() >= std::time::Duration::from_millis(25));
}
