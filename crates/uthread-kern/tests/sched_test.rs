//! Scheduling parameter plumbing through the SCHED trap family.

use uthread_core::errno;
use uthread_core::pthread::attr::{SCHED_OTHER, SCHED_RR};
use uthread_core::pthread::sched::{self, SchedParam};
use uthread_core::pthread::thread;

fn boot() {
    uthread_kern::boot();
}

#[test]
fn setparam_getparam_roundtrip() {
    boot();
    let me = thread::current();
    sched::setschedparam(me, SCHED_RR, SchedParam { priority: 5 }).unwrap();
    let (policy, param) = sched::getschedparam(me).unwrap();
    assert_eq!(policy, SCHED_RR);
    assert_eq!(param.priority, 5);
}

#[test]
fn setschedprio_keeps_policy() {
    boot();
    let me = thread::current();
    sched::setschedparam(me, SCHED_OTHER, SchedParam { priority: 1 }).unwrap();
    sched::setschedprio(me, 9).unwrap();
    let (policy, param) = sched::getschedparam(me).unwrap();
    assert_eq!(policy, SCHED_OTHER);
    assert_eq!(param.priority, 9);
}

#[test]
fn unknown_thread_is_esrch() {
    boot();
    assert_eq!(
        sched::setschedparam(876_543, SCHED_OTHER, SchedParam::default()),
        Err(errno::ESRCH)
    );
    assert_eq!(sched::getschedparam(876_543), Err(errno::ESRCH));
}

#[test]
fn invalid_policy_is_einval() {
    boot();
    let me = thread::current();
    assert_eq!(
        sched::setschedparam(me, 7, SchedParam::default()),
        Err(errno::EINVAL)
    );
}

#[test]
fn timeslice_and_rr_interval_agree() {
    boot();
    sched::set_timeslice(25).unwrap();
    assert_eq!(sched::get_timeslice().unwrap(), 25);
    assert_eq!(sched::rr_interval().unwrap(), 25);
    assert_eq!(sched::set_timeslice(0), Err(errno::EINVAL));
    // Restore the default so parallel suites see a sane value.
    sched::set_timeslice(20).unwrap();
}

#[test]
fn yield_and_concurrency_helpers() {
    boot();
    sched::sched_yield();
    assert_eq!(sched::get_concurrency(), 1);
    sched::set_concurrency(4).unwrap();
}

#[test]
fn attr_policy_flows_to_spawned_thread() {
    boot();
    let mut attr = uthread_core::pthread::attr::ThreadAttr::new();
    attr.set_policy(SCHED_RR).unwrap();
    attr.set_priority(3).unwrap();
    let tid = thread::create(Some(&attr), || {
        let _ = thread::sleep_ms(80);
        0
    })
    .unwrap();
    let (policy, param) = sched::getschedparam(tid).unwrap();
    assert_eq!(policy, SCHED_RR);
    assert_eq!(param.priority, 3);
    thread::join(tid).unwrap();
}
