//! Scheduling parameters.
//!
//! Thin forwarding over the SCHED trap family. The kernel owns the actual
//! scheduler; this layer validates and marshals. Concurrency hints are
//! fixed-function on a uniprocessor.

use crate::errno;
use crate::pthread::attr::valid_policy;
use crate::pthread::thread::{self, Tid};
use crate::syscall::{
    SCHED_GET_TIMESLICE, SCHED_GETPARAM, SCHED_GETRRINTERVAL, SCHED_SET_TIMESLICE, SCHED_SETPARAM,
    sys_sched, syscall_result,
};

/// Scheduling parameters for a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedParam {
    pub priority: i32,
}

/// Set `tid`'s policy and priority.
pub fn setschedparam(tid: Tid, policy: i32, param: SchedParam) -> Result<(), i32> {
    if !valid_policy(policy) {
        return Err(errno::EINVAL);
    }
    let ret = sys_sched(SCHED_SETPARAM, tid, i64::from(policy), i64::from(param.priority));
    syscall_result(ret).map(|_| ())
}

/// Read `tid`'s policy and priority.
pub fn getschedparam(tid: Tid) -> Result<(i32, SchedParam), i32> {
    let mut policy: i64 = 0;
    let mut priority: i64 = 0;
    let ret = sys_sched(
        SCHED_GETPARAM,
        tid,
        &mut policy as *mut i64 as usize as i64,
        &mut priority as *mut i64 as usize as i64,
    );
    syscall_result(ret)?;
    Ok((
        policy as i32,
        SchedParam {
            priority: priority as i32,
        },
    ))
}

/// Change only the priority, keeping the current policy.
pub fn setschedprio(tid: Tid, priority: i32) -> Result<(), i32> {
    let (policy, _) = getschedparam(tid)?;
    setschedparam(tid, policy, SchedParam { priority })
}

/// Round-robin interval in milliseconds.
pub fn rr_interval() -> Result<i64, i32> {
    syscall_result(sys_sched(SCHED_GETRRINTERVAL, 0, 0, 0))
}

/// Set the caller's timeslice in milliseconds.
pub fn set_timeslice(ms: i64) -> Result<(), i32> {
    if ms <= 0 {
        return Err(errno::EINVAL);
    }
    syscall_result(sys_sched(SCHED_SET_TIMESLICE, ms, 0, 0)).map(|_| ())
}

/// The caller's timeslice in milliseconds.
pub fn get_timeslice() -> Result<i64, i32> {
    syscall_result(sys_sched(SCHED_GET_TIMESLICE, 0, 0, 0))
}

/// The process's concurrency level. Always 1: the host is uniprocessor.
#[must_use]
pub fn get_concurrency() -> i32 {
    1
}

/// Concurrency hints are accepted and ignored on a uniprocessor.
pub fn set_concurrency(_level: i32) -> Result<(), i32> {
    Ok(())
}

/// Give up the processor.
pub fn sched_yield() {
    thread::yield_now();
}
