//! Thread lifecycle.
//!
//! Creation goes through the kernel's dedicated spawn trap; everything else
//! (join, detach, cancellation, naming, sleep) rides the CTRL and SYNC
//! dispatcher tables.
//!
//! ## Exit and cancellation
//!
//! `exit` and delivered cancellation both unwind to the thread trampoline,
//! which drains the kernel-held cleanup stack and then issues CTRL EXIT; the
//! kernel runs TSD destructors in the exiting thread's context and parks the
//! thread as a ZOMBIE until join or detach reaps it. A cancelled thread's
//! return value is the all-ones sentinel ([`CANCELED_RETVAL`]).
//!
//! Deferred cancellation is delivered at `test_cancel` and at blocking
//! dispatcher returns: any blocking wrapper that sees `-ECANCELED` calls
//! [`check_cancel`], which starts the unwind.

use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};

use crate::errno;
use crate::pthread::attr::ThreadAttr;
use crate::pthread::cleanup;
use crate::syscall::{
    CTRL_CANCEL, CTRL_EXIT, CTRL_GETID, CTRL_GETNAME, CTRL_IS_INITIAL, CTRL_IS_MULTITHREADED,
    CTRL_SETCANCELSTATE, CTRL_SETCANCELTYPE, CTRL_SETNAME, CTRL_STATUS, CTRL_TESTCANCEL,
    SYNC_DETACH, SYNC_JOIN, SYNC_SLEEP, SYNC_TRYJOIN, SYNC_YIELD, kernel, sys_ctrl, sys_sync,
    syscall_result,
};

/// Opaque thread id. Positive for live threads; 0 is never a valid id.
pub type Tid = i64;

/// Cancellation can be delivered (default).
pub const CANCEL_ENABLE: i32 = 0;
/// Cancellation is held pending.
pub const CANCEL_DISABLE: i32 = 1;
/// Cancellation is delivered only at cancellation points (default).
pub const CANCEL_DEFERRED: i32 = 0;
/// Cancellation may be delivered at any kernel-chosen point.
pub const CANCEL_ASYNCHRONOUS: i32 = 1;

/// Return value observed by joiners of a cancelled thread (`(void *)-1`).
pub const CANCELED_RETVAL: usize = usize::MAX;

/// Longest thread name, excluding the terminator.
pub const NAME_MAX: usize = 15;

/// Thread state bits reported by CTRL STATUS.
pub const STATE_RUNNING: i64 = 0x0001;
pub const STATE_READY: i64 = 0x0002;
pub const STATE_BLOCKED: i64 = 0x0004;
pub const STATE_STOPPED: i64 = 0x0008;
pub const STATE_ZOMBIE: i64 = 0x0010;
pub const STATE_DEAD: i64 = 0x0020;

// -------------------------------------------------------------------------
// Unwind payloads
// -------------------------------------------------------------------------

/// Payload carried by an `exit` unwind.
struct ExitPayload(usize);

/// Payload carried by a cancellation unwind.
struct CancelPayload;

/// Begin the cancellation unwind for the calling thread.
pub(crate) fn unwind_cancel() -> ! {
    resume_unwind(Box::new(CancelPayload))
}

/// Deliver pending cancellation surfaced by a blocking trap.
///
/// Blocking wrappers at cancellation points pass their raw dispatcher return
/// through here; `-ECANCELED` starts the unwind, everything else passes
/// through untouched.
pub(crate) fn check_cancel(ret: i64) -> i64 {
    if ret == -i64::from(errno::ECANCELED) {
        unwind_cancel();
    }
    ret
}

// -------------------------------------------------------------------------
// Trampoline
// -------------------------------------------------------------------------

type StartRoutine = Box<dyn FnOnce() -> usize + Send + 'static>;

/// Entry point the kernel runs for every created thread.
///
/// Catches the exit/cancel unwind, drains cleanup handlers, and reports the
/// return value through CTRL EXIT. An escaped user panic is treated like
/// cancellation: the thread dies with the sentinel return value instead of
/// taking the process down.
fn thread_trampoline(raw: usize) -> usize {
    // SAFETY: `raw` came from Box::into_raw in `create` and is consumed
    // exactly once, here.
    let start = unsafe { *Box::from_raw(raw as *mut StartRoutine) };

    let outcome = catch_unwind(AssertUnwindSafe(start));
    let retval = match outcome {
        Ok(value) => value,
        Err(payload) => match payload.downcast::<ExitPayload>() {
            Ok(exit) => exit.0,
            Err(payload) => {
                drop(payload);
                CANCELED_RETVAL
            }
        },
    };

    cleanup::run_all();
    sys_ctrl(CTRL_EXIT, retval as i64, 0);
    retval
}

// -------------------------------------------------------------------------
// Lifecycle
// -------------------------------------------------------------------------

/// Create a thread running `start`; returns its id.
///
/// The kernel's ENOMEM (no stack, no table slot) is surfaced as `EAGAIN`.
pub fn create<F>(attr: Option<&ThreadAttr>, start: F) -> Result<Tid, i32>
where
    F: FnOnce() -> usize + Send + 'static,
{
    let attrs = attr.copied().unwrap_or_default().to_spawn_attrs();
    let boxed: Box<StartRoutine> = Box::new(Box::new(start));
    let raw = Box::into_raw(boxed) as usize;

    let tid = kernel().spawn(thread_trampoline, raw, attrs);
    if tid < 0 {
        // SAFETY: the kernel rejected the spawn, so the trampoline will never
        // run and ownership of the box is back with us.
        drop(unsafe { Box::from_raw(raw as *mut StartRoutine) });
        return Err(match -tid as i32 {
            errno::ENOMEM => errno::EAGAIN,
            errno::EINVAL => errno::EINVAL,
            _ => errno::EAGAIN,
        });
    }
    Ok(tid)
}

/// Terminate the calling thread with `retval`. Never returns.
pub fn exit(retval: usize) -> ! {
    resume_unwind(Box::new(ExitPayload(retval)))
}

/// Wait for `tid` to terminate and reap it; returns its exit value.
///
/// Errors: `ESRCH` (unknown id), `EINVAL` (detached or already reaped),
/// `EDEADLK` (self-join). Join is a cancellation point.
pub fn join(tid: Tid) -> Result<usize, i32> {
    let mut retval: i64 = 0;
    let ret = sys_sync(SYNC_JOIN, tid, &mut retval as *mut i64 as usize as i64, 0);
    syscall_result(check_cancel(ret))?;
    Ok(retval as usize)
}

/// Non-blocking join: `EBUSY` while the target is still live.
pub fn try_join(tid: Tid) -> Result<usize, i32> {
    let mut retval: i64 = 0;
    let ret = sys_sync(SYNC_TRYJOIN, tid, &mut retval as *mut i64 as usize as i64, 0);
    syscall_result(ret)?;
    Ok(retval as usize)
}

/// Mark `tid` unjoinable; its resources are reclaimed on exit.
pub fn detach(tid: Tid) -> Result<(), i32> {
    syscall_result(sys_sync(SYNC_DETACH, tid, 0, 0)).map(|_| ())
}

/// The calling thread's id.
pub fn current() -> Tid {
    sys_ctrl(CTRL_GETID, 0, 0)
}

/// Thread-id equality.
#[must_use]
pub fn equal(a: Tid, b: Tid) -> bool {
    a == b
}

/// Yield the processor to another runnable thread.
pub fn yield_now() {
    sys_sync(SYNC_YIELD, 0, 0, 0);
}

/// Sleep for `ms` milliseconds. A cancellation point.
pub fn sleep_ms(ms: i64) -> Result<(), i32> {
    let ret = sys_sync(SYNC_SLEEP, ms, 0, 0);
    syscall_result(check_cancel(ret)).map(|_| ())
}

/// Millisecond sleep with the C extension's name.
pub fn msleep(ms: i64) -> Result<(), i32> {
    sleep_ms(ms)
}

/// Raw state bits (STATE_*) for `tid`.
pub fn status(tid: Tid) -> Result<i64, i32> {
    syscall_result(sys_ctrl(CTRL_STATUS, tid, 0))
}

// -------------------------------------------------------------------------
// Naming
// -------------------------------------------------------------------------

/// Set the name of `tid`. Names longer than [`NAME_MAX`] bytes are `ERANGE`.
pub fn setname(tid: Tid, name: &str) -> Result<(), i32> {
    if name.len() > NAME_MAX {
        return Err(errno::ERANGE);
    }
    let mut buf = [0u8; NAME_MAX + 1];
    buf[..name.len()].copy_from_slice(name.as_bytes());
    let ret = sys_ctrl(CTRL_SETNAME, tid, buf.as_ptr() as usize as i64);
    syscall_result(ret).map(|_| ())
}

/// Read the name of `tid`.
pub fn getname(tid: Tid) -> Result<String, i32> {
    let mut buf = [0u8; NAME_MAX + 1];
    let ret = sys_ctrl(CTRL_GETNAME, tid, buf.as_mut_ptr() as usize as i64);
    syscall_result(ret)?;
    let len = buf.iter().position(|&b| b == 0).unwrap_or(NAME_MAX);
    Ok(String::from_utf8_lossy(&buf[..len]).into_owned())
}

// -------------------------------------------------------------------------
// Cancellation
// -------------------------------------------------------------------------

/// Request cancellation of `tid`.
pub fn cancel(tid: Tid) -> Result<(), i32> {
    syscall_result(sys_ctrl(CTRL_CANCEL, tid, 0)).map(|_| ())
}

/// Set the calling thread's cancel state; returns the previous state.
pub fn setcancelstate(state: i32) -> Result<i32, i32> {
    if state != CANCEL_ENABLE && state != CANCEL_DISABLE {
        return Err(errno::EINVAL);
    }
    syscall_result(sys_ctrl(CTRL_SETCANCELSTATE, i64::from(state), 0)).map(|old| old as i32)
}

/// Set the calling thread's cancel type; returns the previous type.
pub fn setcanceltype(kind: i32) -> Result<i32, i32> {
    if kind != CANCEL_DEFERRED && kind != CANCEL_ASYNCHRONOUS {
        return Err(errno::EINVAL);
    }
    syscall_result(sys_ctrl(CTRL_SETCANCELTYPE, i64::from(kind), 0)).map(|old| old as i32)
}

/// Deliver any pending cancellation at this explicit point.
pub fn test_cancel() {
    if sys_ctrl(CTRL_TESTCANCEL, 0, 0) == 1 {
        unwind_cancel();
    }
}

// -------------------------------------------------------------------------
// Process-wide queries
// -------------------------------------------------------------------------

/// True if the caller is the process's initial thread.
pub fn is_initial_thread() -> bool {
    sys_ctrl(CTRL_IS_INITIAL, 0, 0) != 0
}

/// True once the process has ever created a thread.
///
/// This is a kernel flag, not a cached user-space boolean: a stale cache
/// would misroute the dual-mode semaphore after the first create.
pub fn is_multithreaded() -> bool {
    sys_ctrl(CTRL_IS_MULTITHREADED, 0, 0) != 0
}
