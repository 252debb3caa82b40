//! Per-thread signals.
//!
//! Masks, targeted and broadcast delivery, and synchronous consumption via
//! `sigwait`/`sigtimedwait`. Delivery is pull-based: pending bits accumulate
//! per thread and a waiter consumes one matching signal at a time.

use crate::errno;
use crate::pthread::thread::{Tid, check_cancel};
use crate::syscall::{
    SIG_ALARM, SIG_ALARM_THREAD, SIG_BLOCK, SIG_BROADCAST, SIG_GETMASK, SIG_HANDLER,
    SIG_HANDLER_ARG, SIG_KILL, SIG_MODE, SIG_PAUSE, SIG_PENDING, SIG_SETMASK, SIG_UNBLOCK,
    SIG_WAIT, sys_signal, syscall_result,
};

/// Number of signals; valid signal numbers are `1..NSIG`.
pub const NSIG: i32 = 32;

/// Wait forever.
pub const TIMEOUT_INFINITE: i64 = -1;

/// `sigmask` how-values.
pub const HOW_BLOCK: i32 = 0;
pub const HOW_UNBLOCK: i32 = 1;
pub const HOW_SETMASK: i32 = 2;

/// Returns true if `sig` is a deliverable signal number.
#[must_use]
pub const fn valid_signal(sig: i32) -> bool {
    sig >= 1 && sig < NSIG
}

/// A set of signals, one bit per signal number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SigSet {
    bits: u64,
}

impl SigSet {
    /// The empty set.
    #[must_use]
    pub const fn empty() -> Self {
        SigSet { bits: 0 }
    }

    /// Every deliverable signal.
    #[must_use]
    pub const fn filled() -> Self {
        SigSet {
            bits: (1u64 << NSIG) - 2,
        }
    }

    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        SigSet { bits }
    }

    #[must_use]
    pub const fn bits(&self) -> u64 {
        self.bits
    }

    pub fn add(&mut self, sig: i32) -> Result<(), i32> {
        if !valid_signal(sig) {
            return Err(errno::EINVAL);
        }
        self.bits |= 1u64 << sig;
        Ok(())
    }

    pub fn del(&mut self, sig: i32) -> Result<(), i32> {
        if !valid_signal(sig) {
            return Err(errno::EINVAL);
        }
        self.bits &= !(1u64 << sig);
        Ok(())
    }

    #[must_use]
    pub fn has(&self, sig: i32) -> bool {
        valid_signal(sig) && self.bits & (1u64 << sig) != 0
    }
}

// -------------------------------------------------------------------------
// Mask operations
// -------------------------------------------------------------------------

/// Adjust the calling thread's signal mask.
///
/// `how` selects block/unblock/replace; the previous mask is written to
/// `old` when requested. Passing no set just reads the mask.
pub fn sigmask(how: i32, set: Option<&SigSet>, old: Option<&mut SigSet>) -> Result<(), i32> {
    if let Some(old) = old {
        let mask = syscall_result(sys_signal(SIG_GETMASK, 0, 0))?;
        *old = SigSet::from_bits(mask as u64);
    }
    let Some(set) = set else {
        return Ok(());
    };
    let op = match how {
        HOW_BLOCK => SIG_BLOCK,
        HOW_UNBLOCK => SIG_UNBLOCK,
        HOW_SETMASK => SIG_SETMASK,
        _ => return Err(errno::EINVAL),
    };
    syscall_result(sys_signal(op, set.bits() as i64, 0)).map(|_| ())
}

/// The calling thread's pending set.
pub fn pending() -> Result<SigSet, i32> {
    let bits = syscall_result(sys_signal(SIG_PENDING, 0, 0))?;
    Ok(SigSet::from_bits(bits as u64))
}

// -------------------------------------------------------------------------
// Delivery
// -------------------------------------------------------------------------

/// Deliver `sig` to a specific thread.
pub fn kill(tid: Tid, sig: i32) -> Result<(), i32> {
    if tid <= 0 || !valid_signal(sig) {
        return Err(errno::EINVAL);
    }
    syscall_result(sys_signal(SIG_KILL, tid, i64::from(sig))).map(|_| ())
}

/// Deliver `sig` to every live thread in the process.
pub fn kill_all(sig: i32) -> Result<(), i32> {
    if !valid_signal(sig) {
        return Err(errno::EINVAL);
    }
    syscall_result(sys_signal(SIG_BROADCAST, i64::from(sig), 0)).map(|_| ())
}

/// Block until one of `set`'s signals is pending; consume and return it.
/// A cancellation point.
pub fn sigwait(set: &SigSet) -> Result<i32, i32> {
    let ret = sys_signal(SIG_WAIT, set.bits() as i64, TIMEOUT_INFINITE);
    syscall_result(check_cancel(ret)).map(|sig| sig as i32)
}

/// [`sigwait`] bounded by a relative timeout in milliseconds
/// ([`TIMEOUT_INFINITE`] waits forever). `EAGAIN` on timeout.
pub fn sigtimedwait(set: &SigSet, timeout_ms: i64) -> Result<i32, i32> {
    let ret = sys_signal(SIG_WAIT, set.bits() as i64, timeout_ms);
    syscall_result(check_cancel(ret)).map(|sig| sig as i32)
}

/// Block until any unblocked signal arrives.
pub fn pause() -> Result<i32, i32> {
    let ret = sys_signal(SIG_PAUSE, 0, 0);
    syscall_result(check_cancel(ret)).map(|sig| sig as i32)
}

// -------------------------------------------------------------------------
// Handlers & alarms
// -------------------------------------------------------------------------

/// Register a handler for `sig`; delivery remains pull-based (the handler is
/// recorded for the process, queried by the kernel's delivery machinery).
pub fn handler(sig: i32, f: fn(i32)) -> Result<(), i32> {
    if !valid_signal(sig) {
        return Err(errno::EINVAL);
    }
    syscall_result(sys_signal(SIG_HANDLER, i64::from(sig), f as usize as i64)).map(|_| ())
}

/// Register a handler argument word for `sig`.
pub fn handler_arg(sig: i32, arg: usize) -> Result<(), i32> {
    if !valid_signal(sig) {
        return Err(errno::EINVAL);
    }
    syscall_result(sys_signal(SIG_HANDLER_ARG, i64::from(sig), arg as i64)).map(|_| ())
}

/// Deliver SIGALRM to the initial thread after `ms` milliseconds.
pub fn alarm(ms: i64) -> Result<(), i32> {
    syscall_result(sys_signal(SIG_ALARM, ms, 0)).map(|_| ())
}

/// Deliver SIGALRM to `tid` after `ms` milliseconds.
pub fn alarm_thread(tid: Tid, ms: i64) -> Result<(), i32> {
    if tid <= 0 {
        return Err(errno::EINVAL);
    }
    syscall_result(sys_signal(SIG_ALARM_THREAD, tid, ms)).map(|_| ())
}

/// Enable or disable thread-directed signals process-wide; returns the
/// previous mode.
pub fn mode(enabled: bool) -> Result<bool, i32> {
    syscall_result(sys_signal(SIG_MODE, i64::from(enabled), 0)).map(|old| old != 0)
}
