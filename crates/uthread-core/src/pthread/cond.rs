//! Condition variables.
//!
//! A cv is valid iff its magic word is intact and it has not been destroyed;
//! the magic catches use-after-destroy and type confusion before the kernel
//! ever sees the handle. Wait atomically enqueues the caller and releases the
//! mutex in the kernel, and reacquires the mutex before returning. Spurious
//! wakeups are permitted — callers re-test their predicate in a loop.

use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, Ordering};

use crate::errno;
use crate::pthread::mutex::Mutex;
use crate::pthread::thread::check_cancel;
use crate::syscall::{
    SYNC_COND_BROADCAST, SYNC_COND_DESTROY, SYNC_COND_INIT, SYNC_COND_SIGNAL, SYNC_COND_TIMEDWAIT,
    SYNC_COND_WAIT, sys_sync, syscall_result,
};
use crate::time::{ClockId, TimeSpec, deadline_expired, deadline_to_ms};

/// Liveness magic stored in every initialized cv.
pub const CONDVAR_MAGIC: u32 = 0xC0DE_C0DE;

/// Timed waits measure against CLOCK_REALTIME (default).
pub const COND_CLOCK_REALTIME: i32 = 0;
/// Timed waits measure against CLOCK_MONOTONIC.
pub const COND_CLOCK_MONOTONIC: i32 = 1;

/// Returns true if `clock_id` is a recognized condition variable clock.
#[must_use]
pub const fn valid_cond_clock(clock_id: i32) -> bool {
    matches!(clock_id, COND_CLOCK_REALTIME | COND_CLOCK_MONOTONIC)
}

/// A kernel-backed condition variable.
#[derive(Debug)]
pub struct Cond {
    handle: AtomicI64,
    magic: AtomicU32,
    destroyed: AtomicI32,
}

impl Default for Cond {
    fn default() -> Self {
        Cond::new()
    }
}

impl Cond {
    /// An uninitialized cv; call [`Cond::init`] before use.
    #[must_use]
    pub const fn new() -> Self {
        Cond {
            handle: AtomicI64::new(0),
            magic: AtomicU32::new(0),
            destroyed: AtomicI32::new(0),
        }
    }

    fn validate(&self) -> Result<i64, i32> {
        let live = self.magic.load(Ordering::Acquire) == CONDVAR_MAGIC
            && self.destroyed.load(Ordering::Acquire) == 0;
        if !live {
            return Err(errno::EINVAL);
        }
        match self.handle.load(Ordering::Acquire) {
            0 => Err(errno::EINVAL),
            h => Ok(h),
        }
    }

    /// Initialize the cv. Re-initializing a live cv is `EBUSY`.
    pub fn init(&self) -> Result<(), i32> {
        if self.validate().is_ok() {
            return Err(errno::EBUSY);
        }
        let handle = syscall_result(sys_sync(SYNC_COND_INIT, 0, 0, 0))?;
        self.handle.store(handle, Ordering::Release);
        self.destroyed.store(0, Ordering::Release);
        self.magic.store(CONDVAR_MAGIC, Ordering::Release);
        Ok(())
    }

    /// Release `mutex`, wait for a wakeup, reacquire `mutex`. A cancellation
    /// point; the mutex is reacquired before cancellation unwinds.
    pub fn wait(&self, mutex: &Mutex) -> Result<(), i32> {
        let handle = self.validate()?;
        let mh = mutex.raw_handle();
        if mh == 0 {
            return Err(errno::EINVAL);
        }
        let ret = sys_sync(SYNC_COND_WAIT, handle, mh, 0);
        syscall_result(check_cancel(ret)).map(|_| ())
    }

    /// [`Cond::wait`] bounded by an absolute CLOCK_REALTIME deadline.
    ///
    /// A deadline already in the past returns `ETIMEDOUT` without blocking.
    pub fn timedwait(&self, mutex: &Mutex, deadline: &TimeSpec) -> Result<(), i32> {
        let handle = self.validate()?;
        let mh = mutex.raw_handle();
        if mh == 0 || !deadline.valid() {
            return Err(errno::EINVAL);
        }
        if deadline_expired(deadline, ClockId::Realtime) {
            return Err(errno::ETIMEDOUT);
        }
        let ms = deadline_to_ms(deadline, ClockId::Realtime);
        let ret = sys_sync(SYNC_COND_TIMEDWAIT, handle, mh, ms);
        syscall_result(check_cancel(ret)).map(|_| ())
    }

    /// Wake one waiter, FIFO order.
    pub fn signal(&self) -> Result<(), i32> {
        let handle = self.validate()?;
        syscall_result(sys_sync(SYNC_COND_SIGNAL, handle, 0, 0)).map(|_| ())
    }

    /// Wake every waiter.
    pub fn broadcast(&self) -> Result<(), i32> {
        let handle = self.validate()?;
        syscall_result(sys_sync(SYNC_COND_BROADCAST, handle, 0, 0)).map(|_| ())
    }

    /// Destroy the cv; `EBUSY` while any thread is waiting on it.
    pub fn destroy(&self) -> Result<(), i32> {
        let handle = self.validate()?;
        syscall_result(sys_sync(SYNC_COND_DESTROY, handle, 0, 0))?;
        self.magic.store(0, Ordering::Release);
        self.destroyed.store(1, Ordering::Release);
        self.handle.store(0, Ordering::Release);
        Ok(())
    }
}
