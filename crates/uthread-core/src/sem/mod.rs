//! Counting semaphores.
//!
//! One record, two modes, chosen at init time by asking the kernel whether
//! the process is multithreaded:
//!
//! - **Threaded**: the count lives in process memory next to a kernel wait
//!   queue. `wait`/`post` trap; `trywait` is a pure user-space CAS loop;
//!   timed waits poll the count with yield + a short sleep.
//! - **Kernel-slot**: the semaphore is guarded by a named kernel semaphore
//!   slot acting as a per-sem mutex around the count. Used in
//!   single-threaded processes, where yielding to other processes replaces
//!   blocking on an in-process queue.
//!
//! Sem-family calls store their errno before returning, unlike the
//! pthread family.

#[allow(unsafe_code)]
pub mod named;

use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, Ordering};

use crate::atomic;
use crate::errno;
use crate::pthread::thread::{self, check_cancel};
use crate::syscall::{
    KsemMode, SYNC_SEM_DESTROY, SYNC_SEM_INIT, SYNC_SEM_POST, SYNC_SEM_WAIT, kernel, sys_sync,
    syscall_result,
};
use crate::time::{ClockId, TimeSpec, deadline_expired, deadline_to_ms};

/// Largest semaphore count.
pub const SEM_VALUE_MAX: i32 = 32_767;

/// Longest named-semaphore name, excluding the leading `/` (kernel limit).
pub const SEM_NAME_MAX: usize = 4;

/// Poll period of the threaded timed wait, in milliseconds.
const POLL_INTERVAL_MS: i64 = 2;

/// Mode tag values stored in the record.
const MODE_UNSET: i32 = 0;
const MODE_THREADED: i32 = 1;
const MODE_KSEM: i32 = 2;

/// A dual-mode counting semaphore.
///
/// `repr(C)` because a named semaphore's record *is* its shared-memory
/// block, handed to other attachments of the same name.
#[repr(C)]
pub struct Sem {
    /// Current count. Plain loads in user space; all RMW kernel-mediated.
    count: AtomicI32,
    /// Mode tag; dispatched on by every operation.
    mode: AtomicI32,
    /// Kernel wait-queue handle (threaded mode).
    queue: AtomicI64,
    /// Packed 4-char kernel slot id (kernel-slot mode); 0 when unset.
    ksem_id: AtomicU32,
    /// Open-handle count for named semaphores.
    io_count: AtomicI32,
    /// Raw name characters (no padding) and length, for path rebuilding.
    name_raw: AtomicU32,
    name_len: AtomicI32,
}

impl Default for Sem {
    fn default() -> Self {
        Sem::new()
    }
}

fn fail<T>(e: i32) -> Result<T, i32> {
    errno::set_errno(e);
    Err(e)
}

static KSEM_COUNTER: AtomicI32 = AtomicI32::new(0);

/// A fresh 4-char kernel slot id from the caller's id and a process-local
/// counter. First char `'A'..='Z'`, so it never collides with names the
/// operating system reserves.
fn gen_ksem_id() -> u32 {
    let pid = thread::current() as u32;
    let counter = (KSEM_COUNTER.fetch_add(1, Ordering::Relaxed) + 1) as u32 % 999;
    let chars = [
        b'A' + (pid % 26) as u8,
        b'0' + ((pid / 26) % 10) as u8,
        b'A' + (counter % 26) as u8,
        b'0' + ((counter / 26) % 10) as u8,
    ];
    named::pack_id(chars)
}

impl Sem {
    /// An uninitialized semaphore; call [`Sem::init`] before use.
    #[must_use]
    pub const fn new() -> Self {
        Sem {
            count: AtomicI32::new(0),
            mode: AtomicI32::new(MODE_UNSET),
            queue: AtomicI64::new(0),
            ksem_id: AtomicU32::new(0),
            io_count: AtomicI32::new(0),
            name_raw: AtomicU32::new(0),
            name_len: AtomicI32::new(0),
        }
    }

    fn count_addr(&self) -> i64 {
        self.count.as_ptr() as usize as i64
    }

    fn mode_tag(&self) -> i32 {
        self.mode.load(Ordering::Acquire)
    }

    fn slot_id(&self) -> Result<u32, i32> {
        match self.ksem_id.load(Ordering::Acquire) {
            0 => fail(errno::EINVAL),
            id => Ok(id),
        }
    }

    pub(crate) fn set_named_identity(&self, id: u32, name_raw: u32, name_len: i32) {
        self.ksem_id.store(id, Ordering::Release);
        self.name_raw.store(name_raw, Ordering::Release);
        self.name_len.store(name_len, Ordering::Release);
        self.mode.store(MODE_KSEM, Ordering::Release);
    }

    pub(crate) fn named_identity(&self) -> (u32, u32, i32) {
        (
            self.ksem_id.load(Ordering::Acquire),
            self.name_raw.load(Ordering::Acquire),
            self.name_len.load(Ordering::Acquire),
        )
    }

    pub(crate) fn io_count_word(&self) -> &AtomicI32 {
        &self.io_count
    }

    pub(crate) fn store_count(&self, value: i32) {
        self.count.store(value, Ordering::Release);
    }

    /// Initialize with `value` tokens.
    ///
    /// `pshared > 0` is unsupported for anonymous semaphores (`ENOSYS`);
    /// values above [`SEM_VALUE_MAX`] are `EINVAL`.
    pub fn init(&self, pshared: i32, value: u32) -> Result<(), i32> {
        if value > SEM_VALUE_MAX as u32 {
            return fail(errno::EINVAL);
        }
        if pshared > 0 {
            return fail(errno::ENOSYS);
        }

        if thread::is_multithreaded() {
            let queue = match syscall_result(sys_sync(
                SYNC_SEM_INIT,
                self.count_addr(),
                i64::from(value),
                0,
            )) {
                Ok(q) => q,
                Err(e) => return fail(e),
            };
            self.queue.store(queue, Ordering::Release);
            self.ksem_id.store(0, Ordering::Release);
            self.mode.store(MODE_THREADED, Ordering::Release);
        } else {
            let id = gen_ksem_id();
            let ret = kernel().ksem(KsemMode::Create, id, 0);
            if ret < 0 {
                return fail(-ret as i32);
            }
            // Creation grants ownership; release it so the slot reads free.
            kernel().ksem(KsemMode::Unlock, id, 0);
            self.count.store(value as i32, Ordering::Release);
            self.ksem_id.store(id, Ordering::Release);
            self.mode.store(MODE_KSEM, Ordering::Release);
        }
        Ok(())
    }

    /// Take one token, blocking until available. A cancellation point in
    /// threaded mode.
    pub fn wait(&self) -> Result<(), i32> {
        errno::set_errno(0);
        match self.mode_tag() {
            MODE_THREADED => {
                let ret = sys_sync(
                    SYNC_SEM_WAIT,
                    self.count_addr(),
                    self.queue.load(Ordering::Acquire),
                    0,
                );
                match syscall_result(check_cancel(ret)) {
                    Ok(_) => Ok(()),
                    Err(e) => fail(e),
                }
            }
            MODE_KSEM => {
                let id = self.slot_id()?;
                loop {
                    if kernel().ksem(KsemMode::Lock, id, -1) < 0 {
                        return fail(errno::EINVAL);
                    }
                    let count = self.count.load(Ordering::Acquire);
                    if count > 0 {
                        self.count.store(count - 1, Ordering::Release);
                        kernel().ksem(KsemMode::Unlock, id, 0);
                        return Ok(());
                    }
                    kernel().ksem(KsemMode::Unlock, id, 0);
                    // No token; give other processes a turn and retry.
                    thread::yield_now();
                }
            }
            _ => fail(errno::EINVAL),
        }
    }

    /// Take one token without blocking; `EAGAIN` when none are available.
    pub fn trywait(&self) -> Result<(), i32> {
        errno::set_errno(0);
        match self.mode_tag() {
            MODE_THREADED => {
                // Pure user-space check-and-decrement; no trap on the fast
                // path.
                let mut old = self.count.load(Ordering::Acquire);
                while old > 0 {
                    if atomic::cas(&self.count, old, old - 1) {
                        return Ok(());
                    }
                    old = self.count.load(Ordering::Acquire);
                    thread::yield_now();
                }
                fail(errno::EAGAIN)
            }
            MODE_KSEM => {
                let id = self.slot_id()?;
                if kernel().ksem(KsemMode::Lock, id, 0) < 0 {
                    return fail(errno::EAGAIN);
                }
                let count = self.count.load(Ordering::Acquire);
                if count > 0 {
                    self.count.store(count - 1, Ordering::Release);
                    kernel().ksem(KsemMode::Unlock, id, 0);
                    Ok(())
                } else {
                    kernel().ksem(KsemMode::Unlock, id, 0);
                    fail(errno::EAGAIN)
                }
            }
            _ => fail(errno::EINVAL),
        }
    }

    /// Release one token or wake the first waiter.
    ///
    /// `EOVERFLOW` at [`SEM_VALUE_MAX`]; the count is left unchanged.
    pub fn post(&self) -> Result<(), i32> {
        match self.mode_tag() {
            MODE_THREADED => {
                let ret = sys_sync(
                    SYNC_SEM_POST,
                    self.count_addr(),
                    self.queue.load(Ordering::Acquire),
                    0,
                );
                match syscall_result(ret) {
                    Ok(_) => Ok(()),
                    Err(e) => fail(e),
                }
            }
            MODE_KSEM => {
                let id = self.slot_id()?;
                if kernel().ksem(KsemMode::Lock, id, -1) < 0 {
                    return fail(errno::EINVAL);
                }
                let count = self.count.load(Ordering::Acquire);
                if count < SEM_VALUE_MAX {
                    self.count.store(count + 1, Ordering::Release);
                    kernel().ksem(KsemMode::Unlock, id, 0);
                    Ok(())
                } else {
                    kernel().ksem(KsemMode::Unlock, id, 0);
                    fail(errno::EOVERFLOW)
                }
            }
            _ => fail(errno::EINVAL),
        }
    }

    /// [`Sem::wait`] bounded by an absolute deadline on `clock_id`
    /// (REALTIME = 0, MONOTONIC = 1; anything else is `EINVAL`).
    pub fn clockwait(&self, clock_id: i32, deadline: &TimeSpec) -> Result<(), i32> {
        errno::set_errno(0);
        let clock = match ClockId::from_raw(clock_id) {
            Ok(c) => c,
            Err(e) => return fail(e),
        };
        if !deadline.valid() {
            return fail(errno::EINVAL);
        }
        if deadline_expired(deadline, clock) {
            return fail(errno::ETIMEDOUT);
        }

        match self.mode_tag() {
            MODE_THREADED => {
                // Poll with CAS; yield and nap between attempts.
                while !deadline_expired(deadline, clock) {
                    let mut old = self.count.load(Ordering::Acquire);
                    while old > 0 {
                        if atomic::cas(&self.count, old, old - 1) {
                            return Ok(());
                        }
                        old = self.count.load(Ordering::Acquire);
                    }
                    thread::yield_now();
                    let _ = thread::msleep(POLL_INTERVAL_MS);
                }
                fail(errno::ETIMEDOUT)
            }
            MODE_KSEM => {
                let id = self.slot_id()?;
                loop {
                    let remaining = deadline_to_ms(deadline, clock);
                    if remaining == 0 {
                        return fail(errno::ETIMEDOUT);
                    }
                    let ret = kernel().ksem(KsemMode::Lock, id, remaining);
                    if ret < 0 {
                        return if -ret as i32 == errno::ETIMEDOUT {
                            fail(errno::ETIMEDOUT)
                        } else {
                            fail(errno::EINVAL)
                        };
                    }
                    let count = self.count.load(Ordering::Acquire);
                    if count > 0 {
                        self.count.store(count - 1, Ordering::Release);
                        kernel().ksem(KsemMode::Unlock, id, 0);
                        return Ok(());
                    }
                    kernel().ksem(KsemMode::Unlock, id, 0);
                    thread::yield_now();
                }
            }
            _ => fail(errno::EINVAL),
        }
    }

    /// [`Sem::clockwait`] against CLOCK_REALTIME.
    pub fn timedwait(&self, deadline: &TimeSpec) -> Result<(), i32> {
        self.clockwait(0, deadline)
    }

    /// Snapshot of the count. Informational; may race with waiters/posters.
    pub fn getvalue(&self) -> Result<i32, i32> {
        Ok(self.count.load(Ordering::Acquire))
    }

    /// Destroy the semaphore; `EBUSY` while threads are blocked in `wait`.
    pub fn destroy(&self) -> Result<(), i32> {
        match self.mode_tag() {
            MODE_THREADED => {
                let ret = sys_sync(
                    SYNC_SEM_DESTROY,
                    self.count_addr(),
                    self.queue.load(Ordering::Acquire),
                    0,
                );
                if let Err(e) = syscall_result(ret) {
                    return fail(e);
                }
                self.count.store(0, Ordering::Release);
                self.queue.store(0, Ordering::Release);
                self.mode.store(MODE_UNSET, Ordering::Release);
                Ok(())
            }
            MODE_KSEM => {
                let id = self.slot_id()?;
                let ret = kernel().ksem(KsemMode::Destroy, id, 0);
                // The slot id is cleared even when the kernel refuses, so a
                // half-dead record cannot be reused.
                self.ksem_id.store(0, Ordering::Release);
                self.count.store(0, Ordering::Release);
                self.mode.store(MODE_UNSET, Ordering::Release);
                if ret < 0 {
                    return fail(-ret as i32);
                }
                Ok(())
            }
            _ => fail(errno::EINVAL),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_and_name_limits() {
        assert_eq!(SEM_VALUE_MAX, 32_767);
        assert_eq!(SEM_NAME_MAX, 4);
    }

    #[test]
    fn uninitialized_sem_rejects_ops() {
        let sem = Sem::new();
        assert_eq!(sem.wait(), Err(errno::EINVAL));
        assert_eq!(sem.trywait(), Err(errno::EINVAL));
        assert_eq!(sem.post(), Err(errno::EINVAL));
        assert_eq!(sem.destroy(), Err(errno::EINVAL));
        assert_eq!(crate::errno::get_errno(), errno::EINVAL);
        crate::errno::set_errno(0);
    }

    #[test]
    fn getvalue_reads_raw_count() {
        let sem = Sem::new();
        assert_eq!(sem.getvalue(), Ok(0));
    }
}
