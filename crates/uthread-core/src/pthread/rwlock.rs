//! Reader-writer locks.
//!
//! Fully kernel-backed: the user side holds a kernel-allocated positive
//! handle (0 reserved for uninitialized) and forwards every operation.
//! The lock is reader-preferring unless the kernel overrides; writer
//! starvation policy is the kernel's concern.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::errno;
use crate::syscall::{
    SYNC_RWLOCK_DESTROY, SYNC_RWLOCK_INIT, SYNC_RWLOCK_RDLOCK, SYNC_RWLOCK_TRYRDLOCK,
    SYNC_RWLOCK_TRYWRLOCK, SYNC_RWLOCK_UNLOCK, SYNC_RWLOCK_WRLOCK, sys_sync, syscall_result,
};

/// A kernel-backed reader-writer lock. Handle 0 means uninitialized.
#[derive(Debug)]
pub struct RwLock {
    handle: AtomicI64,
}

impl Default for RwLock {
    fn default() -> Self {
        RwLock::new()
    }
}

impl RwLock {
    /// An uninitialized lock; call [`RwLock::init`] before use.
    #[must_use]
    pub const fn new() -> Self {
        RwLock {
            handle: AtomicI64::new(0),
        }
    }

    fn live_handle(&self) -> Result<i64, i32> {
        match self.handle.load(Ordering::Acquire) {
            0 => Err(errno::EINVAL),
            h => Ok(h),
        }
    }

    /// Allocate the kernel lock. Re-initializing a live lock is `EBUSY`.
    pub fn init(&self) -> Result<(), i32> {
        if self.handle.load(Ordering::Acquire) != 0 {
            return Err(errno::EBUSY);
        }
        let handle = syscall_result(sys_sync(SYNC_RWLOCK_INIT, 0, 0, 0))?;
        self.handle.store(handle, Ordering::Release);
        Ok(())
    }

    /// Acquire a shared read lock, blocking.
    pub fn rdlock(&self) -> Result<(), i32> {
        let handle = self.live_handle()?;
        syscall_result(sys_sync(SYNC_RWLOCK_RDLOCK, handle, 0, 0)).map(|_| ())
    }

    /// Acquire a shared read lock without blocking; `EBUSY` on contention.
    pub fn tryrdlock(&self) -> Result<(), i32> {
        let handle = self.live_handle()?;
        syscall_result(sys_sync(SYNC_RWLOCK_TRYRDLOCK, handle, 0, 0)).map(|_| ())
    }

    /// Acquire the exclusive write lock, blocking.
    pub fn wrlock(&self) -> Result<(), i32> {
        let handle = self.live_handle()?;
        syscall_result(sys_sync(SYNC_RWLOCK_WRLOCK, handle, 0, 0)).map(|_| ())
    }

    /// Acquire the exclusive write lock without blocking; `EBUSY` on contention.
    pub fn trywrlock(&self) -> Result<(), i32> {
        let handle = self.live_handle()?;
        syscall_result(sys_sync(SYNC_RWLOCK_TRYWRLOCK, handle, 0, 0)).map(|_| ())
    }

    /// Release the caller's read or write hold.
    pub fn unlock(&self) -> Result<(), i32> {
        let handle = self.live_handle()?;
        syscall_result(sys_sync(SYNC_RWLOCK_UNLOCK, handle, 0, 0)).map(|_| ())
    }

    /// Destroy the lock; further use is `EINVAL`.
    pub fn destroy(&self) -> Result<(), i32> {
        let handle = self.live_handle()?;
        syscall_result(sys_sync(SYNC_RWLOCK_DESTROY, handle, 0, 0))?;
        self.handle.store(0, Ordering::Release);
        Ok(())
    }
}
