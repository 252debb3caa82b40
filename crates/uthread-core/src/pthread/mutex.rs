//! Mutexes and mutex attributes.
//!
//! The mutex body (owner, lock state, wait queue) lives in the kernel behind
//! an opaque handle; the user side holds the handle and the attribute copy
//! taken at init. `trylock` never peeks at state from user space — the
//! locked flag is racy without kernel assistance, so it is a dedicated trap.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::errno;
use crate::syscall::{
    SYNC_MUTEX_DESTROY, SYNC_MUTEX_INIT, SYNC_MUTEX_LOCK, SYNC_MUTEX_TRYLOCK, SYNC_MUTEX_UNLOCK,
    sys_sync, syscall_result,
};

// -------------------------------------------------------------------------
// Mutex type constants
// -------------------------------------------------------------------------

/// Normal (default) mutex — no error checking, no recursive locking.
pub const MUTEX_NORMAL: i32 = 0;
/// Recursive mutex — the owning thread can re-lock without deadlock.
pub const MUTEX_RECURSIVE: i32 = 1;
/// Error-checking mutex — EDEADLK on relock, EPERM on foreign unlock.
pub const MUTEX_ERRORCHECK: i32 = 2;
/// Default mutex type (alias for NORMAL).
pub const MUTEX_DEFAULT: i32 = MUTEX_NORMAL;

/// No priority protocol.
pub const PRIO_NONE: i32 = 0;
/// Priority inheritance; enforced by the kernel.
pub const PRIO_INHERIT: i32 = 1;
/// Priority ceiling; enforced by the kernel.
pub const PRIO_PROTECT: i32 = 2;

// -------------------------------------------------------------------------
// Validators
// -------------------------------------------------------------------------

/// Returns true if `kind` is a recognized mutex type.
#[must_use]
pub const fn valid_mutex_type(kind: i32) -> bool {
    matches!(kind, MUTEX_NORMAL | MUTEX_RECURSIVE | MUTEX_ERRORCHECK)
}

/// Returns true if `protocol` is a recognized priority protocol.
#[must_use]
pub const fn valid_protocol(protocol: i32) -> bool {
    matches!(protocol, PRIO_NONE | PRIO_INHERIT | PRIO_PROTECT)
}

// -------------------------------------------------------------------------
// Attributes
// -------------------------------------------------------------------------

/// Mutex attributes, independent of any mutex; copied in by `init`.
///
/// The protocol and ceiling are stored here and forwarded to the kernel at
/// init — enforcement is the kernel's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutexAttr {
    kind: i32,
    protocol: i32,
    prioceiling: i32,
}

impl Default for MutexAttr {
    fn default() -> Self {
        MutexAttr::new()
    }
}

impl MutexAttr {
    #[must_use]
    pub const fn new() -> Self {
        MutexAttr {
            kind: MUTEX_DEFAULT,
            protocol: PRIO_NONE,
            prioceiling: 0,
        }
    }

    pub fn set_type(&mut self, kind: i32) -> Result<(), i32> {
        if !valid_mutex_type(kind) {
            return Err(errno::EINVAL);
        }
        self.kind = kind;
        Ok(())
    }

    #[must_use]
    pub const fn kind(&self) -> i32 {
        self.kind
    }

    pub fn set_protocol(&mut self, protocol: i32) -> Result<(), i32> {
        if !valid_protocol(protocol) {
            return Err(errno::EINVAL);
        }
        self.protocol = protocol;
        Ok(())
    }

    #[must_use]
    pub const fn protocol(&self) -> i32 {
        self.protocol
    }

    pub fn set_prioceiling(&mut self, ceiling: i32) -> Result<(), i32> {
        self.prioceiling = ceiling;
        Ok(())
    }

    #[must_use]
    pub const fn prioceiling(&self) -> i32 {
        self.prioceiling
    }
}

// -------------------------------------------------------------------------
// Mutex
// -------------------------------------------------------------------------

/// A kernel-backed mutex. Handle 0 means uninitialized.
#[derive(Debug)]
pub struct Mutex {
    handle: AtomicI64,
}

impl Default for Mutex {
    fn default() -> Self {
        Mutex::new()
    }
}

impl Mutex {
    /// An uninitialized mutex; call [`Mutex::init`] before use.
    #[must_use]
    pub const fn new() -> Self {
        Mutex {
            handle: AtomicI64::new(0),
        }
    }

    fn live_handle(&self) -> Result<i64, i32> {
        match self.handle.load(Ordering::Acquire) {
            0 => Err(errno::EINVAL),
            h => Ok(h),
        }
    }

    /// Initialize with `attr` (or defaults). Re-initializing a live mutex is
    /// `EBUSY`.
    pub fn init(&self, attr: Option<&MutexAttr>) -> Result<(), i32> {
        if self.handle.load(Ordering::Acquire) != 0 {
            return Err(errno::EBUSY);
        }
        let attr = attr.copied().unwrap_or_default();
        let handle = syscall_result(sys_sync(
            SYNC_MUTEX_INIT,
            i64::from(attr.kind()),
            i64::from(attr.protocol()),
            i64::from(attr.prioceiling()),
        ))?;
        self.handle.store(handle, Ordering::Release);
        Ok(())
    }

    /// Block until the mutex is acquired.
    pub fn lock(&self) -> Result<(), i32> {
        let handle = self.live_handle()?;
        syscall_result(sys_sync(SYNC_MUTEX_LOCK, handle, 0, 0)).map(|_| ())
    }

    /// Acquire without blocking; `EBUSY` if held elsewhere.
    pub fn trylock(&self) -> Result<(), i32> {
        let handle = self.live_handle()?;
        syscall_result(sys_sync(SYNC_MUTEX_TRYLOCK, handle, 0, 0)).map(|_| ())
    }

    /// Release the mutex.
    pub fn unlock(&self) -> Result<(), i32> {
        let handle = self.live_handle()?;
        syscall_result(sys_sync(SYNC_MUTEX_UNLOCK, handle, 0, 0)).map(|_| ())
    }

    /// Destroy the mutex; `EBUSY` while held.
    pub fn destroy(&self) -> Result<(), i32> {
        let handle = self.live_handle()?;
        syscall_result(sys_sync(SYNC_MUTEX_DESTROY, handle, 0, 0))?;
        self.handle.store(0, Ordering::Release);
        Ok(())
    }

    /// The raw kernel handle; 0 when uninitialized.
    pub(crate) fn raw_handle(&self) -> i64 {
        self.handle.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutex_type_constants() {
        assert_eq!(MUTEX_NORMAL, 0);
        assert_eq!(MUTEX_RECURSIVE, 1);
        assert_eq!(MUTEX_ERRORCHECK, 2);
        assert_eq!(MUTEX_DEFAULT, MUTEX_NORMAL);
    }

    #[test]
    fn valid_mutex_type_check() {
        assert!(valid_mutex_type(MUTEX_NORMAL));
        assert!(valid_mutex_type(MUTEX_RECURSIVE));
        assert!(valid_mutex_type(MUTEX_ERRORCHECK));
        assert!(!valid_mutex_type(3));
        assert!(!valid_mutex_type(-1));
    }

    #[test]
    fn attr_rejects_unknown_type_and_protocol() {
        let mut attr = MutexAttr::new();
        assert_eq!(attr.set_type(99), Err(errno::EINVAL));
        assert_eq!(attr.set_protocol(-2), Err(errno::EINVAL));
        assert_eq!(attr.kind(), MUTEX_DEFAULT);
        assert_eq!(attr.protocol(), PRIO_NONE);
    }

    #[test]
    fn attr_stores_choices() {
        let mut attr = MutexAttr::new();
        attr.set_type(MUTEX_RECURSIVE).unwrap();
        attr.set_protocol(PRIO_INHERIT).unwrap();
        attr.set_prioceiling(5).unwrap();
        assert_eq!(attr.kind(), MUTEX_RECURSIVE);
        assert_eq!(attr.protocol(), PRIO_INHERIT);
        assert_eq!(attr.prioceiling(), 5);
    }

    #[test]
    fn uninitialized_mutex_rejects_ops() {
        let m = Mutex::new();
        assert_eq!(m.lock(), Err(errno::EINVAL));
        assert_eq!(m.trylock(), Err(errno::EINVAL));
        assert_eq!(m.unlock(), Err(errno::EINVAL));
        assert_eq!(m.destroy(), Err(errno::EINVAL));
    }
}
