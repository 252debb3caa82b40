//! Error number definitions.
//!
//! Pthread-family operations report the errno value through their return
//! value and never touch the errno slot. Sem-family operations store the
//! value here before returning, matching the C propagation split.

use std::cell::Cell;

/// Well-known errno constants.
pub const EPERM: i32 = 1;
pub const ENOENT: i32 = 2;
pub const ESRCH: i32 = 3;
pub const EINTR: i32 = 4;
pub const EIO: i32 = 5;
pub const EAGAIN: i32 = 11;
pub const ENOMEM: i32 = 12;
pub const EACCES: i32 = 13;
pub const EBUSY: i32 = 16;
pub const EEXIST: i32 = 17;
pub const EINVAL: i32 = 22;
pub const EMFILE: i32 = 24;
pub const ERANGE: i32 = 34;
pub const EDEADLK: i32 = 35;
pub const ENAMETOOLONG: i32 = 36;
pub const ENOSYS: i32 = 38;
pub const EOVERFLOW: i32 = 75;
pub const ENOTSUP: i32 = 95;
pub const ETIMEDOUT: i32 = 110;
pub const ECANCELED: i32 = 125;

thread_local! {
    static ERRNO: Cell<i32> = const { Cell::new(0) };
}

/// Returns the current thread's errno value.
pub fn get_errno() -> i32 {
    ERRNO.with(Cell::get)
}

/// Sets the current thread's errno value.
pub fn set_errno(value: i32) {
    ERRNO.with(|slot| slot.set(value));
}
