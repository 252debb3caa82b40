//! Thread-specific data and once-only initialization.
//!
//! Keys and their destructors are held by the kernel; `get`/`set` route to
//! per-thread storage there. Destructors run in the exiting thread's context
//! during CTRL EXIT, up to [`DESTRUCTOR_ITERATIONS`] passes.
//!
//! `Once` is a user-space state machine driven by the kernel CAS: the thread
//! that wins the `UNINIT → RUNNING` transition runs the routine, publishes
//! `DONE`, and everyone else yield-spins until they observe it. The explicit
//! RUNNING state keeps latecomers from returning while the routine is still
//! executing.

use std::sync::atomic::{AtomicI32, Ordering};

use crate::atomic;
use crate::errno;
use crate::pthread::thread;
use crate::syscall::{
    SYNC_TSD_CREATE_KEY, SYNC_TSD_DELETE_KEY, SYNC_TSD_GET_SPECIFIC, SYNC_TSD_SET_SPECIFIC,
    sys_sync, syscall_result,
};

/// Most keys a process can hold (kernel table size).
pub const KEYS_MAX: usize = 128;

/// Destructor passes made at thread exit (POSIX requires at least 4).
pub const DESTRUCTOR_ITERATIONS: usize = 4;

/// A thread-specific data key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key {
    id: i64,
}

impl Key {
    /// The raw kernel key id.
    #[must_use]
    pub const fn id(&self) -> i64 {
        self.id
    }
}

/// Create a key with an optional per-thread destructor.
///
/// The destructor runs at thread exit for every thread whose value is
/// non-null at that point. `EAGAIN` when the key table is full.
pub fn key_create(destructor: Option<fn(usize)>) -> Result<Key, i32> {
    let dtor = destructor.map_or(0, |f| f as usize as i64);
    let id = syscall_result(sys_sync(SYNC_TSD_CREATE_KEY, dtor, 0, 0))?;
    Ok(Key { id })
}

/// Delete a key. Values stored under it are dropped without running the
/// destructor.
pub fn key_delete(key: Key) -> Result<(), i32> {
    syscall_result(sys_sync(SYNC_TSD_DELETE_KEY, key.id, 0, 0)).map(|_| ())
}

/// The calling thread's value for `key`; 0 when never set.
pub fn get_specific(key: Key) -> usize {
    let ret = sys_sync(SYNC_TSD_GET_SPECIFIC, key.id, 0, 0);
    if ret < 0 { 0 } else { ret as usize }
}

/// Store the calling thread's value for `key`.
pub fn set_specific(key: Key, value: usize) -> Result<(), i32> {
    syscall_result(sys_sync(SYNC_TSD_SET_SPECIFIC, key.id, value as i64, 0)).map(|_| ())
}

// -------------------------------------------------------------------------
// Once
// -------------------------------------------------------------------------

const ONCE_UNINIT: i32 = 0;
const ONCE_RUNNING: i32 = 1;
const ONCE_DONE: i32 = 2;

/// One-time initialization control. Process lifetime; transitions are
/// monotonic `UNINIT → RUNNING → DONE`.
#[derive(Debug)]
pub struct Once {
    state: AtomicI32,
}

impl Default for Once {
    fn default() -> Self {
        Once::new()
    }
}

impl Once {
    #[must_use]
    pub const fn new() -> Self {
        Once {
            state: AtomicI32::new(ONCE_UNINIT),
        }
    }

    /// True once the routine has completed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) == ONCE_DONE
    }
}

/// Run `init_routine` exactly once across all threads using `control`.
///
/// Every caller returns only after the routine has completed.
pub fn once<F>(control: &Once, init_routine: F) -> Result<(), i32>
where
    F: FnOnce(),
{
    if control.is_done() {
        return Ok(());
    }
    loop {
        if atomic::cas(&control.state, ONCE_UNINIT, ONCE_RUNNING) {
            init_routine();
            atomic::exchange(&control.state, ONCE_DONE);
            return Ok(());
        }
        if control.state.load(Ordering::Acquire) == ONCE_DONE {
            return Ok(());
        }
        // Another thread is mid-initialization.
        thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_exposes_raw_id() {
        let key = Key { id: 9 };
        assert_eq!(key.id(), 9);
    }

    #[test]
    fn once_starts_uninitialized() {
        let control = Once::new();
        assert!(!control.is_done());
    }

    #[test]
    fn destructor_iterations_meet_posix_floor() {
        assert!(DESTRUCTOR_ITERATIONS >= 4);
    }
}
