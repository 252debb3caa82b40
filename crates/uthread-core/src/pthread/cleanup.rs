//! Cleanup handler stack.
//!
//! A per-thread LIFO of `(routine, arg)` pairs held by the kernel, bracketed
//! around cancellation points. The stack is drained — executing every handler
//! — on thread exit and on delivered cancellation.

use crate::syscall::{
    SYNC_CLEANUP_GET, SYNC_CLEANUP_POP, SYNC_CLEANUP_PUSH, sys_sync, syscall_result,
};

/// A cleanup routine: called with the argument it was pushed with.
pub type CleanupRoutine = fn(usize);

/// Push a handler onto the calling thread's cleanup stack.
pub fn push(routine: CleanupRoutine, arg: usize) -> Result<(), i32> {
    let ret = sys_sync(
        SYNC_CLEANUP_PUSH,
        routine as usize as i64,
        arg as i64,
        0,
    );
    syscall_result(ret).map(|_| ())
}

/// Pop the top handler; invoke it iff `execute`.
///
/// Popping an empty stack is a no-op.
pub fn pop(execute: bool) {
    let mut routine: i64 = 0;
    let mut arg: i64 = 0;
    let ret = sys_sync(
        SYNC_CLEANUP_POP,
        &mut routine as *mut i64 as usize as i64,
        &mut arg as *mut i64 as usize as i64,
        0,
    );
    if execute && ret > 0 && routine != 0 {
        invoke(routine, arg);
    }
}

/// Number of handlers currently on the calling thread's stack.
pub fn depth() -> usize {
    let ret = sys_sync(SYNC_CLEANUP_GET, 0, 0, 0);
    if ret < 0 { 0 } else { ret as usize }
}

/// Drain the stack, executing every handler in LIFO order.
///
/// Called from the thread trampoline on exit and cancellation.
pub(crate) fn run_all() {
    loop {
        let mut routine: i64 = 0;
        let mut arg: i64 = 0;
        let ret = sys_sync(
            SYNC_CLEANUP_POP,
            &mut routine as *mut i64 as usize as i64,
            &mut arg as *mut i64 as usize as i64,
            0,
        );
        if ret <= 0 {
            return;
        }
        if routine != 0 {
            invoke(routine, arg);
        }
    }
}

fn invoke(routine: i64, arg: i64) {
    // SAFETY: the kernel hands back exactly the word `push` stored, and
    // `push` only ever stores a `CleanupRoutine` function pointer.
    let routine: CleanupRoutine = unsafe { std::mem::transmute(routine as usize) };
    routine(arg as usize);
}
