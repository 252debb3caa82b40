//! Trap dispatcher façade.
//!
//! The kernel accepts `(category, op, a1, a2, a3)` and answers with a signed
//! word: negative values are negated errno codes, non-negative values carry
//! op-specific meaning (CAS returns 1/0, GETID returns the thread id). This
//! module owns the category/op tables, the [`Kernel`] boundary trait, the
//! process-wide kernel slot, and the typed per-family wrappers everything
//! else in the crate calls.
//!
//! Thread creation, named shared-memory files, and named kernel semaphore
//! slots are dedicated trait methods rather than dispatcher ops: the host
//! reaches them through separate traps (process exec, the file system, the
//! semaphore trap), and the dispatcher's three argument slots cannot carry
//! their payloads.

use std::sync::OnceLock;

// -------------------------------------------------------------------------
// Categories
// -------------------------------------------------------------------------

/// Primary dispatcher categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Thread control operations.
    Ctrl,
    /// Synchronization operations.
    Sync,
    /// Per-thread signal operations.
    Signal,
    /// Kernel-mediated atomic operations.
    Atomic,
    /// Scheduling parameter operations.
    Sched,
}

// -------------------------------------------------------------------------
// Control operations
// -------------------------------------------------------------------------

pub const CTRL_EXIT: i64 = 0;
pub const CTRL_CANCEL: i64 = 1;
pub const CTRL_STATUS: i64 = 4;
pub const CTRL_GETID: i64 = 5;
pub const CTRL_SETCANCELSTATE: i64 = 6;
pub const CTRL_SETCANCELTYPE: i64 = 7;
pub const CTRL_TESTCANCEL: i64 = 8;
pub const CTRL_SETNAME: i64 = 9;
pub const CTRL_GETNAME: i64 = 10;
pub const CTRL_IS_INITIAL: i64 = 13;
pub const CTRL_IS_MULTITHREADED: i64 = 14;
pub const CTRL_SWITCH_TO_MAIN: i64 = 15;
pub const CTRL_SWITCH_TO_THREAD: i64 = 16;

// -------------------------------------------------------------------------
// Sync operations
// -------------------------------------------------------------------------

pub const SYNC_SEM_WAIT: i64 = 1;
pub const SYNC_SEM_POST: i64 = 2;
pub const SYNC_SEM_INIT: i64 = 3;
pub const SYNC_SEM_DESTROY: i64 = 4;

pub const SYNC_MUTEX_INIT: i64 = 10;
pub const SYNC_MUTEX_LOCK: i64 = 11;
pub const SYNC_MUTEX_UNLOCK: i64 = 12;
pub const SYNC_MUTEX_TRYLOCK: i64 = 13;
pub const SYNC_MUTEX_DESTROY: i64 = 14;

/// Mutex-attribute ops are retained for dispatcher completeness; attribute
/// state lives in user space and the reference kernel answers `-ENOSYS`.
pub const SYNC_MUTEX_ATTR_INIT: i64 = 20;
pub const SYNC_MUTEX_ATTR_DESTROY: i64 = 21;
pub const SYNC_MUTEXATTR_SETTYPE: i64 = 22;
pub const SYNC_MUTEXATTR_GETTYPE: i64 = 23;
pub const SYNC_MUTEXATTR_SETPROTOCOL: i64 = 24;
pub const SYNC_MUTEXATTR_GETPROTOCOL: i64 = 25;
pub const SYNC_MUTEXATTR_SETPRIOCEILING: i64 = 26;
pub const SYNC_MUTEXATTR_GETPRIOCEILING: i64 = 27;

pub const SYNC_COND_INIT: i64 = 30;
pub const SYNC_COND_DESTROY: i64 = 31;
pub const SYNC_COND_WAIT: i64 = 32;
pub const SYNC_COND_TIMEDWAIT: i64 = 33;
pub const SYNC_COND_SIGNAL: i64 = 34;
pub const SYNC_COND_BROADCAST: i64 = 35;

pub const SYNC_RWLOCK_INIT: i64 = 40;
pub const SYNC_RWLOCK_DESTROY: i64 = 41;
pub const SYNC_RWLOCK_RDLOCK: i64 = 42;
pub const SYNC_RWLOCK_WRLOCK: i64 = 43;
pub const SYNC_RWLOCK_UNLOCK: i64 = 44;
pub const SYNC_RWLOCK_TRYRDLOCK: i64 = 45;
pub const SYNC_RWLOCK_TRYWRLOCK: i64 = 46;

pub const SYNC_JOIN: i64 = 50;
pub const SYNC_DETACH: i64 = 51;
pub const SYNC_TRYJOIN: i64 = 52;

pub const SYNC_SLEEP: i64 = 60;
pub const SYNC_YIELD: i64 = 61;

pub const SYNC_CLEANUP_PUSH: i64 = 70;
pub const SYNC_CLEANUP_POP: i64 = 71;
pub const SYNC_CLEANUP_GET: i64 = 72;

pub const SYNC_TSD_CREATE_KEY: i64 = 80;
pub const SYNC_TSD_DELETE_KEY: i64 = 81;
pub const SYNC_TSD_GET_SPECIFIC: i64 = 82;
pub const SYNC_TSD_SET_SPECIFIC: i64 = 83;

// -------------------------------------------------------------------------
// Signal operations
// -------------------------------------------------------------------------

pub const SIG_MODE: i64 = 0;
pub const SIG_KILL: i64 = 1;
pub const SIG_GETMASK: i64 = 2;
pub const SIG_SETMASK: i64 = 3;
pub const SIG_BLOCK: i64 = 4;
pub const SIG_UNBLOCK: i64 = 5;
pub const SIG_WAIT: i64 = 6;
pub const SIG_HANDLER: i64 = 7;
pub const SIG_HANDLER_ARG: i64 = 8;
pub const SIG_PENDING: i64 = 9;
pub const SIG_ALARM: i64 = 10;
pub const SIG_ALARM_THREAD: i64 = 11;
pub const SIG_PAUSE: i64 = 12;
pub const SIG_BROADCAST: i64 = 13;

// -------------------------------------------------------------------------
// Atomic operations
// -------------------------------------------------------------------------

pub const ATOMIC_INCREMENT: i64 = 21;
pub const ATOMIC_DECREMENT: i64 = 22;
pub const ATOMIC_CAS: i64 = 23;
pub const ATOMIC_EXCHANGE: i64 = 24;
pub const ATOMIC_ADD: i64 = 25;
pub const ATOMIC_SUB: i64 = 26;
pub const ATOMIC_OR: i64 = 27;
pub const ATOMIC_AND: i64 = 28;
pub const ATOMIC_XOR: i64 = 29;

// -------------------------------------------------------------------------
// Scheduling operations
// -------------------------------------------------------------------------

pub const SCHED_SETPARAM: i64 = 11;
pub const SCHED_GETPARAM: i64 = 12;
pub const SCHED_GETRRINTERVAL: i64 = 13;
pub const SCHED_SET_TIMESLICE: i64 = 14;
pub const SCHED_GET_TIMESLICE: i64 = 15;

// -------------------------------------------------------------------------
// Kernel boundary
// -------------------------------------------------------------------------

/// Attributes forwarded to the thread-creation trap.
#[derive(Debug, Clone, Copy)]
pub struct SpawnAttrs {
    /// Requested stack size in bytes; 0 means the kernel default.
    pub stack_size: usize,
    /// Start the thread already detached (never joinable).
    pub detached: bool,
    /// Scheduling policy (OTHER/FIFO/RR).
    pub policy: i32,
    /// Scheduling priority within the policy.
    pub priority: i32,
}

/// Modes of the named kernel semaphore trap.
///
/// The slot is a non-counting ownership semaphore: create grants ownership to
/// the caller, lock blocks until ownership is available or the timeout
/// (`0` = try once, `-1` = forever) elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KsemMode {
    Create,
    Destroy,
    Lock,
    Unlock,
}

/// The kernel collaborator every runtime operation is built on.
///
/// All methods use the dispatcher return convention: negative values are
/// negated errno codes.
pub trait Kernel: Send + Sync {
    /// The five-category trap dispatcher.
    fn dispatch(&self, category: Category, op: i64, a1: i64, a2: i64, a3: i64) -> i64;

    /// Create a thread running `entry(arg)`. Returns the positive thread id.
    fn spawn(&self, entry: fn(usize) -> usize, arg: usize, attrs: SpawnAttrs) -> i64;

    /// Create a named shared-memory block; returns its address.
    /// Fails with `-EEXIST` if the name is already bound.
    fn shm_create(&self, path: &str) -> i64;

    /// Open an existing named block; returns its address and bumps the open
    /// count. `-ENOENT` if the name is absent or unlinked.
    fn shm_open(&self, path: &str) -> i64;

    /// Drop one open count. Returns 1 if this close freed an unlinked block,
    /// 0 otherwise.
    fn shm_close(&self, path: &str) -> i64;

    /// Remove the name binding. Frees the block immediately when no handles
    /// remain (returns 1), otherwise defers to the last close (returns 0).
    fn shm_unlink(&self, path: &str) -> i64;

    /// The named kernel semaphore trap. `id` packs four ASCII characters.
    fn ksem(&self, mode: KsemMode, id: u32, timeout_ms: i64) -> i64;
}

static KERNEL: OnceLock<&'static dyn Kernel> = OnceLock::new();

/// Installs the process-wide kernel. Returns false if one is already
/// installed (the first installation wins).
pub fn install(kernel: &'static dyn Kernel) -> bool {
    KERNEL.set(kernel).is_ok()
}

/// The installed kernel.
///
/// # Panics
///
/// Panics if no kernel has been installed; using the runtime before boot is
/// a program-structure error, not a recoverable condition.
pub fn kernel() -> &'static dyn Kernel {
    *KERNEL
        .get()
        .unwrap_or_else(|| panic!("uthread: no kernel installed (call syscall::install first)"))
}

// -------------------------------------------------------------------------
// Return-value handling
// -------------------------------------------------------------------------

/// Convert a raw dispatcher return into `Result`: negative means `-errno`.
#[inline]
pub fn syscall_result(ret: i64) -> Result<i64, i32> {
    if ret < 0 { Err(-ret as i32) } else { Ok(ret) }
}

// -------------------------------------------------------------------------
// Typed family wrappers
// -------------------------------------------------------------------------

/// Issue a thread-control trap.
#[inline]
pub fn sys_ctrl(op: i64, a1: i64, a2: i64) -> i64 {
    kernel().dispatch(Category::Ctrl, op, a1, a2, 0)
}

/// Issue a synchronization trap.
#[inline]
pub fn sys_sync(op: i64, a1: i64, a2: i64, a3: i64) -> i64 {
    kernel().dispatch(Category::Sync, op, a1, a2, a3)
}

/// Issue a signal trap.
#[inline]
pub fn sys_signal(op: i64, a1: i64, a2: i64) -> i64 {
    kernel().dispatch(Category::Signal, op, a1, a2, 0)
}

/// Issue a kernel-mediated atomic trap.
#[inline]
pub fn sys_atomic(op: i64, a1: i64, a2: i64, a3: i64) -> i64 {
    kernel().dispatch(Category::Atomic, op, a1, a2, a3)
}

/// Issue a scheduling trap.
#[inline]
pub fn sys_sched(op: i64, a1: i64, a2: i64, a3: i64) -> i64 {
    kernel().dispatch(Category::Sched, op, a1, a2, a3)
}
