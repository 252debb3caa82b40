//! In-process reference kernel.
//!
//! Implements the trap dispatcher contract the runtime is written against,
//! with host threads standing in for kernel threads. Tests and benchmarks
//! boot this kernel once per process ([`boot`]) and then drive the runtime
//! exactly as they would on the real host.
//!
//! Everything observable matches the host dispatcher: FIFO wait queues,
//! direct lock handoff, negative-errno returns, a latched multithreaded
//! flag, named shared-memory blocks with deferred unlink, and named
//! semaphore slots.

pub mod ksem;
pub mod sched;
pub mod shm;
pub mod signal;
pub mod sync;
pub mod waitq;

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::OnceLock;

use thiserror::Error;

use uthread_core::syscall::{self, Category, KsemMode, Kernel, SpawnAttrs};

use crate::ksem::KsemTable;
use crate::sched::Scheduler;
use crate::shm::ShmNamespace;
use crate::sync::SyncTables;

const ENOSYS: i64 = 38;

/// Upper bound on the TSD key table size.
pub const MAX_TSD_KEYS_LIMIT: usize = 1024;

// -------------------------------------------------------------------------
// Configuration
// -------------------------------------------------------------------------

/// Tunables for a [`HostKernel`].
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Round-robin timeslice reported by the SCHED family, in milliseconds.
    pub timeslice_ms: i64,
    /// Size of the TSD key table.
    pub max_tsd_keys: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            timeslice_ms: 20,
            max_tsd_keys: 128,
        }
    }
}

/// Rejected [`KernelConfig`] values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KernelConfigError {
    #[error("timeslice must be positive, got {0} ms")]
    Timeslice(i64),
    #[error("TSD key table must hold 1..={MAX_TSD_KEYS_LIMIT} keys, got {0}")]
    KeyTable(usize),
}

/// Builder for a [`HostKernel`] with validated knobs.
#[derive(Debug, Default)]
pub struct HostKernelBuilder {
    config: KernelConfig,
}

impl HostKernelBuilder {
    #[must_use]
    pub fn timeslice_ms(mut self, ms: i64) -> Self {
        self.config.timeslice_ms = ms;
        self
    }

    #[must_use]
    pub fn max_tsd_keys(mut self, keys: usize) -> Self {
        self.config.max_tsd_keys = keys;
        self
    }

    pub fn build(self) -> Result<HostKernel, KernelConfigError> {
        if self.config.timeslice_ms <= 0 {
            return Err(KernelConfigError::Timeslice(self.config.timeslice_ms));
        }
        if self.config.max_tsd_keys == 0 || self.config.max_tsd_keys > MAX_TSD_KEYS_LIMIT {
            return Err(KernelConfigError::KeyTable(self.config.max_tsd_keys));
        }
        Ok(HostKernel::from_config(self.config))
    }
}

// -------------------------------------------------------------------------
// Kernel
// -------------------------------------------------------------------------

/// The reference kernel: scheduler, sync object tables, shared-memory
/// namespace, and named semaphore slots.
pub struct HostKernel {
    sched: Arc<Scheduler>,
    sync: SyncTables,
    shm: ShmNamespace,
    ksem: KsemTable,
}

impl HostKernel {
    #[must_use]
    pub fn builder() -> HostKernelBuilder {
        HostKernelBuilder::default()
    }

    fn from_config(config: KernelConfig) -> HostKernel {
        HostKernel {
            sched: Arc::new(Scheduler::new(config.timeslice_ms, config.max_tsd_keys)),
            sync: SyncTables::new(),
            shm: ShmNamespace::new(),
            ksem: KsemTable::new(),
        }
    }

    /// A kernel with default configuration (always valid).
    #[must_use]
    pub fn with_defaults() -> HostKernel {
        HostKernel::from_config(KernelConfig::default())
    }

    /// The scheduler, for tests that inspect kernel-side state.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.sched
    }

    /// The shared-memory namespace, for tests that check file lifetimes.
    #[must_use]
    pub fn shm(&self) -> &ShmNamespace {
        &self.shm
    }

    // ---------------------------------------------------------------------
    // Dispatch routing
    // ---------------------------------------------------------------------

    fn ctrl(&self, op: i64, a1: i64, a2: i64) -> i64 {
        use uthread_core::syscall as ops;
        match op {
            ops::CTRL_EXIT => {
                self.sched.exit_current(a1);
                0
            }
            ops::CTRL_CANCEL => self.sched.cancel(a1),
            ops::CTRL_STATUS => self.sched.status(a1),
            ops::CTRL_GETID => self.sched.current_tid(),
            ops::CTRL_SETCANCELSTATE => self.sched.setcancelstate(a1),
            ops::CTRL_SETCANCELTYPE => self.sched.setcanceltype(a1),
            ops::CTRL_TESTCANCEL => self.sched.test_cancel(),
            ops::CTRL_SETNAME => self.sched.setname(a1, a2),
            ops::CTRL_GETNAME => self.sched.getname(a1, a2),
            ops::CTRL_IS_INITIAL => i64::from(self.sched.is_initial()),
            ops::CTRL_IS_MULTITHREADED => i64::from(self.sched.is_multithreaded()),
            ops::CTRL_SWITCH_TO_MAIN => match self.sched.initial_rec() {
                Some(rec) => self.sched.switch_to(rec.tid),
                None => self.sched.yield_now(),
            },
            ops::CTRL_SWITCH_TO_THREAD => self.sched.switch_to(a1),
            _ => -ENOSYS,
        }
    }

    fn sync_op(&self, op: i64, a1: i64, a2: i64, a3: i64) -> i64 {
        use uthread_core::syscall as ops;
        match op {
            ops::SYNC_SEM_WAIT => self.sync.sem_wait(&self.sched, a1, a2),
            ops::SYNC_SEM_POST => self.sync.sem_post(a1, a2),
            ops::SYNC_SEM_INIT => self.sync.sem_init(a1, a2),
            ops::SYNC_SEM_DESTROY => self.sync.sem_destroy(a2),

            ops::SYNC_MUTEX_INIT => self.sync.mutex_init(a1, a2, a3),
            ops::SYNC_MUTEX_LOCK => self.sync.mutex_lock(&self.sched, a1),
            ops::SYNC_MUTEX_UNLOCK => self.sync.mutex_unlock(&self.sched, a1),
            ops::SYNC_MUTEX_TRYLOCK => self.sync.mutex_trylock(&self.sched, a1),
            ops::SYNC_MUTEX_DESTROY => self.sync.mutex_destroy(a1),

            // Attribute state lives in user space; the table entries exist
            // for dispatcher completeness only.
            ops::SYNC_MUTEX_ATTR_INIT
            | ops::SYNC_MUTEX_ATTR_DESTROY
            | ops::SYNC_MUTEXATTR_SETTYPE
            | ops::SYNC_MUTEXATTR_GETTYPE
            | ops::SYNC_MUTEXATTR_SETPROTOCOL
            | ops::SYNC_MUTEXATTR_GETPROTOCOL
            | ops::SYNC_MUTEXATTR_SETPRIOCEILING
            | ops::SYNC_MUTEXATTR_GETPRIOCEILING => -ENOSYS,

            ops::SYNC_COND_INIT => self.sync.cond_init(),
            ops::SYNC_COND_DESTROY => self.sync.cond_destroy(a1),
            ops::SYNC_COND_WAIT => self.sync.cond_wait(&self.sched, a1, a2, None),
            ops::SYNC_COND_TIMEDWAIT => self.sync.cond_wait(&self.sched, a1, a2, Some(a3)),
            ops::SYNC_COND_SIGNAL => self.sync.cond_signal(a1),
            ops::SYNC_COND_BROADCAST => self.sync.cond_broadcast(a1),

            ops::SYNC_RWLOCK_INIT => self.sync.rwlock_init(),
            ops::SYNC_RWLOCK_DESTROY => self.sync.rwlock_destroy(a1),
            ops::SYNC_RWLOCK_RDLOCK => self.sync.rwlock_rdlock(&self.sched, a1, true),
            ops::SYNC_RWLOCK_WRLOCK => self.sync.rwlock_wrlock(&self.sched, a1, true),
            ops::SYNC_RWLOCK_UNLOCK => self.sync.rwlock_unlock(&self.sched, a1),
            ops::SYNC_RWLOCK_TRYRDLOCK => self.sync.rwlock_rdlock(&self.sched, a1, false),
            ops::SYNC_RWLOCK_TRYWRLOCK => self.sync.rwlock_wrlock(&self.sched, a1, false),

            ops::SYNC_JOIN => self.sched.join(a1, a2),
            ops::SYNC_DETACH => self.sched.detach(a1),
            ops::SYNC_TRYJOIN => self.sched.try_join(a1, a2),

            ops::SYNC_SLEEP => self.sched.sleep(a1),
            ops::SYNC_YIELD => self.sched.yield_now(),

            ops::SYNC_CLEANUP_PUSH => self.sched.cleanup_push(a1, a2),
            ops::SYNC_CLEANUP_POP => self.sched.cleanup_pop(a1, a2),
            ops::SYNC_CLEANUP_GET => self.sched.cleanup_depth(),

            ops::SYNC_TSD_CREATE_KEY => self.sched.key_create(a1),
            ops::SYNC_TSD_DELETE_KEY => self.sched.key_delete(a1),
            ops::SYNC_TSD_GET_SPECIFIC => self.sched.tsd_get(a1),
            ops::SYNC_TSD_SET_SPECIFIC => self.sched.tsd_set(a1, a2),

            _ => -ENOSYS,
        }
    }

    fn signal_op(&self, op: i64, a1: i64, a2: i64) -> i64 {
        use uthread_core::syscall as ops;
        match op {
            ops::SIG_MODE => self.sched.sig_set_mode(a1 != 0),
            ops::SIG_KILL => self.sched.sig_kill(a1, a2),
            ops::SIG_GETMASK => self.sched.sig_getmask(),
            ops::SIG_SETMASK => self.sched.sig_setmask(a1 as u64),
            ops::SIG_BLOCK => self.sched.sig_block(a1 as u64),
            ops::SIG_UNBLOCK => self.sched.sig_unblock(a1 as u64),
            ops::SIG_WAIT => self.sched.sig_wait(a1 as u64, a2),
            ops::SIG_HANDLER => self.sched.sig_handler(a1, a2),
            ops::SIG_HANDLER_ARG => self.sched.sig_handler_arg(a1, a2),
            ops::SIG_PENDING => self.sched.sig_pending(),
            ops::SIG_ALARM => signal::sig_alarm(&self.sched, None, a1),
            ops::SIG_ALARM_THREAD => signal::sig_alarm(&self.sched, Some(a1), a2),
            ops::SIG_PAUSE => self.sched.sig_pause(),
            ops::SIG_BROADCAST => self.sched.sig_broadcast(a1),
            _ => -ENOSYS,
        }
    }

    fn atomic_op(&self, op: i64, a1: i64, a2: i64, a3: i64) -> i64 {
        use uthread_core::syscall as ops;
        if a1 == 0 {
            return -22; // EINVAL: null word address
        }
        let word: &AtomicI32 = sync::user_word(a1);
        match op {
            ops::ATOMIC_INCREMENT => i64::from(word.fetch_add(1, Ordering::SeqCst) + 1),
            ops::ATOMIC_DECREMENT => i64::from(word.fetch_sub(1, Ordering::SeqCst) - 1),
            ops::ATOMIC_CAS => {
                let swapped = word
                    .compare_exchange(a2 as i32, a3 as i32, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok();
                i64::from(swapped)
            }
            ops::ATOMIC_EXCHANGE => i64::from(word.swap(a2 as i32, Ordering::SeqCst)),
            ops::ATOMIC_ADD => i64::from(word.fetch_add(a2 as i32, Ordering::SeqCst) + a2 as i32),
            ops::ATOMIC_SUB => i64::from(word.fetch_sub(a2 as i32, Ordering::SeqCst) - a2 as i32),
            ops::ATOMIC_OR => i64::from(word.fetch_or(a2 as i32, Ordering::SeqCst) | a2 as i32),
            ops::ATOMIC_AND => i64::from(word.fetch_and(a2 as i32, Ordering::SeqCst) & a2 as i32),
            ops::ATOMIC_XOR => i64::from(word.fetch_xor(a2 as i32, Ordering::SeqCst) ^ a2 as i32),
            _ => -ENOSYS,
        }
    }

    fn sched_op(&self, op: i64, a1: i64, a2: i64, a3: i64) -> i64 {
        use uthread_core::syscall as ops;
        match op {
            ops::SCHED_SETPARAM => self.sched.setparam(a1, a2, a3),
            ops::SCHED_GETPARAM => self.sched.getparam(a1, a2, a3),
            ops::SCHED_GETRRINTERVAL => self.sched.timeslice(),
            ops::SCHED_SET_TIMESLICE => self.sched.set_timeslice(a1),
            ops::SCHED_GET_TIMESLICE => self.sched.timeslice(),
            _ => -ENOSYS,
        }
    }
}

impl Kernel for HostKernel {
    fn dispatch(&self, category: Category, op: i64, a1: i64, a2: i64, a3: i64) -> i64 {
        match category {
            Category::Ctrl => self.ctrl(op, a1, a2),
            Category::Sync => self.sync_op(op, a1, a2, a3),
            Category::Signal => self.signal_op(op, a1, a2),
            Category::Atomic => self.atomic_op(op, a1, a2, a3),
            Category::Sched => self.sched_op(op, a1, a2, a3),
        }
    }

    fn spawn(&self, entry: fn(usize) -> usize, arg: usize, attrs: SpawnAttrs) -> i64 {
        self.sched.spawn(entry, arg, attrs)
    }

    fn shm_create(&self, path: &str) -> i64 {
        self.shm.create(path)
    }

    fn shm_open(&self, path: &str) -> i64 {
        self.shm.open(path)
    }

    fn shm_close(&self, path: &str) -> i64 {
        self.shm.close(path)
    }

    fn shm_unlink(&self, path: &str) -> i64 {
        self.shm.unlink(path)
    }

    fn ksem(&self, mode: KsemMode, id: u32, timeout_ms: i64) -> i64 {
        let tid = self.sched.current_tid();
        match mode {
            KsemMode::Create => self.ksem.create(id, tid),
            KsemMode::Destroy => self.ksem.destroy(id, tid),
            KsemMode::Lock => self.ksem.lock(id, tid, timeout_ms),
            KsemMode::Unlock => self.ksem.unlock(id, tid),
        }
    }
}

// -------------------------------------------------------------------------
// Boot
// -------------------------------------------------------------------------

static HOST: OnceLock<HostKernel> = OnceLock::new();

/// Boot the process-wide reference kernel and install it as the runtime's
/// dispatcher. Idempotent; later calls return the same kernel.
pub fn boot() -> &'static HostKernel {
    let host = HOST.get_or_init(HostKernel::with_defaults);
    syscall::install(host);
    host
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_validates_timeslice() {
        let err = HostKernel::builder().timeslice_ms(0).build();
        assert!(matches!(err, Err(KernelConfigError::Timeslice(0))));
    }

    #[test]
    fn builder_validates_key_table() {
        let err = HostKernel::builder().max_tsd_keys(0).build();
        assert!(matches!(err, Err(KernelConfigError::KeyTable(0))));
        let err = HostKernel::builder()
            .max_tsd_keys(MAX_TSD_KEYS_LIMIT + 1)
            .build();
        assert!(matches!(err, Err(KernelConfigError::KeyTable(_))));
    }

    #[test]
    fn builder_accepts_defaults() {
        assert!(HostKernel::builder().build().is_ok());
    }

    #[test]
    fn unknown_ops_are_enosys() {
        let kernel = HostKernel::with_defaults();
        assert_eq!(kernel.dispatch(Category::Ctrl, 999, 0, 0, 0), -ENOSYS);
        assert_eq!(kernel.dispatch(Category::Sync, 999, 0, 0, 0), -ENOSYS);
        assert_eq!(kernel.dispatch(Category::Signal, 999, 0, 0, 0), -ENOSYS);
        assert_eq!(kernel.dispatch(Category::Sched, 999, 0, 0, 0), -ENOSYS);
    }

    #[test]
    fn atomic_ops_on_a_local_word() {
        let kernel = HostKernel::with_defaults();
        let word = AtomicI32::new(5);
        let addr = word.as_ptr() as usize as i64;
        use uthread_core::syscall as ops;

        assert_eq!(kernel.dispatch(Category::Atomic, ops::ATOMIC_INCREMENT, addr, 0, 0), 6);
        assert_eq!(kernel.dispatch(Category::Atomic, ops::ATOMIC_DECREMENT, addr, 0, 0), 5);
        assert_eq!(kernel.dispatch(Category::Atomic, ops::ATOMIC_CAS, addr, 5, 9), 1);
        assert_eq!(kernel.dispatch(Category::Atomic, ops::ATOMIC_CAS, addr, 5, 9), 0);
        assert_eq!(kernel.dispatch(Category::Atomic, ops::ATOMIC_EXCHANGE, addr, 2, 0), 9);
        assert_eq!(kernel.dispatch(Category::Atomic, ops::ATOMIC_ADD, addr, 10, 0), 12);
        assert_eq!(kernel.dispatch(Category::Atomic, ops::ATOMIC_AND, addr, 0xC, 0), 12);
        assert_eq!(kernel.dispatch(Category::Atomic, ops::ATOMIC_OR, addr, 1, 0), 13);
        assert_eq!(kernel.dispatch(Category::Atomic, ops::ATOMIC_XOR, addr, 1, 0), 12);
        assert_eq!(word.load(Ordering::SeqCst), 12);
    }
}
