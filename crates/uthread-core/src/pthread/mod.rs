//! POSIX-style threads.
//!
//! Thread lifecycle, mutexes, condition variables, reader-writer locks,
//! barriers, spinlocks, thread-specific data, cleanup handlers, per-thread
//! signals, and the thread pool.

pub mod attr;
pub mod barrier;
#[allow(unsafe_code)]
pub mod cleanup;
pub mod cond;
pub mod mutex;
#[allow(unsafe_code)]
pub mod pool;
pub mod rwlock;
pub mod sched;
pub mod signal;
#[allow(unsafe_code)]
pub mod spin;
#[allow(unsafe_code)]
pub mod thread;
pub mod tls;

pub use attr::{SCHED_FIFO, SCHED_OTHER, SCHED_RR, ThreadAttr};
pub use barrier::{BARRIER_SERIAL_THREAD, Barrier};
pub use cond::{CONDVAR_MAGIC, Cond};
pub use mutex::{
    MUTEX_DEFAULT, MUTEX_ERRORCHECK, MUTEX_NORMAL, MUTEX_RECURSIVE, Mutex, MutexAttr,
};
pub use pool::ThreadPool;
pub use rwlock::RwLock;
pub use signal::SigSet;
pub use spin::SpinLock;
pub use thread::{CANCELED_RETVAL, Tid};
pub use tls::{Key, Once};
