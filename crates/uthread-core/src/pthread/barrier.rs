//! Barriers.
//!
//! Composed in user space from an embedded mutex and condition variable.
//! The generation counter demarcates trips so the barrier is immediately
//! reusable: a waiter sleeps while its recorded generation is still current,
//! which also absorbs spurious cv wakeups.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::errno;
use crate::pthread::cond::Cond;
use crate::pthread::mutex::Mutex;

/// Returned to exactly one waiter per trip.
pub const BARRIER_SERIAL_THREAD: i32 = 1;

/// A reusable counting barrier.
///
/// The counters are atomics only so the type is shareable; they are read and
/// written exclusively under the embedded mutex.
#[derive(Debug)]
pub struct Barrier {
    mutex: Mutex,
    cond: Cond,
    count: AtomicU32,
    waiting: AtomicU32,
    generation: AtomicU32,
}

impl Default for Barrier {
    fn default() -> Self {
        Barrier::new()
    }
}

impl Barrier {
    /// An uninitialized barrier; call [`Barrier::init`] before use.
    #[must_use]
    pub const fn new() -> Self {
        Barrier {
            mutex: Mutex::new(),
            cond: Cond::new(),
            count: AtomicU32::new(0),
            waiting: AtomicU32::new(0),
            generation: AtomicU32::new(0),
        }
    }

    /// Initialize for `count` participants. `count == 0` is `EINVAL`.
    pub fn init(&self, count: u32) -> Result<(), i32> {
        if count == 0 {
            return Err(errno::EINVAL);
        }
        self.mutex.init(None)?;
        if let Err(e) = self.cond.init() {
            let _ = self.mutex.destroy();
            return Err(e);
        }
        self.count.store(count, Ordering::Relaxed);
        self.waiting.store(0, Ordering::Relaxed);
        self.generation.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Block until `count` threads have arrived.
    ///
    /// Exactly one arrival per trip observes [`BARRIER_SERIAL_THREAD`]; the
    /// rest observe 0.
    pub fn wait(&self) -> Result<i32, i32> {
        self.mutex.lock()?;

        let generation = self.generation.load(Ordering::Relaxed);
        let arrived = self.waiting.load(Ordering::Relaxed) + 1;
        self.waiting.store(arrived, Ordering::Relaxed);

        if arrived == self.count.load(Ordering::Relaxed) {
            self.waiting.store(0, Ordering::Relaxed);
            self.generation.store(generation.wrapping_add(1), Ordering::Relaxed);
            let _ = self.cond.broadcast();
            self.mutex.unlock()?;
            return Ok(BARRIER_SERIAL_THREAD);
        }

        while generation == self.generation.load(Ordering::Relaxed) {
            if let Err(e) = self.cond.wait(&self.mutex) {
                let waiting = self.waiting.load(Ordering::Relaxed);
                self.waiting.store(waiting.saturating_sub(1), Ordering::Relaxed);
                let _ = self.mutex.unlock();
                return Err(e);
            }
        }

        self.mutex.unlock()?;
        Ok(0)
    }

    /// Destroy the barrier; `EBUSY` while any thread is parked in `wait`.
    pub fn destroy(&self) -> Result<(), i32> {
        self.mutex.lock()?;
        if self.waiting.load(Ordering::Relaxed) > 0 {
            let _ = self.mutex.unlock();
            return Err(errno::EBUSY);
        }
        self.mutex.unlock()?;
        self.mutex.destroy()?;
        self.cond.destroy()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_thread_constant() {
        assert_eq!(BARRIER_SERIAL_THREAD, 1);
    }

    #[test]
    fn zero_count_is_rejected() {
        let barrier = Barrier::new();
        assert_eq!(barrier.init(0), Err(errno::EINVAL));
    }

    #[test]
    fn uninitialized_barrier_wait_fails() {
        let barrier = Barrier::new();
        assert_eq!(barrier.wait(), Err(errno::EINVAL));
    }
}
