//! FIFO wait queues and the per-waiter parking slot.
//!
//! Every blocking trap parks the caller on a one-shot [`WaitSlot`]; the
//! object it blocked on keeps the slot in a FIFO queue. Wakers claim a slot
//! by writing its status exactly once, so a waiter that timed out (and
//! claimed its own slot) is skipped by [`wake_one`] and the wakeup goes to
//! the next live entry — no lost tokens, no double grants.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Status a timed-out waiter claims its own slot with.
pub const STATUS_TIMEOUT: i64 = i64::MIN;

/// A one-shot parking slot.
pub struct WaitSlot {
    state: Mutex<Option<i64>>,
    cond: Condvar,
    cancellable: bool,
}

impl WaitSlot {
    pub fn new(cancellable: bool) -> Arc<WaitSlot> {
        Arc::new(WaitSlot {
            state: Mutex::new(None),
            cond: Condvar::new(),
            cancellable,
        })
    }

    /// True if cancellation may claim this slot.
    pub fn cancellable(&self) -> bool {
        self.cancellable
    }

    /// Park until a waker claims the slot; returns the claimed status.
    pub fn wait(&self) -> i64 {
        let mut state = self.state.lock();
        while state.is_none() {
            self.cond.wait(&mut state);
        }
        state.unwrap_or(STATUS_TIMEOUT)
    }

    /// Park for at most `ms` milliseconds.
    ///
    /// On timeout the waiter claims its own slot with [`STATUS_TIMEOUT`] so
    /// late wakers skip it; a waker that got in first wins and its status is
    /// returned instead.
    pub fn wait_for(&self, ms: i64) -> i64 {
        let mut state = self.state.lock();
        let deadline = std::time::Instant::now() + Duration::from_millis(ms.max(0) as u64);
        while state.is_none() {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                if state.is_none() {
                    *state = Some(STATUS_TIMEOUT);
                }
                break;
            }
        }
        state.unwrap_or(STATUS_TIMEOUT)
    }

    /// Claim the slot with `status` and wake the parked thread.
    /// Fails if the slot was already claimed (woken, cancelled, timed out).
    pub fn try_wake(&self, status: i64) -> bool {
        let mut state = self.state.lock();
        if state.is_some() {
            return false;
        }
        *state = Some(status);
        self.cond.notify_one();
        true
    }

    /// True while nobody has claimed the slot.
    pub fn is_waiting(&self) -> bool {
        self.state.lock().is_none()
    }
}

/// A queued waiter: the blocked thread and its slot.
pub struct Waiter {
    pub tid: i64,
    pub slot: Arc<WaitSlot>,
}

/// FIFO of blocked threads.
pub type WaitQueue = VecDeque<Waiter>;

/// Pop entries until one is successfully woken with `status`; returns its
/// tid. Claimed (timed-out, cancelled) entries are discarded along the way.
pub fn wake_one(queue: &mut WaitQueue, status: i64) -> Option<i64> {
    while let Some(waiter) = queue.pop_front() {
        if waiter.slot.try_wake(status) {
            return Some(waiter.tid);
        }
    }
    None
}

/// Wake every live entry with `status`; returns how many woke.
pub fn wake_all(queue: &mut WaitQueue, status: i64) -> usize {
    let mut woken = 0;
    while let Some(waiter) = queue.pop_front() {
        if waiter.slot.try_wake(status) {
            woken += 1;
        }
    }
    woken
}

/// Number of entries still parked.
pub fn live_waiters(queue: &WaitQueue) -> usize {
    queue.iter().filter(|w| w.slot.is_waiting()).count()
}

/// Drop the entry for `slot`, if still queued.
pub fn remove_waiter(queue: &mut WaitQueue, slot: &Arc<WaitSlot>) {
    queue.retain(|w| !Arc::ptr_eq(&w.slot, slot));
}
