//! Kernel-side synchronization objects.
//!
//! Mutexes, condition variables, reader-writer locks, and semaphore wait
//! queues live here behind small integer handles; the user structures carry
//! nothing but those handles. All queues are FIFO and mutex unlock hands the
//! lock directly to the queue head, so wake order is admission order.
//!
//! Semaphore counts stay in user memory: the kernel reads and updates them
//! through the same atomic view the ATOMIC trap category uses, which keeps
//! user-space `trywait` CAS loops and kernel wait/post coherent.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

use log::warn;
use parking_lot::Mutex;

use crate::sched::Scheduler;
use crate::waitq::{self, STATUS_TIMEOUT, WaitQueue, WaitSlot, Waiter};

const EPERM: i64 = 1;
const EBUSY: i64 = 16;
const EINVAL: i64 = 22;
const EDEADLK: i64 = 35;
const EOVERFLOW: i64 = 75;
const ETIMEDOUT: i64 = 110;

const MUTEX_RECURSIVE: i32 = 1;
const MUTEX_ERRORCHECK: i32 = 2;

const SEM_VALUE_MAX: i32 = 32_767;

/// View a user-space lock word through the kernel's atomic lens.
pub(crate) fn user_word(addr: i64) -> &'static AtomicI32 {
    // SAFETY: the user layer passes addresses of `AtomicI32` fields inside
    // structures it keeps alive for the lifetime of the kernel object that
    // references them.
    unsafe { AtomicI32::from_ptr(addr as usize as *mut i32) }
}

struct KMutex {
    kind: i32,
    locked: bool,
    owner: i64,
    recursion: u32,
    queue: WaitQueue,
}

struct KCond {
    mutex_handle: i64,
    queue: WaitQueue,
}

struct RwWaiter {
    tid: i64,
    slot: Arc<WaitSlot>,
    writing: bool,
}

struct KRwLock {
    readers: u32,
    writer: i64,
    queue: std::collections::VecDeque<RwWaiter>,
}

struct KSemQueue {
    queue: WaitQueue,
}

/// Handle tables for every kernel sync object.
pub struct SyncTables {
    mutexes: Mutex<HashMap<i64, Arc<Mutex<KMutex>>>>,
    conds: Mutex<HashMap<i64, Arc<Mutex<KCond>>>>,
    rwlocks: Mutex<HashMap<i64, Arc<Mutex<KRwLock>>>>,
    semqs: Mutex<HashMap<i64, Arc<Mutex<KSemQueue>>>>,
    next_handle: AtomicI64,
}

impl Default for SyncTables {
    fn default() -> Self {
        SyncTables::new()
    }
}

impl SyncTables {
    pub fn new() -> SyncTables {
        SyncTables {
            mutexes: Mutex::new(HashMap::new()),
            conds: Mutex::new(HashMap::new()),
            rwlocks: Mutex::new(HashMap::new()),
            semqs: Mutex::new(HashMap::new()),
            // Handle 0 is reserved for "uninitialized" on the user side.
            next_handle: AtomicI64::new(1),
        }
    }

    fn alloc_handle(&self) -> i64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn mutex(&self, handle: i64) -> Option<Arc<Mutex<KMutex>>> {
        self.mutexes.lock().get(&handle).cloned()
    }

    fn cond(&self, handle: i64) -> Option<Arc<Mutex<KCond>>> {
        self.conds.lock().get(&handle).cloned()
    }

    fn rwlock(&self, handle: i64) -> Option<Arc<Mutex<KRwLock>>> {
        self.rwlocks.lock().get(&handle).cloned()
    }

    fn semq(&self, handle: i64) -> Option<Arc<Mutex<KSemQueue>>> {
        self.semqs.lock().get(&handle).cloned()
    }

    // ---------------------------------------------------------------------
    // Mutex
    // ---------------------------------------------------------------------

    pub fn mutex_init(&self, kind: i64, _protocol: i64, _ceiling: i64) -> i64 {
        if !(0..=2).contains(&kind) {
            return -EINVAL;
        }
        let handle = self.alloc_handle();
        self.mutexes.lock().insert(
            handle,
            Arc::new(Mutex::new(KMutex {
                kind: kind as i32,
                locked: false,
                owner: 0,
                recursion: 0,
                queue: WaitQueue::new(),
            })),
        );
        handle
    }

    /// Blocking lock with direct FIFO handoff. Not a cancellation point.
    pub fn mutex_lock(&self, sched: &Scheduler, handle: i64) -> i64 {
        let tid = sched.current_tid();
        let Some(obj) = self.mutex(handle) else {
            return -EINVAL;
        };

        let parked = {
            let mut m = obj.lock();
            if !m.locked {
                m.locked = true;
                m.owner = tid;
                m.recursion = 1;
                return 0;
            }
            if m.owner == tid {
                match m.kind {
                    MUTEX_RECURSIVE => {
                        m.recursion += 1;
                        return 0;
                    }
                    MUTEX_ERRORCHECK => return -EDEADLK,
                    // NORMAL relock self-deadlocks; queue the caller anyway.
                    _ => {}
                }
            }
            let parked = match sched.prepare_block(false) {
                Ok(slot) => slot,
                Err(e) => return e,
            };
            m.queue.push_back(Waiter {
                tid,
                slot: Arc::clone(&parked),
            });
            parked
        };

        let status = parked.wait();
        sched.finish_block();
        // 0 = ownership handed off by the previous holder.
        status
    }

    pub fn mutex_trylock(&self, sched: &Scheduler, handle: i64) -> i64 {
        let tid = sched.current_tid();
        let Some(obj) = self.mutex(handle) else {
            return -EINVAL;
        };
        let mut m = obj.lock();
        if !m.locked {
            m.locked = true;
            m.owner = tid;
            m.recursion = 1;
            return 0;
        }
        if m.owner == tid && m.kind == MUTEX_RECURSIVE {
            m.recursion += 1;
            return 0;
        }
        -EBUSY
    }

    pub fn mutex_unlock(&self, sched: &Scheduler, handle: i64) -> i64 {
        let tid = sched.current_tid();
        self.mutex_unlock_as(handle, tid)
    }

    fn mutex_unlock_as(&self, handle: i64, tid: i64) -> i64 {
        let Some(obj) = self.mutex(handle) else {
            return -EINVAL;
        };
        let mut m = obj.lock();
        if !m.locked || m.owner != tid {
            return -EPERM;
        }
        if m.recursion > 1 {
            m.recursion -= 1;
            return 0;
        }
        match waitq::wake_one(&mut m.queue, 0) {
            Some(next) => {
                // Handoff: the mutex never reads unlocked in between, so
                // admission order is wake order.
                m.owner = next;
                m.recursion = 1;
            }
            None => {
                m.locked = false;
                m.owner = 0;
                m.recursion = 0;
            }
        }
        0
    }

    pub fn mutex_destroy(&self, handle: i64) -> i64 {
        let Some(obj) = self.mutex(handle) else {
            return -EINVAL;
        };
        {
            let m = obj.lock();
            if m.locked || waitq::live_waiters(&m.queue) > 0 {
                return -EBUSY;
            }
        }
        self.mutexes.lock().remove(&handle);
        0
    }

    // ---------------------------------------------------------------------
    // Condition variables
    // ---------------------------------------------------------------------

    pub fn cond_init(&self) -> i64 {
        let handle = self.alloc_handle();
        self.conds.lock().insert(
            handle,
            Arc::new(Mutex::new(KCond {
                mutex_handle: 0,
                queue: WaitQueue::new(),
            })),
        );
        handle
    }

    /// Wait on `cv_handle`, atomically releasing `mutex_handle`.
    ///
    /// `timeout_ms` of `None` waits forever. The mutex is reacquired before
    /// returning, whatever the outcome. A cancellation point.
    pub fn cond_wait(
        &self,
        sched: &Scheduler,
        cv_handle: i64,
        mutex_handle: i64,
        timeout_ms: Option<i64>,
    ) -> i64 {
        let tid = sched.current_tid();
        let Some(obj) = self.cond(cv_handle) else {
            return -EINVAL;
        };

        let parked = match sched.prepare_block(true) {
            Ok(slot) => slot,
            Err(e) => return e,
        };

        {
            let mut cv = obj.lock();
            if cv.mutex_handle == 0 {
                cv.mutex_handle = mutex_handle;
            } else if cv.mutex_handle != mutex_handle {
                // All concurrent waiters must share one associated mutex.
                sched.finish_block();
                return -EINVAL;
            }
            cv.queue.push_back(Waiter {
                tid,
                slot: Arc::clone(&parked),
            });

            // Release the mutex while the cv is locked: no signal can slip
            // between the enqueue and the unlock.
            let unlocked = self.mutex_unlock_as(mutex_handle, tid);
            if unlocked < 0 {
                waitq::remove_waiter(&mut cv.queue, &parked);
                if cv.queue.is_empty() {
                    cv.mutex_handle = 0;
                }
                sched.finish_block();
                return unlocked;
            }
        }

        let status = match timeout_ms {
            None => parked.wait(),
            Some(ms) => parked.wait_for(ms),
        };
        sched.finish_block();

        if status == STATUS_TIMEOUT || status < 0 {
            // Timed out or cancelled: the entry is still queued; drop it.
            let mut cv = obj.lock();
            waitq::remove_waiter(&mut cv.queue, &parked);
            if cv.queue.is_empty() {
                cv.mutex_handle = 0;
            }
        }

        // Reacquire before returning, whatever happened while parked.
        let relock = self.mutex_lock(sched, mutex_handle);
        if relock < 0 {
            return relock;
        }
        if status == STATUS_TIMEOUT {
            return -ETIMEDOUT;
        }
        if status < 0 {
            return status;
        }
        0
    }

    pub fn cond_signal(&self, cv_handle: i64) -> i64 {
        let Some(obj) = self.cond(cv_handle) else {
            return -EINVAL;
        };
        let mut cv = obj.lock();
        waitq::wake_one(&mut cv.queue, 0);
        if cv.queue.is_empty() {
            cv.mutex_handle = 0;
        }
        0
    }

    pub fn cond_broadcast(&self, cv_handle: i64) -> i64 {
        let Some(obj) = self.cond(cv_handle) else {
            return -EINVAL;
        };
        let mut cv = obj.lock();
        waitq::wake_all(&mut cv.queue, 0);
        cv.mutex_handle = 0;
        0
    }

    pub fn cond_destroy(&self, cv_handle: i64) -> i64 {
        let Some(obj) = self.cond(cv_handle) else {
            return -EINVAL;
        };
        {
            let cv = obj.lock();
            if waitq::live_waiters(&cv.queue) > 0 {
                warn!("sync: cond {cv_handle} destroyed with live waiters refused");
                return -EBUSY;
            }
        }
        self.conds.lock().remove(&cv_handle);
        0
    }

    // ---------------------------------------------------------------------
    // Reader-writer locks
    // ---------------------------------------------------------------------

    pub fn rwlock_init(&self) -> i64 {
        let handle = self.alloc_handle();
        self.rwlocks.lock().insert(
            handle,
            Arc::new(Mutex::new(KRwLock {
                readers: 0,
                writer: 0,
                queue: std::collections::VecDeque::new(),
            })),
        );
        handle
    }

    /// Grant the queue head: one writer, or every leading reader.
    fn rw_grant_next(rw: &mut KRwLock) {
        loop {
            let writing = match rw.queue.front() {
                Some(w) => w.writing,
                None => return,
            };
            if writing {
                if rw.readers == 0 && rw.writer == 0 {
                    if let Some(w) = rw.queue.pop_front() {
                        rw.writer = w.tid;
                        w.slot.try_wake(0);
                    }
                }
                return;
            }
            if let Some(w) = rw.queue.pop_front() {
                rw.readers += 1;
                w.slot.try_wake(0);
            }
        }
    }

    pub fn rwlock_rdlock(&self, sched: &Scheduler, handle: i64, blocking: bool) -> i64 {
        let tid = sched.current_tid();
        let Some(obj) = self.rwlock(handle) else {
            return -EINVAL;
        };
        let parked = {
            let mut rw = obj.lock();
            // Reader-preferring: a free writer slot admits readers even past
            // queued writers.
            if rw.writer == 0 {
                rw.readers += 1;
                return 0;
            }
            if !blocking {
                return -EBUSY;
            }
            let parked = match sched.prepare_block(false) {
                Ok(slot) => slot,
                Err(e) => return e,
            };
            rw.queue.push_back(RwWaiter {
                tid,
                slot: Arc::clone(&parked),
                writing: false,
            });
            parked
        };
        let status = parked.wait();
        sched.finish_block();
        status
    }

    pub fn rwlock_wrlock(&self, sched: &Scheduler, handle: i64, blocking: bool) -> i64 {
        let tid = sched.current_tid();
        let Some(obj) = self.rwlock(handle) else {
            return -EINVAL;
        };
        let parked = {
            let mut rw = obj.lock();
            if rw.writer == 0 && rw.readers == 0 {
                rw.writer = tid;
                return 0;
            }
            if !blocking {
                return -EBUSY;
            }
            let parked = match sched.prepare_block(false) {
                Ok(slot) => slot,
                Err(e) => return e,
            };
            rw.queue.push_back(RwWaiter {
                tid,
                slot: Arc::clone(&parked),
                writing: true,
            });
            parked
        };
        let status = parked.wait();
        sched.finish_block();
        status
    }

    pub fn rwlock_unlock(&self, sched: &Scheduler, handle: i64) -> i64 {
        let tid = sched.current_tid();
        let Some(obj) = self.rwlock(handle) else {
            return -EINVAL;
        };
        let mut rw = obj.lock();
        if rw.writer == tid {
            rw.writer = 0;
            Self::rw_grant_next(&mut rw);
            return 0;
        }
        if rw.readers > 0 {
            rw.readers -= 1;
            if rw.readers == 0 {
                Self::rw_grant_next(&mut rw);
            }
            return 0;
        }
        -EPERM
    }

    pub fn rwlock_destroy(&self, handle: i64) -> i64 {
        let Some(obj) = self.rwlock(handle) else {
            return -EINVAL;
        };
        {
            let rw = obj.lock();
            if rw.writer != 0 || rw.readers > 0 || !rw.queue.is_empty() {
                return -EBUSY;
            }
        }
        self.rwlocks.lock().remove(&handle);
        0
    }

    // ---------------------------------------------------------------------
    // Semaphore wait queues
    // ---------------------------------------------------------------------

    /// SEM_INIT: store the initial count and allocate the wait queue.
    pub fn sem_init(&self, count_addr: i64, value: i64) -> i64 {
        if count_addr == 0 {
            return -EINVAL;
        }
        user_word(count_addr).store(value as i32, Ordering::SeqCst);
        let handle = self.alloc_handle();
        self.semqs.lock().insert(
            handle,
            Arc::new(Mutex::new(KSemQueue {
                queue: WaitQueue::new(),
            })),
        );
        handle
    }

    /// SEM_WAIT: decrement the count or park on the queue. A cancellation
    /// point. A waiter woken by post receives the token directly — the
    /// count is never incremented past it.
    pub fn sem_wait(&self, sched: &Scheduler, count_addr: i64, handle: i64) -> i64 {
        let tid = sched.current_tid();
        let Some(obj) = self.semq(handle) else {
            return -EINVAL;
        };
        let count = user_word(count_addr);

        let parked = {
            let mut q = obj.lock();
            loop {
                let current = count.load(Ordering::SeqCst);
                if current <= 0 {
                    break;
                }
                if count
                    .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    return 0;
                }
            }
            let parked = match sched.prepare_block(true) {
                Ok(slot) => slot,
                Err(e) => return e,
            };
            q.queue.push_back(Waiter {
                tid,
                slot: Arc::clone(&parked),
            });
            parked
        };

        let status = parked.wait();
        sched.finish_block();
        if status < 0 {
            let mut q = obj.lock();
            waitq::remove_waiter(&mut q.queue, &parked);
        }
        status
    }

    /// SEM_POST: hand the token to the queue head, or bump the count.
    pub fn sem_post(&self, count_addr: i64, handle: i64) -> i64 {
        let Some(obj) = self.semq(handle) else {
            return -EINVAL;
        };
        let mut q = obj.lock();
        if waitq::wake_one(&mut q.queue, 0).is_some() {
            return 0;
        }
        let count = user_word(count_addr);
        loop {
            let current = count.load(Ordering::SeqCst);
            if current >= SEM_VALUE_MAX {
                return -EOVERFLOW;
            }
            if count
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return 0;
            }
        }
    }

    /// SEM_DESTROY: refuse while waiters are parked.
    pub fn sem_destroy(&self, handle: i64) -> i64 {
        let Some(obj) = self.semq(handle) else {
            return -EINVAL;
        };
        {
            let q = obj.lock();
            if waitq::live_waiters(&q.queue) > 0 {
                return -EBUSY;
            }
        }
        self.semqs.lock().remove(&handle);
        0
    }
}
