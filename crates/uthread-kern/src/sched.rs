//! Thread registry and control operations.
//!
//! Host threads stand in for kernel threads: every runtime thread (and any
//! foreign thread that issues a trap) gets a registry record carrying its
//! lifecycle phase, name, cancellation state, TSD values, cleanup stack,
//! signal state, and scheduling parameters. A thread that exits parks as a
//! ZOMBIE until join or detach reaps the record.
//!
//! ## Blocking and cancellation
//!
//! Every blocking trap parks on a one-shot [`WaitSlot`] registered in the
//! caller's record. Cancel marks the pending flag and, when the parked slot
//! is a cancellation point, claims it with `-ECANCELED`; the slot stays in
//! whatever object queue it was on and is skipped at wake time.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use log::{debug, warn};
use parking_lot::Mutex;

use uthread_core::syscall::SpawnAttrs;

use crate::waitq::{self, STATUS_TIMEOUT, WaitQueue, WaitSlot, Waiter};

const ESRCH: i64 = 3;
const EAGAIN: i64 = 11;
const ENOMEM: i64 = 12;
const EINVAL: i64 = 22;
const EDEADLK: i64 = 35;
const ECANCELED: i64 = 125;

/// Destructor passes made while reaping TSD values at exit.
pub const DESTRUCTOR_ITERATIONS: usize = 4;

/// Thread state bits reported by CTRL STATUS.
pub const STATE_RUNNING: i64 = 0x0001;
pub const STATE_ZOMBIE: i64 = 0x0010;

thread_local! {
    static CURRENT_TID: Cell<i64> = const { Cell::new(0) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Running,
    Zombie,
}

pub(crate) struct RecState {
    pub(crate) phase: Phase,
    pub(crate) retval: i64,
    pub(crate) detached: bool,
    pub(crate) join_claimed: bool,
    pub(crate) joiners: WaitQueue,
    pub(crate) name: [u8; 16],
    pub(crate) cancel_pending: bool,
    pub(crate) cancel_enabled: bool,
    pub(crate) cancel_async: bool,
    pub(crate) blocked: Option<Arc<WaitSlot>>,
    pub(crate) tsd: Vec<i64>,
    pub(crate) cleanup: Vec<(i64, i64)>,
    pub(crate) sigmask: u64,
    pub(crate) sigpending: u64,
    pub(crate) sigwait: Option<(u64, Arc<WaitSlot>)>,
    pub(crate) policy: i32,
    pub(crate) priority: i32,
    pub(crate) is_initial: bool,
}

impl RecState {
    fn new(is_initial: bool, detached: bool, policy: i32, priority: i32) -> RecState {
        RecState {
            phase: Phase::Running,
            retval: 0,
            detached,
            join_claimed: false,
            joiners: WaitQueue::new(),
            name: [0; 16],
            cancel_pending: false,
            cancel_enabled: true,
            cancel_async: false,
            blocked: None,
            tsd: Vec::new(),
            cleanup: Vec::new(),
            sigmask: 0,
            sigpending: 0,
            sigwait: None,
            policy,
            priority,
            is_initial,
        }
    }
}

/// A registry record; `pthread_t` on the user side is the record's tid.
pub struct ThreadRec {
    pub tid: i64,
    pub(crate) state: Mutex<RecState>,
}

struct KeySlot {
    in_use: bool,
    dtor: i64,
}

/// The thread registry and CTRL-family implementation.
pub struct Scheduler {
    recs: Mutex<HashMap<i64, Arc<ThreadRec>>>,
    next_tid: AtomicI64,
    multithreaded: AtomicBool,
    initial_seen: AtomicBool,
    keys: Mutex<Vec<KeySlot>>,
    timeslice_ms: AtomicI64,
    max_keys: usize,
    pub(crate) sig_mode: AtomicBool,
    pub(crate) sig_handlers: Mutex<[(i64, i64); 32]>,
}

impl Scheduler {
    pub fn new(timeslice_ms: i64, max_keys: usize) -> Scheduler {
        Scheduler {
            recs: Mutex::new(HashMap::new()),
            next_tid: AtomicI64::new(1),
            multithreaded: AtomicBool::new(false),
            initial_seen: AtomicBool::new(false),
            keys: Mutex::new(Vec::new()),
            timeslice_ms: AtomicI64::new(timeslice_ms),
            max_keys,
            sig_mode: AtomicBool::new(true),
            sig_handlers: Mutex::new([(0, 0); 32]),
        }
    }

    // ---------------------------------------------------------------------
    // Identification
    // ---------------------------------------------------------------------

    fn alloc_tid(&self) -> i64 {
        self.next_tid.fetch_add(1, Ordering::Relaxed)
    }

    /// The caller's tid, registering foreign threads on first contact.
    ///
    /// The first thread ever seen is the process's initial thread.
    pub fn current_tid(&self) -> i64 {
        let tid = CURRENT_TID.with(Cell::get);
        if tid != 0 {
            return tid;
        }
        let tid = self.alloc_tid();
        let is_initial = !self.initial_seen.swap(true, Ordering::AcqRel);
        let rec = Arc::new(ThreadRec {
            tid,
            state: Mutex::new(RecState::new(is_initial, false, 0, 0)),
        });
        self.recs.lock().insert(tid, rec);
        CURRENT_TID.with(|slot| slot.set(tid));
        tid
    }

    pub(crate) fn rec(&self, tid: i64) -> Option<Arc<ThreadRec>> {
        self.recs.lock().get(&tid).cloned()
    }

    pub(crate) fn current_rec(&self) -> Arc<ThreadRec> {
        let tid = self.current_tid();
        match self.rec(tid) {
            Some(rec) => rec,
            None => {
                // The record was reaped out from under a live thread; start a
                // fresh one so traps keep working.
                warn!("sched: thread {tid} has no record, re-registering");
                CURRENT_TID.with(|slot| slot.set(0));
                self.current_rec()
            }
        }
    }

    pub(crate) fn all_recs(&self) -> Vec<Arc<ThreadRec>> {
        self.recs.lock().values().cloned().collect()
    }

    pub fn is_multithreaded(&self) -> bool {
        self.multithreaded.load(Ordering::Acquire)
    }

    // ---------------------------------------------------------------------
    // Blocking bookkeeping
    // ---------------------------------------------------------------------

    /// Make a parking slot for the caller and register it for cancellation
    /// delivery. At cancellation points a pending cancel is consumed here,
    /// before the caller ever parks.
    pub(crate) fn prepare_block(&self, cancellable: bool) -> Result<Arc<WaitSlot>, i64> {
        let rec = self.current_rec();
        let mut st = rec.state.lock();
        if cancellable && st.cancel_enabled && st.cancel_pending {
            st.cancel_pending = false;
            return Err(-ECANCELED);
        }
        let slot = WaitSlot::new(cancellable);
        st.blocked = Some(Arc::clone(&slot));
        Ok(slot)
    }

    pub(crate) fn finish_block(&self) {
        let rec = self.current_rec();
        rec.state.lock().blocked = None;
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Create a thread running `entry(arg)` on a host thread.
    pub fn spawn(self: &Arc<Scheduler>, entry: fn(usize) -> usize, arg: usize, attrs: SpawnAttrs) -> i64 {
        let tid = self.alloc_tid();
        let rec = Arc::new(ThreadRec {
            tid,
            state: Mutex::new(RecState::new(false, attrs.detached, attrs.policy, attrs.priority)),
        });
        self.recs.lock().insert(tid, rec);
        self.multithreaded.store(true, Ordering::Release);

        let mut builder = std::thread::Builder::new().name(format!("uthread-{tid}"));
        if attrs.stack_size > 0 {
            builder = builder.stack_size(attrs.stack_size);
        }

        let sched = Arc::clone(self);
        let spawned = builder.spawn(move || {
            CURRENT_TID.with(|slot| slot.set(tid));
            let retval = entry(arg);
            // The trampoline exits through CTRL EXIT; this only fires when
            // user code bypasses the runtime entirely.
            if let Some(rec) = sched.rec(tid) {
                let live = rec.state.lock().phase == Phase::Running;
                if live {
                    sched.exit_current(retval as i64);
                }
            }
        });

        match spawned {
            Ok(_handle) => {
                debug!("sched: spawned thread {tid}");
                tid
            }
            Err(_) => {
                self.recs.lock().remove(&tid);
                -ENOMEM
            }
        }
    }

    /// CTRL EXIT: run TSD destructors in the exiting thread's context, then
    /// park the record as a zombie and wake joiners.
    pub fn exit_current(&self, retval: i64) {
        let rec = self.current_rec();
        self.run_tsd_destructors(&rec);

        let detached = {
            let mut st = rec.state.lock();
            st.phase = Phase::Zombie;
            st.retval = retval;
            waitq::wake_all(&mut st.joiners, 0);
            st.detached
        };
        debug!("sched: thread {} exited ({})", rec.tid, retval);
        if detached {
            self.recs.lock().remove(&rec.tid);
        }
    }

    /// SYNC JOIN: block until `tid` is a zombie, reap it, hand back its
    /// return value. A cancellation point.
    pub fn join(&self, tid: i64, retval_out: i64) -> i64 {
        let me = self.current_tid();
        if tid == me {
            return -EDEADLK;
        }
        let Some(rec) = self.rec(tid) else {
            return -ESRCH;
        };

        let parked = match self.prepare_block(true) {
            Ok(slot) => slot,
            Err(e) => return e,
        };
        let must_wait = {
            let mut st = rec.state.lock();
            if st.detached || st.join_claimed {
                drop(st);
                self.finish_block();
                return -EINVAL;
            }
            st.join_claimed = true;
            match st.phase {
                Phase::Zombie => false,
                Phase::Running => {
                    st.joiners.push_back(Waiter {
                        tid: me,
                        slot: Arc::clone(&parked),
                    });
                    true
                }
            }
        };

        if must_wait {
            let status = parked.wait();
            self.finish_block();
            if status < 0 {
                let mut st = rec.state.lock();
                st.join_claimed = false;
                waitq::remove_waiter(&mut st.joiners, &parked);
                return status;
            }
        } else {
            self.finish_block();
        }

        self.reap(&rec, retval_out)
    }

    /// SYNC TRYJOIN: non-blocking join; `-EBUSY` while the target is live.
    pub fn try_join(&self, tid: i64, retval_out: i64) -> i64 {
        const EBUSY: i64 = 16;
        if tid == self.current_tid() {
            return -EDEADLK;
        }
        let Some(rec) = self.rec(tid) else {
            return -ESRCH;
        };
        {
            let mut st = rec.state.lock();
            if st.detached || st.join_claimed {
                return -EINVAL;
            }
            if st.phase == Phase::Running {
                return -EBUSY;
            }
            st.join_claimed = true;
        }
        self.reap(&rec, retval_out)
    }

    fn reap(&self, rec: &Arc<ThreadRec>, retval_out: i64) -> i64 {
        let retval = rec.state.lock().retval;
        if retval_out != 0 {
            // SAFETY: the user layer passed the address of a live i64 slot
            // owned by the joining caller.
            unsafe { *(retval_out as usize as *mut i64) = retval };
        }
        self.recs.lock().remove(&rec.tid);
        0
    }

    /// SYNC DETACH.
    pub fn detach(&self, tid: i64) -> i64 {
        let Some(rec) = self.rec(tid) else {
            return -ESRCH;
        };
        let reap_now = {
            let mut st = rec.state.lock();
            if st.detached || st.join_claimed {
                return -EINVAL;
            }
            match st.phase {
                Phase::Zombie => true,
                Phase::Running => {
                    st.detached = true;
                    false
                }
            }
        };
        if reap_now {
            self.recs.lock().remove(&tid);
        }
        0
    }

    /// CTRL STATUS.
    pub fn status(&self, tid: i64) -> i64 {
        match self.rec(tid) {
            Some(rec) => match rec.state.lock().phase {
                Phase::Running => STATE_RUNNING,
                Phase::Zombie => STATE_ZOMBIE,
            },
            None => -ESRCH,
        }
    }

    pub fn is_initial(&self) -> bool {
        self.current_rec().state.lock().is_initial
    }

    pub(crate) fn initial_rec(&self) -> Option<Arc<ThreadRec>> {
        self.all_recs()
            .into_iter()
            .find(|rec| rec.state.lock().is_initial)
    }

    /// SYNC SLEEP: park for `ms`; wakes early only for cancellation.
    pub fn sleep(&self, ms: i64) -> i64 {
        if ms <= 0 {
            std::thread::yield_now();
            return 0;
        }
        let parked = match self.prepare_block(true) {
            Ok(slot) => slot,
            Err(e) => return e,
        };
        let status = parked.wait_for(ms);
        self.finish_block();
        if status == STATUS_TIMEOUT { 0 } else { status }
    }

    /// SYNC YIELD.
    pub fn yield_now(&self) -> i64 {
        std::thread::yield_now();
        0
    }

    /// CTRL SWITCH_TO_THREAD: a uniprocessor scheduling hint.
    pub fn switch_to(&self, tid: i64) -> i64 {
        if self.rec(tid).is_none() {
            return -ESRCH;
        }
        std::thread::yield_now();
        0
    }

    // ---------------------------------------------------------------------
    // Cancellation
    // ---------------------------------------------------------------------

    /// CTRL CANCEL.
    pub fn cancel(&self, tid: i64) -> i64 {
        let Some(rec) = self.rec(tid) else {
            return -ESRCH;
        };
        let mut st = rec.state.lock();
        st.cancel_pending = true;
        if st.cancel_enabled {
            if let Some(slot) = &st.blocked {
                if slot.cancellable() && slot.try_wake(-ECANCELED) {
                    st.cancel_pending = false;
                }
            }
        }
        0
    }

    /// CTRL SETCANCELSTATE; returns the previous state.
    pub fn setcancelstate(&self, state: i64) -> i64 {
        if state != 0 && state != 1 {
            return -EINVAL;
        }
        let rec = self.current_rec();
        let mut st = rec.state.lock();
        let old = i64::from(!st.cancel_enabled);
        st.cancel_enabled = state == 0;
        old
    }

    /// CTRL SETCANCELTYPE; returns the previous type.
    pub fn setcanceltype(&self, kind: i64) -> i64 {
        if kind != 0 && kind != 1 {
            return -EINVAL;
        }
        let rec = self.current_rec();
        let mut st = rec.state.lock();
        let old = i64::from(st.cancel_async);
        st.cancel_async = kind == 1;
        old
    }

    /// CTRL TESTCANCEL: consume a pending cancel; 1 if one was delivered.
    pub fn test_cancel(&self) -> i64 {
        let rec = self.current_rec();
        let mut st = rec.state.lock();
        if st.cancel_enabled && st.cancel_pending {
            st.cancel_pending = false;
            return 1;
        }
        0
    }

    // ---------------------------------------------------------------------
    // Naming
    // ---------------------------------------------------------------------

    /// CTRL SETNAME: copy a 16-byte NUL-terminated name from user memory.
    pub fn setname(&self, tid: i64, name_ptr: i64) -> i64 {
        let Some(rec) = self.rec(tid) else {
            return -ESRCH;
        };
        if name_ptr == 0 {
            return -EINVAL;
        }
        // SAFETY: the user layer always passes a 16-byte buffer it owns for
        // the duration of the trap.
        let src = unsafe { std::slice::from_raw_parts(name_ptr as usize as *const u8, 16) };
        let mut st = rec.state.lock();
        st.name = [0; 16];
        for (i, &b) in src.iter().enumerate() {
            if b == 0 {
                break;
            }
            st.name[i] = b;
        }
        st.name[15] = 0;
        0
    }

    /// CTRL GETNAME: copy the 16-byte name into user memory.
    pub fn getname(&self, tid: i64, name_ptr: i64) -> i64 {
        let Some(rec) = self.rec(tid) else {
            return -ESRCH;
        };
        if name_ptr == 0 {
            return -EINVAL;
        }
        let st = rec.state.lock();
        // SAFETY: the user layer always passes a 16-byte buffer it owns for
        // the duration of the trap.
        unsafe {
            std::ptr::copy_nonoverlapping(st.name.as_ptr(), name_ptr as usize as *mut u8, 16);
        }
        0
    }

    // ---------------------------------------------------------------------
    // Thread-specific data
    // ---------------------------------------------------------------------

    /// TSD CREATE_KEY with an optional destructor word.
    pub fn key_create(&self, dtor: i64) -> i64 {
        let mut keys = self.keys.lock();
        if let Some(id) = keys.iter().position(|k| !k.in_use) {
            keys[id] = KeySlot { in_use: true, dtor };
            return id as i64;
        }
        if keys.len() >= self.max_keys {
            return -EAGAIN;
        }
        keys.push(KeySlot { in_use: true, dtor });
        (keys.len() - 1) as i64
    }

    /// TSD DELETE_KEY. Stored values are dropped without destructors.
    pub fn key_delete(&self, id: i64) -> i64 {
        let mut keys = self.keys.lock();
        match keys.get_mut(id as usize) {
            Some(slot) if slot.in_use => {
                slot.in_use = false;
                slot.dtor = 0;
                0
            }
            _ => -EINVAL,
        }
    }

    fn key_live(&self, id: i64) -> bool {
        self.keys
            .lock()
            .get(id as usize)
            .is_some_and(|k| k.in_use)
    }

    /// TSD GET_SPECIFIC.
    pub fn tsd_get(&self, id: i64) -> i64 {
        if !self.key_live(id) {
            return -EINVAL;
        }
        let rec = self.current_rec();
        let st = rec.state.lock();
        st.tsd.get(id as usize).copied().unwrap_or(0)
    }

    /// TSD SET_SPECIFIC.
    pub fn tsd_set(&self, id: i64, value: i64) -> i64 {
        if !self.key_live(id) {
            return -EINVAL;
        }
        let rec = self.current_rec();
        let mut st = rec.state.lock();
        let idx = id as usize;
        if st.tsd.len() <= idx {
            st.tsd.resize(idx + 1, 0);
        }
        st.tsd[idx] = value;
        0
    }

    /// Run TSD destructors for the exiting thread, up to
    /// [`DESTRUCTOR_ITERATIONS`] passes (a destructor may set new values).
    fn run_tsd_destructors(&self, rec: &Arc<ThreadRec>) {
        for _ in 0..DESTRUCTOR_ITERATIONS {
            let work: Vec<(i64, i64)> = {
                let keys = self.keys.lock();
                let mut st = rec.state.lock();
                let mut batch = Vec::new();
                for (id, key) in keys.iter().enumerate() {
                    if !key.in_use || key.dtor == 0 {
                        continue;
                    }
                    if let Some(value) = st.tsd.get_mut(id) {
                        if *value != 0 {
                            batch.push((*value, key.dtor));
                            *value = 0;
                        }
                    }
                }
                batch
            };
            if work.is_empty() {
                return;
            }
            for (value, dtor) in work {
                // SAFETY: the word is exactly what key_create stored, and the
                // user layer only ever stores `fn(usize)` pointers there.
                let dtor: fn(usize) = unsafe { std::mem::transmute(dtor as usize) };
                dtor(value as usize);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Cleanup handlers
    // ---------------------------------------------------------------------

    /// CLEANUP PUSH.
    pub fn cleanup_push(&self, routine: i64, arg: i64) -> i64 {
        let rec = self.current_rec();
        rec.state.lock().cleanup.push((routine, arg));
        0
    }

    /// CLEANUP POP: write the top entry through the out-pointers.
    /// Returns 1 when an entry was popped, 0 on an empty stack.
    pub fn cleanup_pop(&self, routine_out: i64, arg_out: i64) -> i64 {
        let rec = self.current_rec();
        let entry = rec.state.lock().cleanup.pop();
        let Some((routine, arg)) = entry else {
            return 0;
        };
        if routine_out != 0 {
            // SAFETY: out-pointers come from the user layer's own stack
            // slots, alive for the duration of the trap.
            unsafe { *(routine_out as usize as *mut i64) = routine };
        }
        if arg_out != 0 {
            // SAFETY: as above.
            unsafe { *(arg_out as usize as *mut i64) = arg };
        }
        1
    }

    /// CLEANUP GET: current stack depth.
    pub fn cleanup_depth(&self) -> i64 {
        let rec = self.current_rec();
        let depth = rec.state.lock().cleanup.len();
        depth as i64
    }

    // ---------------------------------------------------------------------
    // Scheduling parameters
    // ---------------------------------------------------------------------

    /// SCHED SETPARAM.
    pub fn setparam(&self, tid: i64, policy: i64, priority: i64) -> i64 {
        if !(0..=2).contains(&policy) {
            return -EINVAL;
        }
        let Some(rec) = self.rec(tid) else {
            return -ESRCH;
        };
        let mut st = rec.state.lock();
        st.policy = policy as i32;
        st.priority = priority as i32;
        0
    }

    /// SCHED GETPARAM: write policy and priority through the out-pointers.
    pub fn getparam(&self, tid: i64, policy_out: i64, priority_out: i64) -> i64 {
        let Some(rec) = self.rec(tid) else {
            return -ESRCH;
        };
        if policy_out == 0 || priority_out == 0 {
            return -EINVAL;
        }
        let st = rec.state.lock();
        // SAFETY: out-pointers come from the user layer's own stack slots,
        // alive for the duration of the trap.
        unsafe {
            *(policy_out as usize as *mut i64) = i64::from(st.policy);
            *(priority_out as usize as *mut i64) = i64::from(st.priority);
        }
        0
    }

    /// SCHED GETRRINTERVAL / GET_TIMESLICE.
    pub fn timeslice(&self) -> i64 {
        self.timeslice_ms.load(Ordering::Acquire)
    }

    /// SCHED SET_TIMESLICE.
    pub fn set_timeslice(&self, ms: i64) -> i64 {
        if ms <= 0 {
            return -EINVAL;
        }
        self.timeslice_ms.store(ms, Ordering::Release);
        0
    }
}
