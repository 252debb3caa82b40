//! Per-thread signal state.
//!
//! Pending bits accumulate on the target thread; `sigwait`-style traps
//! consume them. A kill that finds a matching waiter hands the signal over
//! directly instead of leaving it pending. Alarms are deferred kills driven
//! by a timer thread.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use log::debug;

use crate::sched::Scheduler;
use crate::waitq::STATUS_TIMEOUT;

const ESRCH: i64 = 3;
const EAGAIN: i64 = 11;
const EINVAL: i64 = 22;

/// The alarm signal number.
pub const SIGALRM: i64 = 14;

fn valid_signal(sig: i64) -> bool {
    (1..32).contains(&sig)
}

impl Scheduler {
    /// SIG KILL: deliver `sig` to thread `tid`.
    pub fn sig_kill(&self, tid: i64, sig: i64) -> i64 {
        if !valid_signal(sig) {
            return -EINVAL;
        }
        let Some(rec) = self.rec(tid) else {
            return -ESRCH;
        };
        let bit = 1u64 << sig;
        let mut st = rec.state.lock();
        if let Some((waitset, slot)) = st.sigwait.clone() {
            if waitset & bit != 0 && slot.try_wake(sig) {
                st.sigwait = None;
                return 0;
            }
        }
        st.sigpending |= bit;
        0
    }

    /// SIG BROADCAST: deliver `sig` to every live thread.
    pub fn sig_broadcast(&self, sig: i64) -> i64 {
        if !valid_signal(sig) {
            return -EINVAL;
        }
        for rec in self.all_recs() {
            self.sig_kill(rec.tid, sig);
        }
        0
    }

    /// SIG GETMASK.
    pub fn sig_getmask(&self) -> i64 {
        let rec = self.current_rec();
        let mask = rec.state.lock().sigmask;
        mask as i64
    }

    /// SIG SETMASK / BLOCK / UNBLOCK.
    pub fn sig_setmask(&self, bits: u64) -> i64 {
        let rec = self.current_rec();
        rec.state.lock().sigmask = bits;
        0
    }

    pub fn sig_block(&self, bits: u64) -> i64 {
        let rec = self.current_rec();
        rec.state.lock().sigmask |= bits;
        0
    }

    pub fn sig_unblock(&self, bits: u64) -> i64 {
        let rec = self.current_rec();
        rec.state.lock().sigmask &= !bits;
        0
    }

    /// SIG PENDING: the caller's pending set.
    pub fn sig_pending(&self) -> i64 {
        let rec = self.current_rec();
        let pending = rec.state.lock().sigpending;
        pending as i64
    }

    /// SIG WAIT: consume one signal from `waitset`.
    ///
    /// `timeout_ms` of -1 waits forever, 0 polls, otherwise bounds the wait;
    /// expiry is `-EAGAIN`. A cancellation point.
    pub fn sig_wait(&self, waitset: u64, timeout_ms: i64) -> i64 {
        let rec = self.current_rec();

        let parked = match self.prepare_block(true) {
            Ok(slot) => slot,
            Err(e) => return e,
        };
        {
            let mut st = rec.state.lock();
            let ready = st.sigpending & waitset;
            if ready != 0 {
                let sig = i64::from(ready.trailing_zeros());
                st.sigpending &= !(1u64 << sig);
                drop(st);
                self.finish_block();
                return sig;
            }
            if timeout_ms == 0 {
                drop(st);
                self.finish_block();
                return -EAGAIN;
            }
            st.sigwait = Some((waitset, Arc::clone(&parked)));
        }

        let status = if timeout_ms < 0 {
            parked.wait()
        } else {
            parked.wait_for(timeout_ms)
        };
        self.finish_block();
        rec.state.lock().sigwait = None;

        if status == STATUS_TIMEOUT {
            return -EAGAIN;
        }
        status
    }

    /// SIG PAUSE: wait for any signal the caller has not blocked.
    pub fn sig_pause(&self) -> i64 {
        let mask = {
            let rec = self.current_rec();
            let st = rec.state.lock();
            st.sigmask
        };
        self.sig_wait(!mask, -1)
    }

    /// SIG MODE: flip process-wide thread-signal delivery; returns the old
    /// mode.
    pub fn sig_set_mode(&self, enabled: bool) -> i64 {
        i64::from(self.sig_mode.swap(enabled, Ordering::AcqRel))
    }

    /// SIG HANDLER / HANDLER_ARG registration.
    pub fn sig_handler(&self, sig: i64, handler: i64) -> i64 {
        if !valid_signal(sig) {
            return -EINVAL;
        }
        self.sig_handlers.lock()[sig as usize].0 = handler;
        0
    }

    pub fn sig_handler_arg(&self, sig: i64, arg: i64) -> i64 {
        if !valid_signal(sig) {
            return -EINVAL;
        }
        self.sig_handlers.lock()[sig as usize].1 = arg;
        0
    }
}

/// SIG ALARM / ALARM_THREAD: deliver SIGALRM to `tid` (or the initial
/// thread) after `ms` milliseconds.
pub fn sig_alarm(sched: &Arc<Scheduler>, tid: Option<i64>, ms: i64) -> i64 {
    if ms < 0 {
        return -EINVAL;
    }
    let target = match tid {
        Some(tid) => tid,
        None => match sched.initial_rec() {
            Some(rec) => rec.tid,
            None => sched.current_tid(),
        },
    };
    let sched = Arc::clone(sched);
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(ms as u64));
        debug!("signal: alarm fired for thread {target}");
        sched.sig_kill(target, SIGALRM);
    });
    0
}
