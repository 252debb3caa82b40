//! Named kernel semaphore slots.
//!
//! Non-counting ownership semaphores identified by a four-character id.
//! One owner at a time; contending lockers queue FIFO and unlock hands the
//! slot to the head of the queue. Destroying a slot evicts every blocked
//! locker with `-ERANGE`, matching the host contract ("blocked processes
//! waiting for a destroyed semaphore receive ERANGE").

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::waitq::{self, STATUS_TIMEOUT, WaitQueue, WaitSlot, Waiter};

const ERANGE: i64 = 34;
const EACCES: i64 = 13;
const EEXIST: i64 = 17;
const ETIMEDOUT: i64 = 110;

struct Slot {
    owner: i64,
    queue: WaitQueue,
}

/// Registry of named semaphore slots.
#[derive(Default)]
pub struct KsemTable {
    slots: Mutex<HashMap<u32, Arc<Mutex<Slot>>>>,
}

fn id_chars(id: u32) -> String {
    String::from_utf8_lossy(&id.to_be_bytes()).into_owned()
}

impl KsemTable {
    pub fn new() -> KsemTable {
        KsemTable::default()
    }

    /// Create slot `id` owned by `tid`. `-EEXIST` if it already exists.
    pub fn create(&self, id: u32, tid: i64) -> i64 {
        let mut slots = self.slots.lock();
        if slots.contains_key(&id) {
            return -EEXIST;
        }
        slots.insert(
            id,
            Arc::new(Mutex::new(Slot {
                owner: tid,
                queue: WaitQueue::new(),
            })),
        );
        debug!("ksem: created slot {} for thread {tid}", id_chars(id));
        0
    }

    /// Destroy slot `id`. Only the owner may destroy; blocked lockers are
    /// evicted with `-ERANGE`.
    pub fn destroy(&self, id: u32, tid: i64) -> i64 {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get(&id) else {
            return -ERANGE;
        };
        {
            let mut s = slot.lock();
            if s.owner != 0 && s.owner != tid {
                return -EACCES;
            }
            waitq::wake_all(&mut s.queue, -ERANGE);
        }
        slots.remove(&id);
        debug!("ksem: destroyed slot {}", id_chars(id));
        0
    }

    /// Acquire ownership of slot `id` for `tid`.
    ///
    /// `timeout_ms`: 0 = try once, -1 = wait forever, otherwise a bound in
    /// milliseconds (`-ETIMEDOUT` on expiry). Re-locking an owned slot is
    /// `-EACCES`.
    pub fn lock(&self, id: u32, tid: i64, timeout_ms: i64) -> i64 {
        let slot = {
            let slots = self.slots.lock();
            match slots.get(&id) {
                Some(slot) => Arc::clone(slot),
                None => return -ERANGE,
            }
        };

        let parked = {
            let mut s = slot.lock();
            if s.owner == tid {
                return -EACCES;
            }
            if s.owner == 0 {
                s.owner = tid;
                return 0;
            }
            if timeout_ms == 0 {
                return -ETIMEDOUT;
            }
            let parked = WaitSlot::new(false);
            s.queue.push_back(Waiter {
                tid,
                slot: Arc::clone(&parked),
            });
            parked
        };

        let status = if timeout_ms < 0 {
            parked.wait()
        } else {
            parked.wait_for(timeout_ms)
        };
        if status == STATUS_TIMEOUT {
            let mut s = slot.lock();
            waitq::remove_waiter(&mut s.queue, &parked);
            return -ETIMEDOUT;
        }
        // 0 = ownership handed off by the unlocker; negative = evicted.
        status
    }

    /// Release ownership of slot `id`; hands off to the queue head.
    pub fn unlock(&self, id: u32, tid: i64) -> i64 {
        let slot = {
            let slots = self.slots.lock();
            match slots.get(&id) {
                Some(slot) => Arc::clone(slot),
                None => return -ERANGE,
            }
        };
        let mut s = slot.lock();
        if s.owner != tid {
            return -EACCES;
        }
        match waitq::wake_one(&mut s.queue, 0) {
            Some(next) => s.owner = next,
            None => s.owner = 0,
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_grants_ownership() {
        let table = KsemTable::new();
        assert_eq!(table.create(0x4142_4344, 1), 0);
        // Creator owns the slot, so a second locker's try fails.
        assert_eq!(table.lock(0x4142_4344, 2, 0), -ETIMEDOUT);
        assert_eq!(table.unlock(0x4142_4344, 1), 0);
        assert_eq!(table.lock(0x4142_4344, 2, 0), 0);
    }

    #[test]
    fn double_create_is_eexist() {
        let table = KsemTable::new();
        table.create(1, 1);
        assert_eq!(table.create(1, 2), -EEXIST);
    }

    #[test]
    fn relock_by_owner_is_eacces() {
        let table = KsemTable::new();
        table.create(7, 3);
        assert_eq!(table.lock(7, 3, 0), -EACCES);
    }

    #[test]
    fn destroy_requires_ownership() {
        let table = KsemTable::new();
        table.create(9, 1);
        assert_eq!(table.destroy(9, 2), -EACCES);
        assert_eq!(table.destroy(9, 1), 0);
        assert_eq!(table.destroy(9, 1), -ERANGE);
    }

    #[test]
    fn lock_missing_slot_is_erange() {
        let table = KsemTable::new();
        assert_eq!(table.lock(404, 1, -1), -ERANGE);
        assert_eq!(table.unlock(404, 1), -ERANGE);
    }

    #[test]
    fn unlock_hands_off_fifo() {
        let table = Arc::new(KsemTable::new());
        table.create(5, 1);

        let t2 = {
            let table = Arc::clone(&table);
            std::thread::spawn(move || table.lock(5, 2, -1))
        };
        // Give the contender time to park.
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(table.unlock(5, 1), 0);
        assert_eq!(t2.join().unwrap(), 0);
        // Thread 2 now owns it.
        assert_eq!(table.unlock(5, 1), -EACCES);
        assert_eq!(table.unlock(5, 2), 0);
    }
}
