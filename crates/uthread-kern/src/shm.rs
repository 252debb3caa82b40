//! Named shared-memory blocks.
//!
//! The namespace behind shared spinlocks and named semaphores. Each name is
//! bound to a fixed-size, zero-initialized, stably-addressed block. Unlink
//! removes the binding immediately; the block itself survives until the open
//! count drains, and the final close reports that it freed an unlinked block
//! so the caller can tear down whatever the block anchored.

use std::collections::HashMap;

use log::{debug, warn};
use parking_lot::Mutex;

/// Size of every block, in bytes. Large enough for the biggest user layout
/// (the named-semaphore record).
pub const BLOCK_SIZE: usize = 64;

const ENOENT: i64 = 2;
const EEXIST: i64 = 17;
const EINVAL: i64 = 22;

#[repr(align(8))]
struct Block([u8; BLOCK_SIZE]);

struct Entry {
    block: Box<Block>,
    open_count: usize,
    unlinked: bool,
}

impl Entry {
    fn addr(&self) -> i64 {
        self.block.as_ref() as *const Block as usize as i64
    }
}

/// The process-visible shared-memory namespace.
#[derive(Default)]
pub struct ShmNamespace {
    entries: Mutex<HashMap<String, Entry>>,
}

impl ShmNamespace {
    pub fn new() -> ShmNamespace {
        ShmNamespace::default()
    }

    /// Bind `path` to a fresh zeroed block; the creator holds the first
    /// handle. `-EEXIST` if the name is bound (even if unlinked-but-open).
    pub fn create(&self, path: &str) -> i64 {
        let mut entries = self.entries.lock();
        if entries.contains_key(path) {
            return -EEXIST;
        }
        let entry = Entry {
            block: Box::new(Block([0; BLOCK_SIZE])),
            open_count: 1,
            unlinked: false,
        };
        let addr = entry.addr();
        entries.insert(path.to_owned(), entry);
        debug!("shm: created {path} at {addr:#x}");
        addr
    }

    /// Open an existing block, bumping the open count. Unlinked names read
    /// as absent.
    pub fn open(&self, path: &str) -> i64 {
        let mut entries = self.entries.lock();
        match entries.get_mut(path) {
            Some(entry) if !entry.unlinked => {
                entry.open_count += 1;
                entry.addr()
            }
            _ => -ENOENT,
        }
    }

    /// Drop one handle. Returns 1 if this freed an unlinked block, else 0.
    pub fn close(&self, path: &str) -> i64 {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(path) else {
            return -EINVAL;
        };
        if entry.open_count == 0 {
            warn!("shm: close of {path} with no open handles");
            return -EINVAL;
        }
        entry.open_count -= 1;
        if entry.open_count == 0 && entry.unlinked {
            entries.remove(path);
            debug!("shm: freed {path} on last close");
            return 1;
        }
        0
    }

    /// Remove the name binding. Frees the block now if no handles remain
    /// (returns 1); otherwise the last close frees it (returns 0).
    pub fn unlink(&self, path: &str) -> i64 {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(path) else {
            return -ENOENT;
        };
        if entry.unlinked {
            return -ENOENT;
        }
        if entry.open_count == 0 {
            entries.remove(path);
            debug!("shm: unlinked and freed {path}");
            return 1;
        }
        entry.unlinked = true;
        debug!("shm: unlinked {path}, free deferred to last close");
        0
    }

    /// True while `path` is bound and openable.
    pub fn exists(&self, path: &str) -> bool {
        self.entries
            .lock()
            .get(path)
            .is_some_and(|entry| !entry.unlinked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_open_close_lifecycle() {
        let ns = ShmNamespace::new();
        let addr = ns.create("U:\\SHM\\0001.SLK");
        assert!(addr > 0);
        let reopened = ns.open("U:\\SHM\\0001.SLK");
        assert_eq!(reopened, addr);
        assert_eq!(ns.close("U:\\SHM\\0001.SLK"), 0);
        assert_eq!(ns.close("U:\\SHM\\0001.SLK"), 0);
    }

    #[test]
    fn double_create_is_eexist() {
        let ns = ShmNamespace::new();
        assert!(ns.create("/U/SHM/a") > 0);
        assert_eq!(ns.create("/U/SHM/a"), -EEXIST);
    }

    #[test]
    fn open_missing_is_enoent() {
        let ns = ShmNamespace::new();
        assert_eq!(ns.open("/U/SHM/nope"), -ENOENT);
    }

    #[test]
    fn unlink_defers_free_until_last_close() {
        let ns = ShmNamespace::new();
        ns.create("/U/SHM/s");
        ns.open("/U/SHM/s");
        // Two handles out; unlink hides the name but defers the free.
        assert_eq!(ns.unlink("/U/SHM/s"), 0);
        assert_eq!(ns.open("/U/SHM/s"), -ENOENT);
        assert_eq!(ns.close("/U/SHM/s"), 0);
        assert_eq!(ns.close("/U/SHM/s"), 1);
        assert!(!ns.exists("/U/SHM/s"));
    }

    #[test]
    fn unlink_with_no_handles_frees_immediately() {
        let ns = ShmNamespace::new();
        ns.create("/U/SHM/t");
        assert_eq!(ns.close("/U/SHM/t"), 0);
        assert_eq!(ns.unlink("/U/SHM/t"), 1);
        assert_eq!(ns.unlink("/U/SHM/t"), -ENOENT);
    }

    #[test]
    fn blocks_are_zeroed_and_aligned() {
        let ns = ShmNamespace::new();
        let addr = ns.create("/U/SHM/z");
        assert_eq!(addr % 8, 0);
    }
}
