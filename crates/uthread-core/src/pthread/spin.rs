//! Spinlocks.
//!
//! Two flavors behind one type: *private* locks live in process memory;
//! *shared* locks live in a named shared-memory block so unrelated processes
//! can contend on the same word. Both acquire with a kernel CAS and release
//! with a kernel exchange, yielding between failed attempts — the library
//! never spins without yielding.
//!
//! ## Shared block protocol
//!
//! The creator allocates the block `{lock, refcount, initialized}` through
//! the shared-memory namespace, fills it in, and publishes `initialized = 1`
//! last (release store). Attachers spin on `initialized` before touching the
//! lock word, then bump `refcount` with the kernel atomic. The creator is
//! the authoritative destroyer: the block and its backing file are freed
//! when the creator's destroy drops `refcount` to zero.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use crate::atomic;
use crate::errno;
use crate::pthread::thread;
use crate::syscall::kernel;

/// Marks an initialized private lock ("PSPC").
pub const PRIVATE_SPINLOCK_MAGIC: u32 = 0x5053_5043;

/// The lock is visible only within the creating process.
pub const PROCESS_PRIVATE: i32 = 0;
/// The lock lives in shared memory and is visible across processes.
pub const PROCESS_SHARED: i32 = 1;

/// Layout of the shared-memory block backing a shared spinlock.
///
/// Host byte order; the fields are only ever touched through kernel atomics
/// (RMW) and plain atomic loads.
#[repr(C)]
pub struct SpinShmBlock {
    pub lock: AtomicI32,
    pub refcount: AtomicI32,
    pub initialized: AtomicI32,
}

#[derive(Debug)]
struct PrivateSpin {
    lock: AtomicI32,
    magic: u32,
}

struct SharedSpin {
    block: &'static SpinShmBlock,
    path: String,
    is_creator: bool,
}

enum Flavor {
    Private(PrivateSpin),
    Shared(SharedSpin),
}

/// A spinlock, private or cross-process depending on how it was initialized.
pub struct SpinLock {
    flavor: Flavor,
}

static PATH_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Unique backing path for a new shared lock, derived from the caller's id
/// and a process-local counter.
fn gen_shm_path() -> String {
    let id = thread::current() as u32;
    let counter = PATH_COUNTER.fetch_add(1, Ordering::Relaxed);
    let unique = (id << 16) | (counter & 0xFFFF);
    format!("U:\\SHM\\{unique:08X}.SLK")
}

/// View a kernel-returned block address as the shared layout.
fn view_block(addr: i64) -> &'static SpinShmBlock {
    // SAFETY: the address came from the kernel's shared-memory namespace,
    // which hands out stable, aligned blocks at least as large as the layout
    // and keeps them alive until the open count reaches zero.
    unsafe { &*(addr as usize as *const SpinShmBlock) }
}

impl SpinLock {
    /// Initialize a lock; `pshared` selects the flavor.
    pub fn init(pshared: i32) -> Result<SpinLock, i32> {
        match pshared {
            PROCESS_PRIVATE => Ok(SpinLock {
                flavor: Flavor::Private(PrivateSpin {
                    lock: AtomicI32::new(0),
                    magic: PRIVATE_SPINLOCK_MAGIC,
                }),
            }),
            PROCESS_SHARED => Self::init_shared(),
            _ => Err(errno::EINVAL),
        }
    }

    fn init_shared() -> Result<SpinLock, i32> {
        let path = gen_shm_path();
        let created = kernel().shm_create(&path);
        if created >= 0 {
            let block = view_block(created);
            block.lock.store(0, Ordering::Relaxed);
            block.refcount.store(1, Ordering::Relaxed);
            // Publish last: attachers spin on this flag before touching the
            // lock word.
            block.initialized.store(1, Ordering::Release);
            return Ok(SpinLock {
                flavor: Flavor::Shared(SharedSpin {
                    block,
                    path,
                    is_creator: true,
                }),
            });
        }
        if -created as i32 != errno::EEXIST {
            return Err(-created as i32);
        }
        Self::open_existing(path, false)
    }

    /// Attach to an existing shared lock by its backing path.
    pub fn attach(path: &str) -> Result<SpinLock, i32> {
        Self::open_existing(path.to_owned(), false)
    }

    fn open_existing(path: String, is_creator: bool) -> Result<SpinLock, i32> {
        let addr = kernel().shm_open(&path);
        if addr < 0 {
            return Err(-addr as i32);
        }
        let block = view_block(addr);
        while block.initialized.load(Ordering::Acquire) == 0 {
            thread::yield_now();
        }
        atomic::increment(&block.refcount);
        Ok(SpinLock {
            flavor: Flavor::Shared(SharedSpin {
                block,
                path,
                is_creator,
            }),
        })
    }

    fn word(&self) -> Result<&AtomicI32, i32> {
        match &self.flavor {
            Flavor::Private(p) => {
                if p.magic != PRIVATE_SPINLOCK_MAGIC {
                    return Err(errno::EINVAL);
                }
                Ok(&p.lock)
            }
            Flavor::Shared(s) => Ok(&s.block.lock),
        }
    }

    /// Acquire, yielding between failed CAS attempts.
    pub fn lock(&self) -> Result<(), i32> {
        let word = self.word()?;
        while !atomic::cas(word, 0, 1) {
            thread::yield_now();
        }
        Ok(())
    }

    /// Single CAS attempt; `EBUSY` if the lock is held.
    pub fn trylock(&self) -> Result<(), i32> {
        let word = self.word()?;
        if atomic::cas(word, 0, 1) {
            Ok(())
        } else {
            Err(errno::EBUSY)
        }
    }

    /// Release by exchanging the lock word back to zero.
    pub fn unlock(&self) -> Result<(), i32> {
        let word = self.word()?;
        atomic::exchange(word, 0);
        Ok(())
    }

    /// The backing path of a shared lock (what `attach` takes); `None` for a
    /// private lock.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match &self.flavor {
            Flavor::Private(_) => None,
            Flavor::Shared(s) => Some(&s.path),
        }
    }

    /// True if this handle created the backing block.
    #[must_use]
    pub fn is_creator(&self) -> bool {
        match &self.flavor {
            Flavor::Private(_) => false,
            Flavor::Shared(s) => s.is_creator,
        }
    }

    /// Release this handle.
    ///
    /// For a shared lock: decrement the shared refcount and close the
    /// handle. The creator deletes the backing file when the count reaches
    /// zero; non-creator holders never delete it.
    pub fn destroy(self) -> Result<(), i32> {
        match self.flavor {
            Flavor::Private(_) => Ok(()),
            Flavor::Shared(s) => {
                let remaining = atomic::decrement(&s.block.refcount);
                kernel().shm_close(&s.path);
                if s.is_creator && remaining == 0 {
                    kernel().shm_unlink(&s.path);
                }
                Ok(())
            }
        }
    }
}
