//! Named semaphores.
//!
//! Only available in single-threaded mode (`ENOSYS` otherwise). A named
//! semaphore's record is the shared block of a `/U/SHM/<name>` file, so
//! every opener of the same name sees the same count; a kernel semaphore
//! slot derived from the name serializes access across processes.
//!
//! Unlinking removes the name immediately — later opens fail `ENOENT` —
//! but the block and the kernel slot live on until the open count drains;
//! the last closer tears both down.

use crate::atomic;
use crate::errno;
use crate::pthread::thread;
use crate::sem::{SEM_NAME_MAX, SEM_VALUE_MAX, Sem};
use crate::syscall::{KsemMode, kernel};

/// Create the semaphore if the name is unbound.
pub const O_CREAT: i32 = 0x0100;
/// With [`O_CREAT`]: fail `EEXIST` if the name is already bound.
pub const O_EXCL: i32 = 0x0200;

/// Directory holding named-semaphore backing files.
const SHM_DIR: &str = "/U/SHM";

// -------------------------------------------------------------------------
// Id derivation
// -------------------------------------------------------------------------

/// Pack four ASCII characters into the kernel slot id word.
#[must_use]
pub fn pack_id(chars: [u8; 4]) -> u32 {
    u32::from_be_bytes(chars)
}

/// Unpack a slot id word back into its four characters.
#[must_use]
pub fn unpack_id(id: u32) -> [u8; 4] {
    id.to_be_bytes()
}

/// Derive the 4-char kernel slot id from a semaphore name.
///
/// The optional leading `/` is dropped. Names of up to four characters are
/// padded with `'X'`; longer names keep their first character and hash the
/// rest (`hash = hash * 31 + c`) into three `'A'..='Z'` characters. Embedded
/// NULs become `'X'`. Deterministic, so every process derives the same slot
/// from the same name.
#[must_use]
pub fn sem_id_from_name(name: &str) -> u32 {
    let source = name.strip_prefix('/').unwrap_or(name).as_bytes();
    let mut chars = [b'X'; 4];

    if source.len() <= 4 {
        chars[..source.len()].copy_from_slice(source);
    } else {
        chars[0] = source[0];
        let mut hash: u32 = 0;
        for &c in &source[1..] {
            hash = hash.wrapping_mul(31).wrapping_add(u32::from(c));
        }
        chars[1] = b'A' + (hash % 26) as u8;
        chars[2] = b'A' + ((hash / 26) % 26) as u8;
        chars[3] = b'A' + ((hash / (26 * 26)) % 26) as u8;
    }

    for c in &mut chars {
        if *c == 0 {
            *c = b'X';
        }
    }
    pack_id(chars)
}

// -------------------------------------------------------------------------
// Name handling
// -------------------------------------------------------------------------

fn validate_name(name: &str) -> Result<&str, i32> {
    if !name.starts_with('/') || name == "/" {
        return Err(errno::EINVAL);
    }
    let stripped = &name[1..];
    if stripped.starts_with('_') {
        return Err(errno::ENOENT);
    }
    if stripped.len() > SEM_NAME_MAX {
        return Err(errno::ENAMETOOLONG);
    }
    Ok(stripped)
}

fn backing_path(stripped: &str) -> String {
    format!("{SHM_DIR}/{stripped}")
}

fn pack_name(stripped: &str) -> (u32, i32) {
    let bytes = stripped.as_bytes();
    let mut raw = [0u8; 4];
    raw[..bytes.len()].copy_from_slice(bytes);
    (u32::from_be_bytes(raw), bytes.len() as i32)
}

fn unpack_name(raw: u32, len: i32) -> String {
    let bytes = raw.to_be_bytes();
    String::from_utf8_lossy(&bytes[..len.clamp(0, 4) as usize]).into_owned()
}

fn view_sem(addr: i64) -> &'static Sem {
    // SAFETY: the address is a kernel shared-memory block: stable, aligned,
    // zero-initialized, at least as large as `Sem`, and alive until its open
    // count drains.
    unsafe { &*(addr as usize as *const Sem) }
}

fn fail<T>(e: i32) -> Result<T, i32> {
    errno::set_errno(e);
    Err(e)
}

// -------------------------------------------------------------------------
// Operations
// -------------------------------------------------------------------------

/// Open (and with [`O_CREAT`], create) the named semaphore `name` with
/// `value` initial tokens.
pub fn open(name: &str, oflag: i32, value: u32) -> Result<&'static Sem, i32> {
    if thread::is_multithreaded() {
        return fail(errno::ENOSYS);
    }
    let stripped = match validate_name(name) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };
    let path = backing_path(stripped);

    if oflag & O_CREAT != 0 {
        if value > SEM_VALUE_MAX as u32 {
            return fail(errno::EINVAL);
        }
        let created = kernel().shm_create(&path);
        if created >= 0 {
            return finish_create(&path, stripped, created, value);
        }
        if -created as i32 != errno::EEXIST {
            return fail(-created as i32);
        }
        if oflag & O_EXCL != 0 {
            return fail(errno::EEXIST);
        }
        // Name already bound and O_EXCL absent: open the existing one.
    }

    let addr = kernel().shm_open(&path);
    if addr < 0 {
        return fail(match -addr as i32 {
            errno::ENOENT => errno::ENOENT,
            other => other,
        });
    }
    let sem = view_sem(addr);
    atomic::increment(sem.io_count_word());
    Ok(sem)
}

fn finish_create(
    path: &str,
    stripped: &str,
    addr: i64,
    value: u32,
) -> Result<&'static Sem, i32> {
    let sem = view_sem(addr);
    let id = sem_id_from_name(stripped);
    let (name_raw, name_len) = pack_name(stripped);

    let ret = kernel().ksem(KsemMode::Create, id, 0);
    if ret < 0 {
        // Roll back the half-made file so the name does not leak.
        kernel().shm_unlink(path);
        kernel().shm_close(path);
        return fail(match -ret as i32 {
            errno::EEXIST => errno::EEXIST,
            _ => errno::EACCES,
        });
    }
    // Creation grants ownership; release so openers see the slot free.
    kernel().ksem(KsemMode::Unlock, id, 0);

    sem.store_count(value as i32);
    sem.set_named_identity(id, name_raw, name_len);
    atomic::increment(sem.io_count_word());
    Ok(sem)
}

/// Close one handle to a named semaphore.
///
/// When the name has been unlinked and this was the last open handle, the
/// kernel slot is destroyed and the backing block freed.
pub fn close(sem: &Sem) -> Result<(), i32> {
    if thread::is_multithreaded() {
        return fail(errno::ENOSYS);
    }
    let (id, name_raw, name_len) = sem.named_identity();
    if id == 0 || name_len == 0 {
        return fail(errno::EINVAL);
    }
    let path = backing_path(&unpack_name(name_raw, name_len));

    if sem.io_count_word().load(std::sync::atomic::Ordering::Acquire) > 0 {
        atomic::decrement(sem.io_count_word());
    }

    let ret = kernel().shm_close(&path);
    if ret < 0 {
        return fail(errno::EINVAL);
    }
    if ret == 1 {
        // Last handle out of an unlinked semaphore: tear down the slot.
        kernel().ksem(KsemMode::Destroy, id, 0);
    }
    Ok(())
}

/// Remove a named semaphore's name.
///
/// Later opens fail `ENOENT`; existing handles keep working and the final
/// [`close`] destroys the kernel slot.
pub fn unlink(name: &str) -> Result<(), i32> {
    if thread::is_multithreaded() {
        return fail(errno::ENOSYS);
    }
    let stripped = match validate_name(name) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };
    let path = backing_path(stripped);

    let ret = kernel().shm_unlink(&path);
    if ret < 0 {
        return fail(match -ret as i32 {
            errno::ENOENT => errno::ENOENT,
            errno::EACCES => errno::EACCES,
            other => other,
        });
    }
    if ret == 1 {
        // Nobody had it open; the block is gone, drop the slot with it.
        kernel().ksem(KsemMode::Destroy, sem_id_from_name(stripped), 0);
    }
    Ok(())
}
