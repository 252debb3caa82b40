//! User-space thread and synchronization runtime.
//!
//! The host kernel exposes a five-category trap dispatcher (control, sync,
//! signal, atomic, scheduling) plus a handful of dedicated traps for thread
//! creation, named shared-memory files, and named kernel semaphore slots.
//! This crate is the thin user-space layer above that interface: it owns the
//! POSIX-style contracts (error codes, validation, dual-mode semaphores,
//! cancellation discipline) while the kernel owns scheduling and every wait
//! queue.
//!
//! The kernel itself is an external collaborator reached through the
//! [`syscall::Kernel`] trait; `uthread-kern` provides an in-process reference
//! implementation for tests and benchmarks.

pub mod atomic;
pub mod errno;
pub mod pthread;
pub mod sem;
pub mod syscall;
pub mod time;

pub use pthread::thread::Tid;
