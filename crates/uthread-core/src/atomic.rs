//! Kernel-mediated atomic primitives.
//!
//! The host is a uniprocessor whose atomicity guarantee is "the kernel runs
//! the read-modify-write with preemption held off", so every RMW goes through
//! the ATOMIC trap category instead of a CPU instruction. Plain loads of the
//! same words stay in user space. All operations are sequentially consistent
//! with respect to other atomic ops on the same address and act as full
//! barriers for the calling thread.
//!
//! The lock words themselves are `AtomicI32` so taking their address never
//! needs `unsafe` on the user side; only the kernel dereferences.

use std::sync::atomic::AtomicI32;

use crate::syscall::{
    ATOMIC_ADD, ATOMIC_AND, ATOMIC_CAS, ATOMIC_DECREMENT, ATOMIC_EXCHANGE, ATOMIC_INCREMENT,
    ATOMIC_OR, ATOMIC_SUB, ATOMIC_XOR, sys_atomic,
};

#[inline]
fn addr(word: &AtomicI32) -> i64 {
    word.as_ptr() as usize as i64
}

/// Compare-and-swap: atomically replace `expected` with `new`.
/// Returns true iff the word held `expected` and was changed.
#[inline]
pub fn cas(word: &AtomicI32, expected: i32, new: i32) -> bool {
    sys_atomic(ATOMIC_CAS, addr(word), i64::from(expected), i64::from(new)) == 1
}

/// Atomically store `new`; returns the previous value.
#[inline]
pub fn exchange(word: &AtomicI32, new: i32) -> i32 {
    sys_atomic(ATOMIC_EXCHANGE, addr(word), i64::from(new), 0) as i32
}

/// Atomically add one; returns the new value.
#[inline]
pub fn increment(word: &AtomicI32) -> i32 {
    sys_atomic(ATOMIC_INCREMENT, addr(word), 0, 0) as i32
}

/// Atomically subtract one; returns the new value.
#[inline]
pub fn decrement(word: &AtomicI32) -> i32 {
    sys_atomic(ATOMIC_DECREMENT, addr(word), 0, 0) as i32
}

/// Atomically add `delta`; returns the new value.
#[inline]
pub fn add(word: &AtomicI32, delta: i32) -> i32 {
    sys_atomic(ATOMIC_ADD, addr(word), i64::from(delta), 0) as i32
}

/// Atomically subtract `delta`; returns the new value.
#[inline]
pub fn sub(word: &AtomicI32, delta: i32) -> i32 {
    sys_atomic(ATOMIC_SUB, addr(word), i64::from(delta), 0) as i32
}

/// Atomically OR in `bits`; returns the new value.
#[inline]
pub fn or(word: &AtomicI32, bits: i32) -> i32 {
    sys_atomic(ATOMIC_OR, addr(word), i64::from(bits), 0) as i32
}

/// Atomically AND with `bits`; returns the new value.
#[inline]
pub fn and(word: &AtomicI32, bits: i32) -> i32 {
    sys_atomic(ATOMIC_AND, addr(word), i64::from(bits), 0) as i32
}

/// Atomically XOR with `bits`; returns the new value.
#[inline]
pub fn xor(word: &AtomicI32, bits: i32) -> i32 {
    sys_atomic(ATOMIC_XOR, addr(word), i64::from(bits), 0) as i32
}
