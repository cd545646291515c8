//! # Kernel synchronization primitives
//!
//! - [`RawSpin`]: a test-and-set spin lock.
//! - [`Mutex`]: data protected by a raw lock, with RAII guards.
//! - [`IrqGuard`] / [`Mutex::lock_irq`]: mask local interrupts for the duration
//!   of a critical section so interrupt handlers cannot re-enter it.
//! - [`SyncOnceCell`]: one-time initialization of process-wide singletons.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod mutex;
mod raw_spin;
mod sync_once_cell;

pub use irq::{IrqGuard, IrqMutex, interrupts_enabled};
pub use mutex::{Mutex, MutexGuard};
pub use raw_spin::RawSpin;
pub use sync_once_cell::SyncOnceCell;

pub type SpinMutex<T> = Mutex<T, RawSpin>;

impl<T> SpinMutex<T> {
    pub const fn new(value: T) -> Self {
        Self::from_raw(RawSpin::new(), value)
    }
}

pub trait RawLock {
    fn raw_lock(&self);
    fn raw_try_lock(&self) -> bool;
}

pub trait RawUnlock {
    /// # Safety
    /// The lock must currently be held by the caller.
    unsafe fn raw_unlock(&self);
}
