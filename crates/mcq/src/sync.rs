//! Locking primitives.
//!
//! Two kinds of lock are used. [`IrqLock`] spins and may be taken from
//! interrupt context, so sections under it stay short and never sleep.
//! Everything else uses the sleeping `parking_lot` types re-exported here.

pub use parking_lot::{Condvar, Mutex, MutexGuard};
pub use std::sync::Arc;

pub type IrqGuard<'a, T> = spin::MutexGuard<'a, T>;

/// Spinning lock safe to take from interrupt context.
pub struct IrqLock<T> {
    inner: spin::Mutex<T>,
}

impl<T> IrqLock<T> {
    /// Creates a new lock protecting the given value.
    pub const fn new(value: T) -> Self {
        Self {
            inner: spin::Mutex::new(value),
        }
    }

    /// Acquires the lock, spinning until it becomes available.
    pub fn lock(&self) -> IrqGuard<'_, T> {
        self.inner.lock()
    }
}
