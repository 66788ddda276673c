//! The heap's lock. One `RecursiveLock` guards all mutable slab state of a
//! heap instance; there is no process-wide lock.
//!
//! The owning thread may take the lock again while already holding it. That
//! is what lets a caller hold the lock across several heap operations (via
//! `acquire`/`release`) while each operation still locks internally.

use core::cell::RefCell;
use core::mem;
use parking_lot::ReentrantMutex;

pub struct RecursiveLock<T> {
    inner: ReentrantMutex<RefCell<T>>,
}

impl<T> RecursiveLock<T> {
    pub fn new(data: T) -> Self {
        RecursiveLock {
            inner: ReentrantMutex::new(RefCell::new(data)),
        }
    }

    /// Run `f` with exclusive access to the protected data.
    ///
    /// `f` must not call back into `with`/`read` on the same lock: the lock
    /// itself would be re-entered fine, but the data is already borrowed and
    /// that is an engine bug, so it panics.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let guard = self.inner.lock();
        let mut data = guard.borrow_mut();
        f(&mut data)
    }

    /// Run `f` with shared access to the protected data.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.inner.lock();
        let data = guard.borrow();
        f(&data)
    }

    /// Take the lock without scoping it to a closure. Must be paired with a
    /// `release` on the same thread.
    pub fn acquire(&self) {
        mem::forget(self.inner.lock());
    }

    /// Try to take the lock without blocking. Returns true if it was acquired,
    /// in which case it must be paired with a `release`.
    pub fn try_acquire(&self) -> bool {
        match self.inner.try_lock() {
            Some(guard) => {
                mem::forget(guard);
                true
            }
            None => false,
        }
    }

    /// Drop one level of ownership taken by `acquire` or `try_acquire`.
    ///
    /// # Safety
    /// The current thread must hold the lock through a prior `acquire` or
    /// successful `try_acquire` that has not been released yet.
    pub unsafe fn release(&self) {
        self.inner.force_unlock();
    }

    #[cfg(test)]
    fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}
