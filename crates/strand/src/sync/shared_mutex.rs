//! Task-aware reader-writer lock

use crate::scheduler::syscall::LockMode;
use crate::sync::raw::RawLock;
use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

/// Lock with many shared owners or one exclusive owner
///
/// Blocks at the task level like [`Mutex`](crate::Mutex). There is no
/// writer preference: a steady stream of readers can keep a writer waiting.
pub struct SharedMutex<T: ?Sized> {
    raw: RawLock,
    data: UnsafeCell<T>,
}

// SAFETY: readers only get `&T`, so sharing needs `T: Sync` as well
unsafe impl<T: ?Sized + Send> Send for SharedMutex<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for SharedMutex<T> {}

impl<T> SharedMutex<T> {
    /// Create a new, unlocked shared mutex
    pub const fn new(value: T) -> Self {
        Self {
            raw: RawLock::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Consume the lock, returning the protected value
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SharedMutex<T> {
    /// Acquire exclusive ownership, suspending the task while others hold the lock
    pub fn lock(&self) -> SharedMutexWriteGuard<'_, T> {
        self.raw.acquire(LockMode::Exclusive);
        SharedMutexWriteGuard {
            lock: self,
            _marker: PhantomData,
        }
    }

    /// Attempt to acquire exclusive ownership without suspending
    pub fn try_lock(&self) -> Option<SharedMutexWriteGuard<'_, T>> {
        self.raw
            .try_acquire(LockMode::Exclusive)
            .then(|| SharedMutexWriteGuard {
                lock: self,
                _marker: PhantomData,
            })
    }

    /// Acquire shared ownership, suspending the task while a writer holds the lock
    pub fn lock_shared(&self) -> SharedMutexReadGuard<'_, T> {
        self.raw.acquire(LockMode::Shared);
        SharedMutexReadGuard { lock: self }
    }

    /// Attempt to acquire shared ownership without suspending
    pub fn try_lock_shared(&self) -> Option<SharedMutexReadGuard<'_, T>> {
        self.raw
            .try_acquire(LockMode::Shared)
            .then(|| SharedMutexReadGuard { lock: self })
    }

    /// Check if any owner holds the lock
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// Check if a writer holds the lock
    pub fn is_locked_exclusive(&self) -> bool {
        self.raw.is_exclusive()
    }

    /// Number of shared owners
    pub fn reader_count(&self) -> usize {
        self.raw.readers()
    }

    /// Mutable access without locking; the borrow proves exclusivity
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for SharedMutex<T> {
    fn default() -> Self {
        SharedMutex::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SharedMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("SharedMutex");
        match self.try_lock_shared() {
            Some(guard) => d.field("data", &&*guard),
            None => d.field("data", &format_args!("<locked>")),
        };
        d.finish()
    }
}

/// RAII guard for shared ownership
pub struct SharedMutexReadGuard<'a, T: ?Sized> {
    lock: &'a SharedMutex<T>,
}

impl<T: ?Sized> SharedMutexReadGuard<'_, T> {
    /// Release shared ownership early
    pub fn unlock(guard: Self) {
        drop(guard);
    }
}

impl<T: ?Sized> Deref for SharedMutexReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: no writer can hold the lock while this guard lives
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SharedMutexReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.raw.unlock(LockMode::Shared);
    }
}

/// RAII guard for exclusive ownership
pub struct SharedMutexWriteGuard<'a, T: ?Sized> {
    lock: &'a SharedMutex<T>,
    _marker: PhantomData<&'a mut T>,
}

impl<T: ?Sized> SharedMutexWriteGuard<'_, T> {
    /// Release exclusive ownership early
    pub fn unlock(guard: Self) {
        drop(guard);
    }
}

impl<T: ?Sized> Deref for SharedMutexWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard holds the lock exclusively
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SharedMutexWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard holds the lock exclusively
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SharedMutexWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.raw.unlock(LockMode::Exclusive);
    }
}
