//! Task-aware Mutex implementation

use crate::scheduler::syscall::LockMode;
use crate::sync::raw::RawLock;
use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Task-aware mutual exclusion lock
///
/// Unlike an OS-level mutex, a contended `lock` blocks the calling *task*
/// while the worker thread moves on to other tasks. Called from a thread
/// that is not running a task, it spins instead.
///
/// Releasing the lock wakes every task waiting for it; the first one to
/// run takes it and the others wait again.
pub struct Mutex<T: ?Sized> {
    raw: RawLock,
    data: UnsafeCell<T>,
}

// SAFETY: the lock word serializes all access to `data`
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Create a new, unlocked mutex
    pub const fn new(value: T) -> Self {
        Self {
            raw: RawLock::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Consume the mutex, returning the protected value
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquire the lock, suspending the current task while it is held
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.raw.acquire(LockMode::Exclusive);
        MutexGuard::new(self)
    }

    /// Attempt to acquire the lock without suspending
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        if self.raw.try_acquire(LockMode::Exclusive) {
            Some(MutexGuard::new(self))
        } else {
            None
        }
    }

    /// Acquire the lock through an `Arc`, returning a guard that owns a reference
    pub fn lock_owned(self: &Arc<Self>) -> OwnedMutexGuard<T> {
        self.raw.acquire(LockMode::Exclusive);
        OwnedMutexGuard {
            mutex: self.clone(),
        }
    }

    /// Owned version of [`try_lock`](Self::try_lock)
    pub fn try_lock_owned(self: &Arc<Self>) -> Option<OwnedMutexGuard<T>> {
        if self.raw.try_acquire(LockMode::Exclusive) {
            Some(OwnedMutexGuard {
                mutex: self.clone(),
            })
        } else {
            None
        }
    }

    /// Check if the mutex is locked
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// Mutable access without locking; the borrow proves exclusivity
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    pub(crate) fn raw(&self) -> &RawLock {
        &self.raw
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Mutex::new(T::default())
    }
}

impl<T> From<T> for Mutex<T> {
    fn from(value: T) -> Self {
        Mutex::new(value)
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Mutex");
        match self.try_lock() {
            Some(guard) => d.field("data", &&*guard),
            None => d.field("data", &format_args!("<locked>")),
        };
        d.finish()
    }
}

/// RAII guard for Mutex (auto-unlocks on drop)
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
    _marker: PhantomData<&'a mut T>,
}

impl<'a, T: ?Sized> MutexGuard<'a, T> {
    fn new(mutex: &'a Mutex<T>) -> Self {
        Self {
            mutex,
            _marker: PhantomData,
        }
    }

    /// Unlock the mutex early (before the guard goes out of scope)
    pub fn unlock(guard: Self) {
        drop(guard);
    }

    /// The mutex this guard locks
    pub fn mutex(guard: &Self) -> &'a Mutex<T> {
        guard.mutex
    }

    pub(crate) fn raw(guard: &Self) -> &'a RawLock {
        &guard.mutex.raw
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard holds the lock exclusively
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard holds the lock exclusively
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.raw.unlock(LockMode::Exclusive);
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

/// RAII guard for `Arc<Mutex>` (owned version)
///
/// Keeps the mutex alive, so the guard may outlive the scope that locked it.
pub struct OwnedMutexGuard<T: ?Sized> {
    mutex: Arc<Mutex<T>>,
}

impl<T: ?Sized> OwnedMutexGuard<T> {
    /// Unlock the mutex early
    pub fn unlock(guard: Self) {
        drop(guard);
    }

    /// Get a reference to the mutex
    pub fn mutex(guard: &Self) -> &Arc<Mutex<T>> {
        &guard.mutex
    }
}

impl<T: ?Sized> Deref for OwnedMutexGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard holds the lock exclusively
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for OwnedMutexGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard holds the lock exclusively
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for OwnedMutexGuard<T> {
    fn drop(&mut self) {
        self.mutex.raw.unlock(LockMode::Exclusive);
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for OwnedMutexGuard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
