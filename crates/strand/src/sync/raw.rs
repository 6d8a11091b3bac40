//! Lock word shared by [`Mutex`](super::Mutex) and [`SharedMutex`](super::SharedMutex)
//!
//! The word holds an exclusive bit plus a reader count. Waiters do not live
//! here: a task that cannot take the lock is parked in the scheduler's
//! blocked map under the lock's address, and every release that frees the
//! lock wakes all of them to race for it again.

use crate::scheduler::syscall::{LockMode, LockRef, Resume, SyncKey, SystemCall};
use crate::scheduler::{self, Shared};
use crossbeam::utils::Backoff;
use parking_lot::Mutex;
use std::sync::atomic::{fence, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

const EXCLUSIVE: usize = 1 << (usize::BITS - 1);
const READERS: usize = !EXCLUSIVE;

/// Scheduler whose blocked map holds a primitive's waiters
///
/// Bound by the first task that parks on the primitive. A binding to a
/// scheduler that is gone or has stopped is replaced by the next one, so a
/// primitive outlives the scheduler it was first used with.
pub(crate) struct Home(Mutex<Option<Weak<Shared>>>);

impl Home {
    pub(crate) const fn new() -> Self {
        Home(Mutex::new(None))
    }

    pub(crate) fn bind(&self, shared: &Arc<Shared>) {
        let mut home = self.0.lock();
        let bound = home.as_ref().and_then(Weak::upgrade);
        let stale = match &bound {
            Some(bound) => !Arc::ptr_eq(bound, shared) && bound.is_stopped(),
            None => true,
        };
        if stale {
            *home = Some(Arc::downgrade(shared));
        }
        drop(home);
        drop(bound);
    }

    pub(crate) fn get(&self) -> Option<Arc<Shared>> {
        self.0.lock().as_ref().and_then(Weak::upgrade)
    }
}

pub(crate) struct RawLock {
    state: AtomicUsize,

    /// Releases made from threads outside the scheduler find the waiters
    /// through it
    home: Home,
}

impl RawLock {
    pub(crate) const fn new() -> Self {
        Self {
            state: AtomicUsize::new(0),
            home: Home::new(),
        }
    }

    pub(crate) fn key(&self) -> SyncKey {
        SyncKey::of(self)
    }

    /// Take the lock without waiting
    pub(crate) fn try_acquire(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Exclusive => self
                .state
                .compare_exchange(0, EXCLUSIVE, Ordering::Acquire, Ordering::Relaxed)
                .is_ok(),
            LockMode::Shared => {
                let mut state = self.state.load(Ordering::Relaxed);
                loop {
                    if state & EXCLUSIVE != 0 || state & READERS == READERS {
                        return false;
                    }
                    match self.state.compare_exchange_weak(
                        state,
                        state + 1,
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => return true,
                        Err(current) => state = current,
                    }
                }
            }
        }
    }

    /// Drop one hold on the lock; returns true when the lock became free
    pub(crate) fn release(&self, mode: LockMode) -> bool {
        match mode {
            // A task unwound inside `Condvar::wait` drops its guard without
            // holding the lock, so releasing a free lock is a no-op. If another
            // parked task took the lock meanwhile, its bit is cleared too; that
            // only happens while shutdown drops every remaining task.
            LockMode::Exclusive => {
                let previous = self.state.fetch_and(!EXCLUSIVE, Ordering::Release);
                previous & EXCLUSIVE != 0
            }
            LockMode::Shared => {
                let previous = self.state.fetch_sub(1, Ordering::Release);
                debug_assert!(
                    previous & EXCLUSIVE == 0 && previous & READERS > 0,
                    "shared release of a lock not held shared"
                );
                previous == 1
            }
        }
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) != 0
    }

    pub(crate) fn is_exclusive(&self) -> bool {
        self.state.load(Ordering::Relaxed) & EXCLUSIVE != 0
    }

    pub(crate) fn readers(&self) -> usize {
        self.state.load(Ordering::Relaxed) & READERS
    }

    /// Take the lock, parking the current task while it is held elsewhere
    ///
    /// Off a worker thread this spins instead.
    pub(crate) fn acquire(&self, mode: LockMode) {
        if self.try_acquire(mode) {
            return;
        }

        match scheduler::current_task() {
            Some(current) => loop {
                self.bind(&current.shared);
                let call = SystemCall::Lock {
                    lock: LockRef::new(self),
                    mode,
                };
                if current.suspend(call) == Resume::LockAcquired {
                    return;
                }
                // Woken by a release: race the other waiters
                if self.try_acquire(mode) {
                    return;
                }
            },
            None => {
                let backoff = Backoff::new();
                while !self.try_acquire(mode) {
                    backoff.snooze();
                }
            }
        }
    }

    /// Release the lock and wake everything parked on it
    pub(crate) fn unlock(&self, mode: LockMode) {
        let home = self.home();
        let freed = match &home {
            Some(shared) => {
                shared.call_now(SystemCall::Unlock {
                    lock: LockRef::new(self),
                    mode,
                });
                true
            }
            None => self.release(mode),
        };
        if !freed {
            return;
        }

        // Pairs with the fence in `bind`: either a parking task sees the
        // lock free, or this thread sees the scheduler it parked in.
        fence(Ordering::SeqCst);
        if let Some(now) = self.home() {
            let rebound = home.as_ref().map_or(true, |before| !Arc::ptr_eq(before, &now));
            if rebound {
                now.call_now(SystemCall::Notify {
                    condition: self.key(),
                    count: None,
                });
            }
        }
    }

    /// Record the scheduler a task is about to park this lock's waiter in
    pub(crate) fn bind(&self, shared: &Arc<Shared>) {
        self.home.bind(shared);
        fence(Ordering::SeqCst);
    }

    fn home(&self) -> Option<Arc<Shared>> {
        self.home.get()
    }
}

impl Default for RawLock {
    fn default() -> Self {
        Self::new()
    }
}
