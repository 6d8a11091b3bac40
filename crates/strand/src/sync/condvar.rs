//! Task-aware condition variable

use crate::error::{SchedulerError, SchedulerResult};
use crate::scheduler::syscall::{LockMode, LockRef, SyncKey, SystemCall};
use crate::scheduler::{self, CurrentTask, Shared, Task};
use crate::sync::mutex::{MutexGuard, OwnedMutexGuard};
use crate::sync::raw::Home;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Condition variable for tasks, paired with a [`Mutex`](crate::Mutex)
///
/// Waiting parks the task in the scheduler's blocked map under this
/// condition's address; the condition itself keeps no waiter list.
/// Wake-ups may be spurious, so always re-check the predicate, or use
/// [`wait_while`](Self::wait_while).
pub struct Condvar {
    home: Home,
}

impl Condvar {
    /// Create a new condition variable
    pub const fn new() -> Self {
        Self {
            home: Home::new(),
        }
    }

    /// Release the guard's mutex, park until notified, then lock it again
    ///
    /// Releasing and parking happen atomically with respect to notifiers
    /// holding the same mutex. Off a worker thread this degrades to
    /// unlock, yield the thread, relock.
    pub fn wait<T: ?Sized>(&self, guard: &mut MutexGuard<'_, T>) {
        let raw = MutexGuard::raw(guard);
        match scheduler::current_task() {
            Some(current) => {
                self.bind(&current.shared);
                raw.bind(&current.shared);
                current.suspend(SystemCall::Wait {
                    condition: self.key(),
                    mutex: LockRef::new(raw),
                });
                raw.acquire(LockMode::Exclusive);
            }
            None => {
                raw.unlock(LockMode::Exclusive);
                thread::yield_now();
                raw.acquire(LockMode::Exclusive);
            }
        }
    }

    /// Wait while `condition` returns true
    pub fn wait_while<T, F>(&self, guard: &mut MutexGuard<'_, T>, mut condition: F)
    where
        T: ?Sized,
        F: FnMut(&mut T) -> bool,
    {
        while condition(&mut **guard) {
            self.wait(guard);
        }
    }

    /// Wake one waiting task
    pub fn notify_one(&self) {
        self.notify(Some(1));
    }

    /// Wake every waiting task
    pub fn notify_all(&self) {
        self.notify(None);
    }

    /// Hand `guard` over to the current task's exit
    ///
    /// When the current task finishes, `ready` is set while the mutex is
    /// still held, then the mutex is released and every waiter is notified.
    /// Locking the same mutex again from this task before it exits deadlocks.
    pub fn notify_on_task_exit<T>(&self, guard: OwnedMutexGuard<T>, ready: Arc<AtomicBool>) -> SchedulerResult<()>
    where
        T: ?Sized + Send + 'static,
    {
        let current = scheduler::current_task().ok_or(SchedulerError::NotInTask)?;
        self.bind(&current.shared);
        let condition = self.key();
        let home = Arc::downgrade(&current.shared);

        current.header.on_exit(Box::new(move || {
            ready.store(true, Ordering::Release);
            drop(guard);
            if let Some(shared) = home.upgrade() {
                shared.call_now(SystemCall::Notify {
                    condition,
                    count: None,
                });
            }
        }));
        Ok(())
    }

    /// Release the guard's mutex, park on this condition and enqueue `task`,
    /// all in one step; relocks the mutex once woken
    pub(crate) fn wait_spawning<T: ?Sized>(&self, current: &CurrentTask, guard: &mut MutexGuard<'_, T>, task: Box<Task>) {
        let raw = MutexGuard::raw(guard);
        self.bind(&current.shared);
        raw.bind(&current.shared);
        current.suspend(SystemCall::EnqueueAndBlock {
            task,
            condition: self.key(),
            mutex: LockRef::new(raw),
        });
        raw.acquire(LockMode::Exclusive);
    }

    fn notify(&self, count: Option<usize>) {
        if let Some(shared) = self.home.get() {
            shared.call_now(SystemCall::Notify {
                condition: self.key(),
                count,
            });
        }
    }

    fn bind(&self, shared: &Arc<Shared>) {
        self.home.bind(shared);
    }

    fn key(&self) -> SyncKey {
        SyncKey::of(self)
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Condvar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Condvar { .. }")
    }
}
