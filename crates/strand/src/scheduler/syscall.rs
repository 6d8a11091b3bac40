//! System calls: the requests a task hands to its worker when it suspends

use crate::scheduler::task::Task;
use crate::sync::raw::RawLock;
use std::fmt;
use std::ptr::NonNull;

/// Identity of a synchronization object, used as the blocked-map key
///
/// Built from the object's address, so it is stable for as long as the
/// object is borrowed by a parked task.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) struct SyncKey(usize);

impl SyncKey {
    pub(crate) fn of<T>(object: &T) -> Self {
        SyncKey(object as *const T as usize)
    }
}

/// Whether a lock is taken for exclusive or shared ownership
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum LockMode {
    Exclusive,
    Shared,
}

/// Pointer to a lock word owned by a suspended task's frame
#[derive(Copy, Clone)]
pub(crate) struct LockRef(NonNull<RawLock>);

// SAFETY: a LockRef is only dereferenced by the scheduler while the task that
// borrowed the lock is suspended inside the call that carries it.
unsafe impl Send for LockRef {}

impl LockRef {
    pub(crate) fn new(lock: &RawLock) -> Self {
        LockRef(NonNull::from(lock))
    }

    pub(crate) fn key(self) -> SyncKey {
        SyncKey(self.0.as_ptr() as usize)
    }

    /// # Safety
    /// The lock must still be borrowed by the task that issued the call.
    pub(crate) unsafe fn get<'a>(self) -> &'a RawLock {
        self.0.as_ref()
    }
}

impl fmt::Debug for LockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LockRef({:p})", self.0)
    }
}

/// Value a suspended task is resumed with
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub(crate) enum Resume {
    /// Plain resumption; any condition must be re-checked
    #[default]
    Continue,
    /// The scheduler acquired the requested lock on the task's behalf
    LockAcquired,
}

/// A request from a task to the scheduler
///
/// `Unlock` and `Notify` never suspend the caller: they run directly under
/// the scheduler lock on the calling thread. Every other call suspends the
/// calling task and is interpreted by the worker that resumed it.
pub(crate) enum SystemCall {
    /// Make a new task ready and keep running the caller
    Enqueue(Box<Task>),

    /// Release `mutex`, park the caller on `condition`, then make `task` ready
    EnqueueAndBlock {
        task: Box<Task>,
        condition: SyncKey,
        mutex: LockRef,
    },

    /// Give other ready tasks a turn
    Yield,

    /// Acquire `lock`, parking the caller while it is held
    Lock { lock: LockRef, mode: LockMode },

    /// Release `mutex` and park the caller on `condition`
    Wait { condition: SyncKey, mutex: LockRef },

    /// Release `lock` and wake every task parked on it
    Unlock { lock: LockRef, mode: LockMode },

    /// Wake up to `count` tasks parked on `condition` (`None` = all)
    Notify {
        condition: SyncKey,
        count: Option<usize>,
    },

    /// The caller finished; discard it
    Terminate,
}

impl SystemCall {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            SystemCall::Enqueue(_) => "enqueue",
            SystemCall::EnqueueAndBlock { .. } => "enqueue_and_block",
            SystemCall::Yield => "yield",
            SystemCall::Lock { .. } => "lock",
            SystemCall::Wait { .. } => "wait",
            SystemCall::Unlock { .. } => "unlock",
            SystemCall::Notify { .. } => "notify",
            SystemCall::Terminate => "terminate",
        }
    }
}

impl fmt::Debug for SystemCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
