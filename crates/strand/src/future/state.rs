//! Associated state: the single-assignment slot shared by a promise and its future

use crate::error::{SchedulerError, TaskError, TaskResult};
use crate::scheduler::{self, CurrentTask, Task};
use crate::sync::{Condvar, Mutex, MutexGuard};
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Callback run once the state becomes ready
pub(crate) type Continuation = Box<dyn FnOnce() + Send>;

enum Slot<T> {
    Unset,
    Value(T),
    Failed(TaskError),
    /// The value was moved out by `Future::into_value`
    Taken,
}

impl<T> From<TaskResult<T>> for Slot<T> {
    fn from(outcome: TaskResult<T>) -> Self {
        match outcome {
            Ok(value) => Slot::Value(value),
            Err(error) => Slot::Failed(error),
        }
    }
}

struct Inner<T> {
    slot: Slot<T>,
    continuations: Vec<Continuation>,
}

/// State shared between one [`Promise`](super::Promise) and its [`Future`](super::Future)
///
/// `satisfied` flips when a result is stored, `ready` when readers may see it.
/// The two differ only for results stored "at task exit".
pub(crate) struct State<T> {
    inner: Arc<Mutex<Inner<T>>>,
    changed: Condvar,
    satisfied: AtomicBool,
    ready: Arc<AtomicBool>,
}

impl<T> State<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                slot: Slot::Unset,
                continuations: Vec::new(),
            })),
            changed: Condvar::new(),
            satisfied: AtomicBool::new(false),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A state that is ready from the start
    pub(crate) fn with_outcome(outcome: TaskResult<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                slot: Slot::from(outcome),
                continuations: Vec::new(),
            })),
            changed: Condvar::new(),
            satisfied: AtomicBool::new(true),
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub(crate) fn is_satisfied(&self) -> bool {
        self.satisfied.load(Ordering::Acquire)
    }

    /// Store the result, wake every waiter and run continuations
    pub(crate) fn satisfy(&self, outcome: TaskResult<T>) -> TaskResult<()> {
        if self.is_satisfied() {
            return Err(TaskError::PromiseAlreadySatisfied);
        }

        let mut inner = self.inner.lock();
        if !matches!(inner.slot, Slot::Unset) {
            return Err(TaskError::PromiseAlreadySatisfied);
        }
        inner.slot = Slot::from(outcome);
        self.satisfied.store(true, Ordering::Release);
        self.ready.store(true, Ordering::Release);
        let continuations = mem::take(&mut inner.continuations);
        MutexGuard::unlock(inner);

        self.changed.notify_all();
        run_all(continuations);
        Ok(())
    }

    /// Suspend until the state is ready
    pub(crate) fn wait(&self) {
        if self.is_ready() {
            return;
        }
        let mut inner = self.inner.lock();
        self.changed
            .wait_while(&mut inner, |_| !self.ready.load(Ordering::Acquire));
    }

    /// Copy of the stored result; may be called repeatedly
    pub(crate) fn get(&self) -> TaskResult<T>
    where
        T: Clone,
    {
        self.wait();
        let inner = self.inner.lock();
        match &inner.slot {
            Slot::Value(value) => Ok(value.clone()),
            Slot::Failed(error) => Err(error.clone()),
            Slot::Taken => Err(TaskError::FutureAlreadyRetrieved),
            Slot::Unset => unreachable!("ready state without a result"),
        }
    }

    /// Move the stored value out; errors stay in place
    pub(crate) fn take(&self) -> TaskResult<T> {
        self.wait();
        let mut inner = self.inner.lock();
        match mem::replace(&mut inner.slot, Slot::Taken) {
            Slot::Value(value) => Ok(value),
            Slot::Failed(error) => {
                inner.slot = Slot::Failed(error.clone());
                Err(error)
            }
            Slot::Taken => Err(TaskError::FutureAlreadyRetrieved),
            Slot::Unset => unreachable!("ready state without a result"),
        }
    }

    /// Run `continuation` once the state is ready (now, if it already is)
    pub(crate) fn on_ready(&self, continuation: Continuation) {
        let mut inner = self.inner.lock();
        if self.is_ready() {
            MutexGuard::unlock(inner);
            continuation();
        } else {
            inner.continuations.push(continuation);
        }
    }

    /// Release the state's lock, enqueue `task` and park until the state is ready
    pub(crate) fn wait_spawned(&self, current: &CurrentTask, task: Box<Task>) {
        let mut inner = self.inner.lock();
        self.changed.wait_spawning(current, &mut inner, task);
        self.changed
            .wait_while(&mut inner, |_| !self.ready.load(Ordering::Acquire));
    }

    fn run_continuations(&self) {
        let continuations = mem::take(&mut self.inner.lock().continuations);
        run_all(continuations);
    }
}

impl<T: Send + 'static> State<T> {
    /// Store the result now, but make it visible only when the current task exits
    pub(crate) fn satisfy_at_task_exit(self: &Arc<Self>, outcome: TaskResult<T>) -> TaskResult<()> {
        let current = scheduler::current_task().ok_or(SchedulerError::NotInTask)?;
        if self.is_satisfied() {
            return Err(TaskError::PromiseAlreadySatisfied);
        }

        let mut inner = self.inner.lock_owned();
        if !matches!(inner.slot, Slot::Unset) {
            return Err(TaskError::PromiseAlreadySatisfied);
        }
        inner.slot = Slot::from(outcome);
        self.satisfied.store(true, Ordering::Release);

        // Exit hooks run in order: publish and notify first, then continuations
        self.changed.notify_on_task_exit(inner, self.ready.clone())?;
        let state = self.clone();
        current
            .header
            .on_exit(Box::new(move || state.run_continuations()));
        Ok(())
    }
}

fn run_all(continuations: Vec<Continuation>) {
    for continuation in continuations {
        continuation();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_new_state_is_pending() {
        let state: State<i32> = State::new();
        assert!(!state.is_ready());
        assert!(!state.is_satisfied());
    }

    #[test]
    fn test_satisfy_once() {
        let state = State::new();
        state.satisfy(Ok(5)).unwrap();
        assert!(state.is_ready());
        assert!(matches!(
            state.satisfy(Ok(6)),
            Err(TaskError::PromiseAlreadySatisfied)
        ));
        assert_eq!(state.get().unwrap(), 5);
    }

    #[test]
    fn test_get_repeats_take_consumes() {
        let state = State::new();
        state.satisfy(Ok(String::from("v"))).unwrap();
        assert_eq!(state.get().unwrap(), "v");
        assert_eq!(state.get().unwrap(), "v");
        assert_eq!(state.take().unwrap(), "v");
        assert!(matches!(state.take(), Err(TaskError::FutureAlreadyRetrieved)));
    }

    #[test]
    fn test_failure_is_sticky() {
        let state: State<i32> = State::new();
        state.satisfy(Err(TaskError::BrokenPromise)).unwrap();
        assert!(matches!(state.take(), Err(TaskError::BrokenPromise)));
        assert!(matches!(state.get(), Err(TaskError::BrokenPromise)));
    }

    #[test]
    fn test_continuations_run_once_ready() {
        let hits = Arc::new(AtomicUsize::new(0));
        let state = State::new();

        let before = hits.clone();
        state.on_ready(Box::new(move || {
            before.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        state.satisfy(Ok(())).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Registered after the fact: runs inline
        let after = hits.clone();
        state.on_ready(Box::new(move || {
            after.fetch_add(10, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_with_outcome_is_ready() {
        let state = State::with_outcome(Ok(3));
        assert!(state.is_ready());
        assert!(state.is_satisfied());
        assert_eq!(state.get().unwrap(), 3);
    }

    #[test]
    fn test_at_task_exit_requires_task() {
        let state = Arc::new(State::new());
        assert!(matches!(
            state.satisfy_at_task_exit(Ok(1)),
            Err(TaskError::Scheduler(SchedulerError::NotInTask))
        ));
        assert!(!state.is_satisfied());
    }
}
