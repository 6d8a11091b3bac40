//! Producer side of a task result

use crate::error::{TaskError, TaskResult};
use crate::future::future::Future;
use crate::future::state::State;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Write end of a single-assignment result slot
///
/// Exactly one of the `set_*` methods may succeed. Dropping a promise that
/// was never satisfied stores [`TaskError::BrokenPromise`], so a reader never
/// waits on a producer that is gone.
pub struct Promise<T> {
    state: Option<Arc<State<T>>>,
    retrieved: AtomicBool,
}

impl<T> Promise<T> {
    /// Create a promise with fresh state
    pub fn new() -> Self {
        Self {
            state: Some(Arc::new(State::new())),
            retrieved: AtomicBool::new(false),
        }
    }

    /// Create a promise and take its future in one step
    pub(crate) fn with_future() -> (Self, Future<T>) {
        let state = Arc::new(State::new());
        let future = Future::from_state(state.clone());
        let promise = Self {
            state: Some(state),
            retrieved: AtomicBool::new(true),
        };
        (promise, future)
    }

    /// Take the future reading this promise; only the first call succeeds
    pub fn get_future(&self) -> TaskResult<Future<T>> {
        let state = self.state()?;
        if self.retrieved.swap(true, Ordering::AcqRel) {
            return Err(TaskError::FutureAlreadyRetrieved);
        }
        Ok(Future::from_state(state.clone()))
    }

    /// Store a value and wake every reader
    pub fn set_value(&self, value: T) -> TaskResult<()> {
        self.state()?.satisfy(Ok(value))
    }

    /// Store a failure and wake every reader
    pub fn set_exception(&self, error: impl Into<anyhow::Error>) -> TaskResult<()> {
        self.set_error(TaskError::failed(error))
    }

    /// Store an already-built task error
    pub fn set_error(&self, error: TaskError) -> TaskResult<()> {
        self.state()?.satisfy(Err(error))
    }

    /// Check if a result has been stored
    pub fn is_satisfied(&self) -> bool {
        self.state.as_ref().is_some_and(|state| state.is_satisfied())
    }

    fn state(&self) -> TaskResult<&Arc<State<T>>> {
        self.state.as_ref().ok_or(TaskError::NoState)
    }
}

impl<T: Send + 'static> Promise<T> {
    /// Store a value now; readers see it once the current task finishes
    ///
    /// Must be called from inside a task. The state stays locked until the
    /// task exits, so waiting on the matching future from the same task, or
    /// chaining it with `then`, `when_all` or `when_any` there, deadlocks.
    /// `is_ready` does not lock and may be called.
    pub fn set_value_at_task_exit(&self, value: T) -> TaskResult<()> {
        self.state()?.satisfy_at_task_exit(Ok(value))
    }

    /// Store a failure now; readers see it once the current task finishes
    ///
    /// Same restrictions as [`set_value_at_task_exit`](Self::set_value_at_task_exit).
    pub fn set_exception_at_task_exit(&self, error: impl Into<anyhow::Error>) -> TaskResult<()> {
        self.state()?.satisfy_at_task_exit(Err(TaskError::failed(error)))
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            if !state.is_satisfied() {
                let _ = state.satisfy(Err(TaskError::BrokenPromise));
            }
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("satisfied", &self.is_satisfied())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_future_once() {
        let promise: Promise<i32> = Promise::new();
        assert!(promise.get_future().is_ok());
        assert!(matches!(
            promise.get_future(),
            Err(TaskError::FutureAlreadyRetrieved)
        ));
    }

    #[test]
    fn test_with_future_is_retrieved() {
        let (promise, _future) = Promise::<()>::with_future();
        assert!(matches!(
            promise.get_future(),
            Err(TaskError::FutureAlreadyRetrieved)
        ));
    }

    #[test]
    fn test_single_assignment() {
        let promise = Promise::new();
        let future = promise.get_future().unwrap();
        promise.set_value(1).unwrap();
        assert!(matches!(
            promise.set_value(2),
            Err(TaskError::PromiseAlreadySatisfied)
        ));
        assert!(matches!(
            promise.set_exception(anyhow::anyhow!("late")),
            Err(TaskError::PromiseAlreadySatisfied)
        ));
        assert_eq!(future.get().unwrap(), 1);
    }

    #[test]
    fn test_set_exception() {
        let promise: Promise<u8> = Promise::new();
        let future = promise.get_future().unwrap();
        promise.set_exception(anyhow::anyhow!("no disk")).unwrap();
        match future.get() {
            Err(TaskError::Failed(error)) => assert_eq!(error.to_string(), "no disk"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_broken_promise_on_drop() {
        let promise: Promise<String> = Promise::new();
        let future = promise.get_future().unwrap();
        drop(promise);
        assert!(matches!(future.into_value(), Err(TaskError::BrokenPromise)));
    }

    #[test]
    fn test_satisfied_promise_drop_keeps_value() {
        let promise = Promise::new();
        let future = promise.get_future().unwrap();
        promise.set_value(8).unwrap();
        assert!(promise.is_satisfied());
        drop(promise);
        assert_eq!(future.into_value().unwrap(), 8);
    }

    #[test]
    fn test_at_task_exit_outside_task() {
        let promise: Promise<i32> = Promise::new();
        assert!(matches!(
            promise.set_value_at_task_exit(1),
            Err(TaskError::Scheduler(_))
        ));
        assert!(!promise.is_satisfied());
        assert!(promise.set_value(2).is_ok());
    }
}
