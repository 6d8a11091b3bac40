//! Consumer side of a task result

use crate::error::{SchedulerError, TaskError, TaskResult};
use crate::future::state::{Continuation, State};
use crate::scheduler::{CurrentTask, Handle, Task, TaskBuilder};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Read end of a single-assignment result slot
///
/// Reading a future that is not ready suspends the current task until the
/// producer stores a result. A `Future::default()` has no state; every read
/// fails with [`TaskError::NoState`].
pub struct Future<T> {
    state: Option<Arc<State<T>>>,
}

impl<T> Future<T> {
    pub(crate) fn from_state(state: Arc<State<T>>) -> Self {
        Self { state: Some(state) }
    }

    /// A future that already holds `error`
    pub fn failed(error: TaskError) -> Self {
        Self::from_state(Arc::new(State::with_outcome(Err(error))))
    }

    /// Check if the future is backed by a state
    pub fn is_valid(&self) -> bool {
        self.state.is_some()
    }

    /// Check if a result is available without waiting
    pub fn is_ready(&self) -> bool {
        self.state.as_ref().is_some_and(|state| state.is_ready())
    }

    /// Suspend until a result is available
    pub fn wait(&self) -> TaskResult<()> {
        self.state()?.wait();
        Ok(())
    }

    /// Wait for the result and return a copy of it
    ///
    /// May be called any number of times; every call sees the same result.
    pub fn get(&self) -> TaskResult<T>
    where
        T: Clone,
    {
        self.state()?.get()
    }

    /// Wait for the result and move it out
    pub fn into_value(self) -> TaskResult<T> {
        self.state()?.take()
    }

    /// Second handle on the same state, for bookkeeping inside combinators
    pub(crate) fn share_state(&self) -> Future<T> {
        Self {
            state: self.state.clone(),
        }
    }

    /// Run `continuation` once this future is ready
    ///
    /// Futures without state count as ready.
    pub(crate) fn on_ready(&self, continuation: Continuation) {
        match &self.state {
            Some(state) => state.on_ready(continuation),
            None => continuation(),
        }
    }

    /// Enqueue the task producing this future and park until it is ready
    pub(crate) fn wait_spawned(&self, current: &CurrentTask, task: Box<Task>) {
        if let Some(state) = &self.state {
            state.wait_spawned(current, task);
        }
    }

    fn state(&self) -> TaskResult<&Arc<State<T>>> {
        self.state.as_ref().ok_or(TaskError::NoState)
    }
}

impl<T: Send + 'static> Future<T> {
    /// Schedule `f` as a new task once this future is ready
    ///
    /// `f` receives the ready future and the returned future carries its
    /// result. Must be called from inside a task; otherwise the returned
    /// future holds the error.
    pub fn then<U, F>(self, f: F) -> Future<U>
    where
        F: FnOnce(Future<T>) -> U + Send + 'static,
        U: Send + 'static,
    {
        let Some(state) = self.state.clone() else {
            return Future::failed(TaskError::NoState);
        };
        let Some(handle) = Handle::current() else {
            return Future::failed(SchedulerError::NotInTask.into());
        };

        let (task, future) = match TaskBuilder::new().build(handle.shared(), move || f(self)) {
            Ok(built) => built,
            Err(e) => return Future::failed(e.into()),
        };
        state.on_ready(Box::new(move || {
            if let Err(e) = handle.shared().submit(task) {
                debug!(error = %e, "continuation dropped by a stopped scheduler");
            }
        }));
        future
    }
}

impl<T> Default for Future<T> {
    fn default() -> Self {
        Self { state: None }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("valid", &self.is_valid())
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// A future that already holds `value`
pub fn make_ready_future<T>(value: T) -> Future<T> {
    Future::from_state(Arc::new(State::with_outcome(Ok(value))))
}
