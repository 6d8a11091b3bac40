//! Error types for task results and scheduler operations

use std::any::Any;
use std::sync::Arc;

/// Errors that can occur while starting, stopping or talking to a scheduler
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// `start` was called on a scheduler that is still running
    #[error("Scheduler is already running")]
    AlreadyRunning,

    /// The scheduler was never started, or has already shut down
    #[error("Scheduler is not running")]
    NotRunning,

    /// The operation needs a running task but was called from a plain thread
    #[error("Operation requires a running task")]
    NotInTask,

    /// The affinity mask selects none of the scheduler's workers
    #[error("Worker affinity {mask:#x} selects none of the {workers} workers")]
    InvalidAffinity {
        /// Requested mask
        mask: u64,
        /// Number of workers the scheduler runs
        workers: usize,
    },

    /// A worker thread could not be spawned
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(String),

    /// A task stack could not be allocated
    #[error("Failed to allocate task stack: {0}")]
    Stack(String),
}

/// Errors observed through a [`Future`](crate::Future)
///
/// The first four variants mirror the misuse errors of the promise/future
/// protocol. `Panicked` and `Failed` carry the failure of the producing task.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    /// The promise was dropped without ever storing a result
    #[error("Broken promise")]
    BrokenPromise,

    /// The future was already taken from this promise, or its value consumed
    #[error("Future already retrieved")]
    FutureAlreadyRetrieved,

    /// A result has already been stored in this promise
    #[error("Promise already satisfied")]
    PromiseAlreadySatisfied,

    /// The promise or future has no associated state
    #[error("No associated state")]
    NoState,

    /// The producing task panicked
    #[error("Task panicked: {0}")]
    Panicked(String),

    /// The producer stored an error with `set_exception`
    #[error("Task failed: {0}")]
    Failed(Arc<anyhow::Error>),

    /// A scheduler error prevented the result from being produced
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl TaskError {
    /// Wrap an arbitrary error as a task failure
    pub fn failed(error: impl Into<anyhow::Error>) -> Self {
        TaskError::Failed(Arc::new(error.into()))
    }

    /// Build a `Panicked` error from a panic payload
    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        TaskError::Panicked(message)
    }

    /// Check if the error came from the producing task itself
    pub fn is_task_failure(&self) -> bool {
        matches!(self, TaskError::Panicked(_) | TaskError::Failed(_))
    }
}

/// Result of a task, as observed through its future
pub type TaskResult<T> = Result<T, TaskError>;

/// Result of a scheduler operation
pub type SchedulerResult<T> = Result<T, SchedulerError>;
