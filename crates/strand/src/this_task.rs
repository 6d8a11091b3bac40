//! Operations on the currently running task
//!
//! Everything here reads the worker's thread-local task slot, so the
//! answers are only meaningful inside a task and may change after any
//! suspension point: a task can resume on a different worker.

use crate::error::{SchedulerError, SchedulerResult, TaskResult};
use crate::scheduler::syscall::SystemCall;
use crate::scheduler::{self, Task, TaskId, WorkerAffinity};

/// Let other ready tasks run
///
/// Returns immediately when nothing else is ready for this worker. Outside
/// a task this yields the OS thread.
pub fn yield_now() {
    match scheduler::current_task() {
        Some(current) => {
            current.suspend(SystemCall::Yield);
        }
        None => std::thread::yield_now(),
    }
}

/// Id (1-based) of the worker running the current thread
pub fn current_worker_id() -> Option<usize> {
    scheduler::current_worker_id()
}

/// Id of the running task
pub fn task_id() -> Option<TaskId> {
    scheduler::current_task().map(|current| current.header.id())
}

/// Workers the running task may be scheduled on
pub fn worker_affinity() -> Option<WorkerAffinity> {
    scheduler::current_task().map(|current| current.header.affinity())
}

/// Change the workers the running task may be scheduled on
///
/// Takes effect the next time the task is queued; call [`yield_now`] to
/// move right away.
pub fn set_worker_affinity(affinity: WorkerAffinity) -> SchedulerResult<()> {
    let current = scheduler::current_task().ok_or(SchedulerError::NotInTask)?;
    let affinity = current.shared.validate_affinity(affinity)?;
    current.header.set_affinity(affinity);
    Ok(())
}

/// Pin the running task to the worker it is running on now
pub fn bind_to_current_worker() -> SchedulerResult<()> {
    let current = scheduler::current_task().ok_or(SchedulerError::NotInTask)?;
    current
        .header
        .set_affinity(WorkerAffinity::worker(current.worker_id));
    Ok(())
}

/// Spawn `f` and suspend until it has finished
///
/// The helper inherits the caller's worker affinity. It is enqueued in the
/// same step that parks the caller, so the caller never runs again before
/// the helper has produced its result.
pub fn spawn_and_wait<F, T>(f: F) -> TaskResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let current = scheduler::current_task().ok_or(SchedulerError::NotInTask)?;
    let stack_size = current.shared.stack_size();
    let (task, future) = Task::new(f, current.header.affinity(), stack_size)?;
    future.wait_spawned(&current, task);
    future.into_value()
}
