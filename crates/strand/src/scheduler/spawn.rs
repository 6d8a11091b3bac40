//! Spawning tasks: the free `spawn` function, `TaskBuilder` and `Handle`

use crate::config::MIN_STACK_SIZE;
use crate::error::{SchedulerError, SchedulerResult};
use crate::future::Future;
use crate::scheduler::local;
use crate::scheduler::scheduler::{SchedulerStats, Shared};
use crate::scheduler::syscall::SystemCall;
use crate::scheduler::task::{Task, WorkerAffinity};
use std::fmt;
use std::sync::Arc;

/// Spawn a task from inside a running task
///
/// The new task may run on any worker. Its result, or its panic, is
/// delivered through the returned future.
pub fn spawn<F, T>(f: F) -> SchedulerResult<Future<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    TaskBuilder::new().spawn(f)
}

/// Task configuration for spawning
#[derive(Debug, Clone, Default)]
pub struct TaskBuilder {
    affinity: WorkerAffinity,
    stack_size: Option<usize>,
}

impl TaskBuilder {
    /// Create a builder with default settings (any worker, default stack)
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the workers allowed to run the task
    pub fn worker_affinity(mut self, affinity: WorkerAffinity) -> Self {
        self.affinity = affinity;
        self
    }

    /// Override the scheduler's default stack size for this task
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Spawn from inside a running task
    pub fn spawn<F, T>(self, f: F) -> SchedulerResult<Future<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let current = local::current_task().ok_or(SchedulerError::NotInTask)?;
        let (task, future) = self.build(&current.shared, f)?;
        current.suspend(SystemCall::Enqueue(task));
        Ok(future)
    }

    /// Spawn through a handle, from any thread
    pub fn spawn_on<F, T>(self, handle: &Handle, f: F) -> SchedulerResult<Future<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (task, future) = self.build(&handle.shared, f)?;
        handle.shared.submit(task)?;
        Ok(future)
    }

    pub(crate) fn build<F, T>(self, shared: &Shared, f: F) -> SchedulerResult<(Box<Task>, Future<T>)>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let affinity = shared.validate_affinity(self.affinity)?;
        let stack_size = self
            .stack_size
            .map_or(shared.stack_size(), |bytes| bytes.max(MIN_STACK_SIZE));
        Task::new(f, affinity, stack_size)
    }
}

/// Cloneable reference to a running scheduler
#[derive(Clone)]
pub struct Handle {
    shared: Arc<Shared>,
}

impl Handle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Handle of the scheduler running the current thread, if it is a worker
    pub fn current() -> Option<Handle> {
        local::current_shared().map(Handle::new)
    }

    /// Spawn a task with default settings
    ///
    /// Fails with [`SchedulerError::NotRunning`] once every task has
    /// finished and the workers are stopping.
    pub fn spawn<F, T>(&self, f: F) -> SchedulerResult<Future<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        TaskBuilder::new().spawn_on(self, f)
    }

    /// Number of worker threads
    pub fn worker_count(&self) -> usize {
        self.shared.worker_count()
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        self.shared.stats()
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("workers", &self.shared.worker_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{run, this_task, SchedulerConfig};

    #[test]
    fn test_spawn_outside_task() {
        assert!(matches!(spawn(|| 1), Err(SchedulerError::NotInTask)));
        assert!(Handle::current().is_none());
    }

    #[test]
    fn test_spawn_returns_value() {
        let value = run(SchedulerConfig::new().worker_count(2), || {
            spawn(|| 21 * 2).unwrap().into_value().unwrap()
        })
        .unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_builder_affinity_pins_worker() {
        let workers = run(SchedulerConfig::new().worker_count(4), || {
            let futures: Vec<_> = (0..8)
                .map(|_| {
                    TaskBuilder::new()
                        .worker_affinity(WorkerAffinity::worker(3))
                        .spawn(|| {
                            this_task::yield_now();
                            this_task::current_worker_id()
                        })
                        .unwrap()
                })
                .collect();
            futures
                .into_iter()
                .map(|f| f.into_value().unwrap())
                .collect::<Vec<_>>()
        })
        .unwrap();
        assert!(workers.iter().all(|w| *w == Some(3)));
    }

    #[test]
    fn test_builder_rejects_foreign_affinity() {
        let result = run(SchedulerConfig::new().worker_count(2), || {
            TaskBuilder::new()
                .worker_affinity(WorkerAffinity::worker(5))
                .spawn(|| ())
                .map(|_| ())
        })
        .unwrap();
        assert_eq!(
            result,
            Err(SchedulerError::InvalidAffinity {
                mask: 0b10000,
                workers: 2
            })
        );
    }

    #[test]
    fn test_builder_custom_stack() {
        let value = run(SchedulerConfig::new().worker_count(1), || {
            TaskBuilder::new()
                .stack_size(1024 * 1024)
                .spawn(|| {
                    let buffer = [7u8; 256 * 1024];
                    buffer.iter().map(|b| *b as usize).sum::<usize>()
                })
                .unwrap()
                .into_value()
                .unwrap()
        })
        .unwrap();
        assert_eq!(value, 7 * 256 * 1024);
    }

    #[test]
    fn test_handle_spawn_from_outside() {
        let mut scheduler = crate::Scheduler::new(SchedulerConfig::new().worker_count(2));
        let release = Arc::new(crate::sync::Mutex::new(false));
        let flag = release.clone();
        scheduler
            .start(move || {
                // Keep the scheduler alive until the outside task has run
                loop {
                    if *flag.lock() {
                        break;
                    }
                    this_task::yield_now();
                }
                0
            })
            .unwrap();

        let handle = scheduler.handle().unwrap();
        assert_eq!(handle.worker_count(), 2);
        let answer = handle.spawn(|| "from outside").unwrap();
        assert_eq!(answer.get().unwrap(), "from outside");
        *release.lock() = true;
        scheduler.join().unwrap();

        assert!(matches!(
            handle.spawn(|| ()),
            Err(SchedulerError::NotRunning)
        ));
    }
}
