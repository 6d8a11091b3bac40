//! Worker thread that executes Tasks

use crate::error::{SchedulerError, SchedulerResult};
use crate::scheduler::local;
use crate::scheduler::scheduler::Shared;
use crate::scheduler::syscall::SystemCall;
use crate::scheduler::task::Task;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, trace};

/// Worker thread that executes Tasks
pub(crate) struct Worker {
    /// Worker ID (1-based)
    id: usize,

    /// Worker thread handle
    handle: Option<thread::JoinHandle<()>>,
}

impl Worker {
    /// Spawn the worker thread
    pub(crate) fn spawn(id: usize, shared: Arc<Shared>, name_prefix: &str) -> SchedulerResult<Self> {
        let handle = thread::Builder::new()
            .name(format!("{}-{}", name_prefix, id))
            .spawn(move || Worker::run_loop(id, shared))
            .map_err(|e| SchedulerError::Spawn(e.to_string()))?;

        Ok(Self {
            id,
            handle: Some(handle),
        })
    }

    /// Wait for the worker thread to exit
    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(worker = self.id, "worker thread panicked");
            }
        }
    }

    /// Worker thread main loop
    ///
    /// Starts as if the worker's (nonexistent) task had yielded, then
    /// alternates between interpreting the last system call under the
    /// scheduler lock and resuming the task the interpreter picked.
    fn run_loop(id: usize, shared: Arc<Shared>) {
        local::enter_worker(id, shared.clone());
        shared.enter_gate();
        debug!(worker = id, "worker started");

        let mut current: Option<Box<Task>> = None;
        let mut call = SystemCall::Yield;
        loop {
            if matches!(call, SystemCall::Terminate) {
                // Release the finished task's stack outside the scheduler lock
                current = None;
            }

            current = {
                let mut queue = shared.lock_queue();
                shared.interpret(call, current.take(), &mut queue, Some(id))
            };

            let Some(task) = current.as_mut() else {
                break;
            };
            trace!(worker = id, task = %task.id(), "resuming task");
            local::set_task(Some(task.header().clone()));
            call = task.resume();
            local::set_task(None);
        }

        debug!(worker = id, "worker stopping");
        shared.leave_gate();
        local::exit_worker();
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.join();
    }
}
