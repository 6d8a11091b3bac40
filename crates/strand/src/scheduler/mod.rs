//! Task Scheduler - M:N cooperative multitasking
//!
//! Tasks run on their own stacks and are multiplexed onto a fixed pool of
//! worker threads. A task gives up its worker only by making a system call
//! (yield, lock, wait, spawn, finish); the worker interprets the call under
//! the scheduler lock and picks the next task to resume.

mod context;
mod local;
mod queue;
#[allow(clippy::module_inception)]
mod scheduler;
mod spawn;
pub(crate) mod syscall;
mod task;
mod worker;

pub use scheduler::{run, Scheduler, SchedulerStats};
pub use spawn::{spawn, Handle, TaskBuilder};
pub use task::{TaskId, WorkerAffinity};

pub(crate) use local::{current_task, current_worker_id, CurrentTask};
pub(crate) use scheduler::Shared;
pub(crate) use task::Task;
