//! Strand - M:N cooperative task scheduler
//!
//! This crate multiplexes lightweight tasks, each running on its own stack,
//! onto a fixed pool of worker threads. Tasks never preempt each other; they
//! switch only at well-defined suspension points:
//! - yielding ([`this_task::yield_now`])
//! - blocking on a task-level [`Mutex`], [`SharedMutex`] or [`Condvar`]
//! - waiting for a [`Future`] produced by another task
//!
//! Blocking one of these primitives parks the *task*, never the worker
//! thread, so the worker moves on to whatever else is ready.
//!
//! ```ignore
//! use strand::{Scheduler, SchedulerConfig};
//!
//! let mut scheduler = Scheduler::new(SchedulerConfig::new().worker_count(4));
//! let code = scheduler
//!     .start(|| {
//!         let answer = strand::spawn(|| 6 * 7).unwrap();
//!         answer.into_value().unwrap()
//!     })?
//!     .join()?;
//! assert_eq!(code, 42);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod future;
pub mod scheduler;
pub mod sync;
pub mod this_task;

pub use config::SchedulerConfig;
pub use error::{SchedulerError, SchedulerResult, TaskError, TaskResult};
pub use future::{make_ready_future, when_all, when_any, Future, Promise, WhenAny};
pub use scheduler::{run, spawn, Handle, Scheduler, SchedulerStats, TaskBuilder, TaskId, WorkerAffinity};
pub use sync::{
    Condvar, Mutex, MutexGuard, OwnedMutexGuard, SharedMutex, SharedMutexReadGuard,
    SharedMutexWriteGuard,
};
