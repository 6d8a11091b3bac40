//! Synchronization primitives for Task coordination
//!
//! These block at the Task level instead of the OS thread level: a task
//! waiting for a lock or a condition is parked by the scheduler and its
//! worker keeps running other tasks.

mod condvar;
mod mutex;
pub(crate) mod raw;
mod shared_mutex;

pub use condvar::Condvar;
pub use mutex::{Mutex, MutexGuard, OwnedMutexGuard};
pub use shared_mutex::{SharedMutex, SharedMutexReadGuard, SharedMutexWriteGuard};
