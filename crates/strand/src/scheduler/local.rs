//! Per-worker thread state: which scheduler this thread serves, and which
//! task it is running right now
//!
//! A task can migrate between workers at every suspension point, so nothing
//! read from here may be cached across one. The accessors are never inlined
//! to keep the compiler from reusing a thread-local address computed on a
//! different thread.

use crate::scheduler::scheduler::Shared;
use crate::scheduler::syscall::{Resume, SystemCall};
use crate::scheduler::task::TaskHeader;
use crate::scheduler::context;
use std::cell::RefCell;
use std::sync::Arc;

struct WorkerSlot {
    id: usize,
    shared: Arc<Shared>,
    task: Option<Arc<TaskHeader>>,
}

thread_local! {
    static WORKER: RefCell<Option<WorkerSlot>> = const { RefCell::new(None) };
}

/// Snapshot of the running task, taken on a worker thread
pub(crate) struct CurrentTask {
    /// Worker that took the snapshot; stale after the next suspension
    pub(crate) worker_id: usize,
    pub(crate) shared: Arc<Shared>,
    pub(crate) header: Arc<TaskHeader>,
}

impl CurrentTask {
    /// Hand `call` to the scheduler and wait to be resumed
    pub(crate) fn suspend(&self, call: SystemCall) -> Resume {
        context::suspend(&self.header, call)
    }
}

#[inline(never)]
pub(crate) fn enter_worker(id: usize, shared: Arc<Shared>) {
    WORKER.with(|slot| {
        *slot.borrow_mut() = Some(WorkerSlot {
            id,
            shared,
            task: None,
        });
    });
}

#[inline(never)]
pub(crate) fn exit_worker() {
    WORKER.with(|slot| slot.borrow_mut().take());
}

/// Publish the task this worker is about to resume (`None` once it suspends)
#[inline(never)]
pub(crate) fn set_task(task: Option<Arc<TaskHeader>>) {
    WORKER.with(|slot| {
        if let Some(worker) = slot.borrow_mut().as_mut() {
            worker.task = task;
        }
    });
}

/// The task running on this thread, if this is a worker running one
#[inline(never)]
pub(crate) fn current_task() -> Option<CurrentTask> {
    WORKER.with(|slot| {
        let slot = slot.borrow();
        let worker = slot.as_ref()?;
        let header = worker.task.clone()?;
        Some(CurrentTask {
            worker_id: worker.id,
            shared: worker.shared.clone(),
            header,
        })
    })
}

/// The scheduler this thread works for
#[inline(never)]
pub(crate) fn current_shared() -> Option<Arc<Shared>> {
    WORKER.with(|slot| slot.borrow().as_ref().map(|worker| worker.shared.clone()))
}

/// Id of the worker running on this thread
#[inline(never)]
pub(crate) fn current_worker_id() -> Option<usize> {
    WORKER.with(|slot| slot.borrow().as_ref().map(|worker| worker.id))
}
