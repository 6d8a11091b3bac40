//! Task structure, identity and worker affinity

use crate::error::{SchedulerResult, TaskError};
use crate::future::{Future, Promise};
use crate::scheduler::context::{ExecutionContext, TaskYielder, Teardown};
use crate::scheduler::syscall::{Resume, SystemCall};
use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// Unique identifier for a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Generate a new unique TaskId
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Create a TaskId from a u64 value
    pub fn from_u64(id: u64) -> Self {
        TaskId(id)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Set of workers allowed to run a task
///
/// Workers are numbered from 1; bit `n - 1` of the mask selects worker `n`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct WorkerAffinity(u64);

impl WorkerAffinity {
    /// Any worker may run the task
    pub const ALL: WorkerAffinity = WorkerAffinity(u64::MAX);

    /// Build an affinity from a raw bitmask
    pub const fn from_bits(bits: u64) -> Self {
        WorkerAffinity(bits)
    }

    /// Raw bitmask
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Only the given worker (1-based) may run the task
    ///
    /// Ids outside `1..=64` give an empty affinity, which spawning rejects.
    pub fn worker(id: usize) -> Self {
        match id.checked_sub(1) {
            Some(bit) if bit < u64::BITS as usize => WorkerAffinity(1 << bit),
            _ => WorkerAffinity(0),
        }
    }

    /// Every worker of a pool with `count` workers
    pub fn first(count: usize) -> Self {
        if count >= u64::BITS as usize {
            WorkerAffinity(u64::MAX)
        } else {
            WorkerAffinity((1u64 << count) - 1)
        }
    }

    /// Check if the given worker (1-based) is selected
    pub fn contains(self, worker: usize) -> bool {
        !WorkerAffinity::worker(worker).intersect(self).is_empty()
    }

    /// Workers selected by both masks
    pub fn intersect(self, other: WorkerAffinity) -> Self {
        WorkerAffinity(self.0 & other.0)
    }

    /// Combine two masks
    pub fn union(self, other: WorkerAffinity) -> Self {
        WorkerAffinity(self.0 | other.0)
    }

    /// Check if no worker is selected
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl Default for WorkerAffinity {
    fn default() -> Self {
        WorkerAffinity::ALL
    }
}

type ExitHook = Box<dyn FnOnce() + Send>;

/// Part of a task that stays reachable while the task runs
///
/// The worker publishes the header of the task it is running through the
/// thread-local task slot; suspension points find their way back to the
/// scheduler through it.
pub(crate) struct TaskHeader {
    id: TaskId,
    affinity: AtomicU64,
    yielder: AtomicPtr<TaskYielder>,
    exit_hooks: Mutex<Vec<ExitHook>>,
}

impl TaskHeader {
    pub(crate) fn new(affinity: WorkerAffinity) -> Self {
        Self {
            id: TaskId::new(),
            affinity: AtomicU64::new(affinity.bits()),
            yielder: AtomicPtr::new(ptr::null_mut()),
            exit_hooks: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn affinity(&self) -> WorkerAffinity {
        WorkerAffinity(self.affinity.load(Ordering::Acquire))
    }

    pub(crate) fn set_affinity(&self, affinity: WorkerAffinity) {
        self.affinity.store(affinity.bits(), Ordering::Release);
    }

    /// Record the yielder of the running coroutine
    pub(crate) fn bind_yielder(&self, yielder: &TaskYielder) {
        self.yielder
            .store(yielder as *const TaskYielder as *mut TaskYielder, Ordering::Release);
    }

    pub(crate) fn unbind_yielder(&self) {
        self.yielder.store(ptr::null_mut(), Ordering::Release);
    }

    pub(crate) fn yielder(&self) -> *const TaskYielder {
        self.yielder.load(Ordering::Acquire)
    }

    /// Register a callback to run when the task body finishes
    pub(crate) fn on_exit(&self, hook: ExitHook) {
        self.exit_hooks.lock().push(hook);
    }

    /// Run exit hooks in registration order
    fn run_exit_hooks(&self) {
        loop {
            let hooks = std::mem::take(&mut *self.exit_hooks.lock());
            if hooks.is_empty() {
                break;
            }
            for hook in hooks {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(hook)) {
                    let error = TaskError::from_panic(payload.as_ref());
                    warn!(task = %self.id, %error, "task exit hook panicked");
                }
            }
        }
    }
}

/// A lightweight task: a closure running on its own stack
pub(crate) struct Task {
    header: Arc<TaskHeader>,
    context: ExecutionContext,
    resume: Resume,
}

impl Task {
    /// Create a task running `f`, returning the task and the future of its result
    ///
    /// A panic inside `f` is stored in the future as [`TaskError::Panicked`].
    pub(crate) fn new<F, T>(
        f: F,
        affinity: WorkerAffinity,
        stack_size: usize,
    ) -> SchedulerResult<(Box<Task>, Future<T>)>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let header = Arc::new(TaskHeader::new(affinity));
        let (promise, future) = Promise::with_future();
        let body_header = header.clone();

        let context = ExecutionContext::new(stack_size, header.clone(), move |teardown: &Teardown| {
            match panic::catch_unwind(AssertUnwindSafe(f)) {
                Ok(value) => {
                    let _ = promise.set_value(value);
                }
                Err(payload) if teardown.is_raised() => {
                    // Stack is being torn down: readers see a broken promise
                    drop(promise);
                    panic::resume_unwind(payload);
                }
                Err(payload) => {
                    let error = TaskError::from_panic(payload.as_ref());
                    warn!(task = %body_header.id(), %error, "task panicked");
                    let _ = promise.set_error(error);
                }
            }
            drop(promise);
            body_header.run_exit_hooks();
        })?;

        trace!(task = %header.id(), "task created");
        Ok((
            Box::new(Task {
                header,
                context,
                resume: Resume::Continue,
            }),
            future,
        ))
    }

    pub(crate) fn id(&self) -> TaskId {
        self.header.id()
    }

    pub(crate) fn header(&self) -> &Arc<TaskHeader> {
        &self.header
    }

    pub(crate) fn affinity(&self) -> WorkerAffinity {
        self.header.affinity()
    }

    /// Value handed to the task when it next resumes
    pub(crate) fn set_resume(&mut self, resume: Resume) {
        self.resume = resume;
    }

    /// Run the task until its next system call
    pub(crate) fn resume(&mut self) -> SystemCall {
        let resume = std::mem::take(&mut self.resume);
        self.context.resume(resume)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id())
            .field("affinity", &self.affinity())
            .finish()
    }
}
