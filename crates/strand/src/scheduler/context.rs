//! Execution contexts: resumable stacks the scheduler switches tasks on
//!
//! Each task runs inside a stackful coroutine. A task leaves its context only
//! by making a [`SystemCall`]; the worker that resumed it receives the call
//! as the return value of [`ExecutionContext::resume`] and interprets it.

use crate::error::{SchedulerError, SchedulerResult};
use crate::scheduler::syscall::{Resume, SystemCall};
use crate::scheduler::task::TaskHeader;
use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Yielder handed to a task body by its coroutine
pub(crate) type TaskYielder = Yielder<Resume, SystemCall>;

/// Raised while a suspended context is being torn down
///
/// The task body checks it to tell the forced unwind of its stack apart from
/// a genuine panic.
#[derive(Clone)]
pub(crate) struct Teardown(Arc<AtomicBool>);

impl Teardown {
    fn new() -> Self {
        Teardown(Arc::new(AtomicBool::new(false)))
    }

    fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A resumable stack running one task body
pub(crate) struct ExecutionContext {
    coroutine: Coroutine<Resume, SystemCall, (), DefaultStack>,
    teardown: Teardown,
    suspended: bool,
}

// SAFETY: the coroutine only runs while a single worker holds the owning
// task, and everything the body captures is required to be `Send`.
unsafe impl Send for ExecutionContext {}

impl ExecutionContext {
    /// Allocate a stack and prepare `body` to run on it
    pub(crate) fn new<F>(stack_size: usize, header: Arc<TaskHeader>, body: F) -> SchedulerResult<Self>
    where
        F: FnOnce(&Teardown) + Send + 'static,
    {
        let stack = DefaultStack::new(stack_size).map_err(|e| SchedulerError::Stack(e.to_string()))?;
        let teardown = Teardown::new();
        let flag = teardown.clone();

        let coroutine = Coroutine::with_stack(stack, move |yielder: &TaskYielder, _first: Resume| {
            header.bind_yielder(yielder);
            body(&flag);
            header.unbind_yielder();
        });

        Ok(Self {
            coroutine,
            teardown,
            suspended: false,
        })
    }

    /// Switch into the context until it makes its next system call
    ///
    /// A body that returns is reported as [`SystemCall::Terminate`]. Must not
    /// be called again after that.
    pub(crate) fn resume(&mut self, input: Resume) -> SystemCall {
        match self.coroutine.resume(input) {
            CoroutineResult::Yield(call) => {
                self.suspended = true;
                call
            }
            CoroutineResult::Return(()) => {
                self.suspended = false;
                SystemCall::Terminate
            }
        }
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        if self.suspended {
            // Dropping the coroutine below unwinds the suspended stack
            debug!("unwinding suspended task stack");
            self.teardown.raise();
        }
    }
}

/// Leave the running task's context with `call`
///
/// Returns the value the scheduler resumes the task with.
pub(crate) fn suspend(header: &TaskHeader, call: SystemCall) -> Resume {
    let yielder = header.yielder();
    assert!(!yielder.is_null(), "suspend called outside of the task's own context");
    // SAFETY: the yielder lives on the coroutine's base frame for as long as
    // the body runs, and only code running inside that body gets here.
    unsafe { (*yielder).suspend(call) }
}
