//! Scheduler: owns the worker pool and interprets system calls

use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult, TaskError, TaskResult};
use crate::future::Future;
use crate::scheduler::queue::RunQueue;
use crate::scheduler::spawn::Handle;
use crate::scheduler::syscall::{LockMode, Resume, SystemCall};
use crate::scheduler::task::{Task, WorkerAffinity};
use crate::scheduler::worker::Worker;
use crate::sync::raw::RawLock;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace};

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total tasks enqueued, including the root task
    pub tasks_spawned: u64,
    /// Total tasks that ran to completion
    pub tasks_completed: u64,
    /// Tasks enqueued and not yet finished
    pub active_tasks: usize,
    /// Tasks waiting in the ready queue
    pub ready_tasks: usize,
    /// Tasks parked on a mutex or condition
    pub blocked_tasks: usize,
}

/// Start/stop rendezvous of the worker threads
struct Gate {
    /// Workers that have not reached the start line yet
    starting: usize,
    /// Workers that have not left the scheduling loop yet
    running: usize,
}

/// State shared between the scheduler, its workers and every task it runs
pub(crate) struct Shared {
    /// The scheduler lock: ready queue, blocked map and live count
    queue: Mutex<RunQueue>,

    /// One wake-up signal per worker, indexed by `worker id - 1`
    wakeups: Vec<Condvar>,

    gate: Mutex<Gate>,
    gate_changed: Condvar,

    stack_size: usize,

    tasks_spawned: AtomicU64,
    tasks_completed: AtomicU64,
}

impl Shared {
    pub(crate) fn new(worker_count: usize, stack_size: usize) -> Self {
        Self {
            queue: Mutex::new(RunQueue::new()),
            wakeups: (0..worker_count).map(|_| Condvar::new()).collect(),
            gate: Mutex::new(Gate {
                starting: worker_count,
                running: worker_count,
            }),
            gate_changed: Condvar::new(),
            stack_size,
            tasks_spawned: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
        }
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.wakeups.len()
    }

    pub(crate) fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// Restrict `affinity` to existing workers, rejecting masks that select none
    pub(crate) fn validate_affinity(&self, affinity: WorkerAffinity) -> SchedulerResult<WorkerAffinity> {
        let effective = affinity.intersect(WorkerAffinity::first(self.worker_count()));
        if effective.is_empty() {
            return Err(SchedulerError::InvalidAffinity {
                mask: affinity.bits(),
                workers: self.worker_count(),
            });
        }
        Ok(effective)
    }

    pub(crate) fn lock_queue(&self) -> MutexGuard<'_, RunQueue> {
        self.queue.lock()
    }

    /// Enqueue a task from outside the scheduler's own call path
    pub(crate) fn submit(&self, task: Box<Task>) -> SchedulerResult<()> {
        let rejected = {
            let mut queue = self.queue.lock();
            if queue.is_quit() {
                Some(task)
            } else {
                let resumed = self.interpret(SystemCall::Enqueue(task), None, &mut queue, None);
                debug_assert!(resumed.is_none());
                None
            }
        };
        match rejected {
            // Dropped outside the scheduler lock: this breaks the task's promise
            Some(task) => {
                drop(task);
                Err(SchedulerError::NotRunning)
            }
            None => Ok(()),
        }
    }

    /// Execute a non-suspending call (`Unlock`, `Notify`) on the calling thread
    pub(crate) fn call_now(&self, call: SystemCall) {
        debug_assert!(matches!(
            call,
            SystemCall::Unlock { .. } | SystemCall::Notify { .. }
        ));
        let mut queue = self.queue.lock();
        let resumed = self.interpret(call, None, &mut queue, None);
        debug_assert!(resumed.is_none());
    }

    /// Interpret `call` on behalf of `caller`, returning the task to run next
    ///
    /// `worker` is the id of the worker doing the interpretation; calls made
    /// from outside a worker pass `None` and never pick a new task. Returns
    /// `None` when the worker should exit.
    pub(crate) fn interpret(
        &self,
        call: SystemCall,
        caller: Option<Box<Task>>,
        queue: &mut MutexGuard<'_, RunQueue>,
        worker: Option<usize>,
    ) -> Option<Box<Task>> {
        trace!(call = call.name(), worker, "system call");
        let chosen = match call {
            SystemCall::Enqueue(task) => {
                self.enqueue_new(queue, task);
                caller
            }
            SystemCall::EnqueueAndBlock {
                task,
                condition,
                mutex,
            } => {
                // SAFETY: the caller is suspended inside the call that lent the lock
                self.release(queue, unsafe { mutex.get() }, LockMode::Exclusive);
                if let Some(caller) = caller {
                    queue.park(condition, caller);
                }
                self.enqueue_new(queue, task);
                self.next(queue, worker)
            }
            SystemCall::Yield => match caller {
                // Nothing else to run: keep going without a round trip
                Some(caller)
                    if queue.ready_is_empty()
                        && !queue.is_quit()
                        && worker.is_some_and(|id| caller.affinity().contains(id)) =>
                {
                    Some(caller)
                }
                Some(caller) => {
                    self.make_ready(queue, caller);
                    self.next(queue, worker)
                }
                None => self.next(queue, worker),
            },
            SystemCall::Lock { lock, mode } => {
                let Some(mut caller) = caller else {
                    return self.next(queue, worker);
                };
                if queue.is_quit() {
                    // Never hand a lock to a task that will only be dropped
                    queue.push_ready(caller);
                    return None;
                }
                // SAFETY: the caller is suspended inside the call that lent the lock
                if unsafe { lock.get() }.try_acquire(mode) {
                    caller.set_resume(Resume::LockAcquired);
                    Some(caller)
                } else {
                    queue.park(lock.key(), caller);
                    self.next(queue, worker)
                }
            }
            SystemCall::Wait { condition, mutex } => {
                // SAFETY: the caller is suspended inside the call that lent the lock
                self.release(queue, unsafe { mutex.get() }, LockMode::Exclusive);
                if let Some(caller) = caller {
                    queue.park(condition, caller);
                }
                self.next(queue, worker)
            }
            SystemCall::Unlock { lock, mode } => {
                // SAFETY: the unlocking guard is still alive on the calling thread
                self.release(queue, unsafe { lock.get() }, mode);
                caller
            }
            SystemCall::Notify { condition, count } => {
                let woken = queue.wake(condition, count);
                self.wake_workers(woken);
                caller
            }
            SystemCall::Terminate => {
                drop(caller);
                self.tasks_completed.fetch_add(1, Ordering::Relaxed);
                if queue.remove_live() {
                    debug!("last task finished, stopping workers");
                    queue.set_quit();
                    self.wake_all_workers();
                }
                self.next(queue, worker)
            }
        };

        // A stopping worker hands back even a task it could keep running
        match chosen {
            Some(task) if worker.is_some() && queue.is_quit() => {
                queue.push_ready(task);
                None
            }
            chosen => chosen,
        }
    }

    /// Count and enqueue a task that has never run
    fn enqueue_new(&self, queue: &mut RunQueue, task: Box<Task>) {
        trace!(task = %task.id(), "task enqueued");
        queue.add_live();
        self.tasks_spawned.fetch_add(1, Ordering::Relaxed);
        self.make_ready(queue, task);
    }

    fn make_ready(&self, queue: &mut RunQueue, task: Box<Task>) {
        let affinity = queue.push_ready(task);
        self.wake_workers(affinity);
    }

    /// Release `lock` and, if it became free, move all its waiters to ready
    fn release(&self, queue: &mut RunQueue, lock: &RawLock, mode: LockMode) {
        if lock.release(mode) {
            let woken = queue.wake(lock.key(), None);
            self.wake_workers(woken);
        }
    }

    fn next(&self, queue: &mut MutexGuard<'_, RunQueue>, worker: Option<usize>) -> Option<Box<Task>> {
        worker.and_then(|id| self.schedule(queue, id))
    }

    /// Block `worker` until a task it may run is ready, or the scheduler quits
    fn schedule(&self, queue: &mut MutexGuard<'_, RunQueue>, worker: usize) -> Option<Box<Task>> {
        let wakeup = self.wakeups.get(worker.checked_sub(1)?)?;
        loop {
            while !queue.is_quit() && !queue.has_work_for(worker) {
                wakeup.wait(queue);
            }
            if queue.is_quit() {
                return None;
            }
            if let Some(task) = queue.take_for_worker(worker) {
                return Some(task);
            }
        }
    }

    fn wake_workers(&self, affinity: WorkerAffinity) {
        for (index, wakeup) in self.wakeups.iter().enumerate() {
            if affinity.contains(index + 1) {
                wakeup.notify_one();
            }
        }
    }

    fn wake_all_workers(&self) {
        for wakeup in &self.wakeups {
            wakeup.notify_one();
        }
    }

    /// Check if the workers have been told to stop
    pub(crate) fn is_stopped(&self) -> bool {
        self.queue.lock().is_quit()
    }

    /// Stop all workers at their next scheduling decision
    pub(crate) fn request_quit(&self) {
        let mut queue = self.queue.lock();
        queue.set_quit();
        self.wake_all_workers();
    }

    /// Wait until every worker has started
    pub(crate) fn enter_gate(&self) {
        let mut gate = self.gate.lock();
        gate.starting = gate.starting.saturating_sub(1);
        if gate.starting == 0 {
            self.gate_changed.notify_all();
        }
        while gate.starting > 0 {
            self.gate_changed.wait(&mut gate);
        }
    }

    /// Wait until every worker has left the scheduling loop
    pub(crate) fn leave_gate(&self) {
        let mut gate = self.gate.lock();
        gate.running = gate.running.saturating_sub(1);
        if gate.running == 0 {
            self.gate_changed.notify_all();
        }
        while gate.running > 0 {
            self.gate_changed.wait(&mut gate);
        }
    }

    /// Account for `missing` workers that will never arrive, and quit
    fn abort_start(&self, missing: usize) {
        {
            let mut gate = self.gate.lock();
            gate.starting = gate.starting.saturating_sub(missing);
            gate.running = gate.running.saturating_sub(missing);
            self.gate_changed.notify_all();
        }
        self.request_quit();
    }

    /// Drop every task still queued or parked
    ///
    /// Suspended tasks are unwound; their destructors may touch the
    /// scheduler again, so tasks are dropped outside the lock until none
    /// are left.
    fn discard_remaining(&self) {
        loop {
            let tasks = self.queue.lock().drain();
            if tasks.is_empty() {
                break;
            }
            debug!(count = tasks.len(), "discarding unfinished tasks");
            drop(tasks);
        }
    }

    pub(crate) fn stats(&self) -> SchedulerStats {
        let queue = self.queue.lock();
        SchedulerStats {
            tasks_spawned: self.tasks_spawned.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            active_tasks: queue.live(),
            ready_tasks: queue.ready_len(),
            blocked_tasks: queue.blocked_len(),
        }
    }
}

/// M:N cooperative task scheduler
///
/// `start` launches the worker pool and the root task, which is pinned to
/// worker 1. The scheduler keeps running while any task it owns is alive;
/// `join` waits for that and returns the root task's exit code.
pub struct Scheduler {
    config: SchedulerConfig,
    workers: Vec<Worker>,
    shared: Option<Arc<Shared>>,
    root: Option<Future<i32>>,
    running: bool,
}

impl Scheduler {
    /// Create a scheduler; nothing runs until [`start`](Self::start)
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            workers: Vec::new(),
            shared: None,
            root: None,
            running: false,
        }
    }

    /// Create a scheduler configured from `STRAND_*` environment variables
    pub fn from_env() -> Self {
        Self::new(SchedulerConfig::from_env())
    }

    /// Number of worker threads
    pub fn worker_count(&self) -> usize {
        self.config.resolved_worker_count()
    }

    /// Scheduler configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Check if `start` has been called without a matching `join`
    pub fn running(&self) -> bool {
        self.running
    }

    /// Start the workers and run `entry` as the root task on worker 1
    pub fn start<F>(&mut self, entry: F) -> SchedulerResult<&mut Self>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        if self.running {
            return Err(SchedulerError::AlreadyRunning);
        }

        let worker_count = self.worker_count();
        let stack_size = self.config.resolved_stack_size();
        let shared = Arc::new(Shared::new(worker_count, stack_size));
        let (root, future) = Task::new(entry, WorkerAffinity::worker(1), stack_size)?;
        shared.submit(root)?;

        info!(workers = worker_count, stack_size, "starting scheduler");

        let mut workers = Vec::with_capacity(worker_count);
        for id in 1..=worker_count {
            match Worker::spawn(id, shared.clone(), &self.config.thread_name_prefix) {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    error!(worker = id, error = %e, "failed to start worker");
                    shared.abort_start(worker_count - workers.len());
                    for mut worker in workers {
                        worker.join();
                    }
                    shared.discard_remaining();
                    return Err(e);
                }
            }
        }

        self.workers = workers;
        self.shared = Some(shared);
        self.root = Some(future);
        self.running = true;
        Ok(self)
    }

    /// Wait until every task has finished and return the root task's result
    pub fn join(&mut self) -> TaskResult<i32> {
        if !self.running {
            return Err(SchedulerError::NotRunning.into());
        }

        for worker in &mut self.workers {
            worker.join();
        }
        self.workers.clear();
        self.running = false;

        if let Some(shared) = self.shared.take() {
            shared.discard_remaining();
        }
        info!("scheduler stopped");

        self.root.take().ok_or(TaskError::NoState)?.into_value()
    }

    /// Handle for spawning into this scheduler from any thread
    pub fn handle(&self) -> Option<Handle> {
        self.shared.as_ref().map(|shared| Handle::new(shared.clone()))
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        self.shared.as_ref().map(|shared| shared.stats()).unwrap_or_default()
    }

    /// Stop the workers without waiting for tasks to finish
    ///
    /// Workers stop at their next scheduling decision. Tasks that have not
    /// finished by then are dropped; suspended ones are unwound first.
    pub fn shutdown(&mut self) {
        let Some(shared) = self.shared.take() else {
            return;
        };

        info!("shutting down scheduler");
        shared.request_quit();
        for worker in &mut self.workers {
            worker.join();
        }
        self.workers.clear();
        shared.discard_remaining();
        self.root = None;
        self.running = false;
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run `entry` as the root task of a fresh scheduler and return its result
///
/// Returns once every task spawned along the way has finished.
pub fn run<F, T>(config: SchedulerConfig, entry: F) -> TaskResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let output = Arc::new(Mutex::new(None));
    let slot = output.clone();
    let mut scheduler = Scheduler::new(config);
    scheduler
        .start(move || {
            *slot.lock() = Some(entry());
            0
        })?
        .join()?;
    let value = output.lock().take();
    value.ok_or(TaskError::BrokenPromise)
}
