//! Ready queue and blocked map, guarded together by the scheduler lock

use crate::scheduler::syscall::SyncKey;
use crate::scheduler::task::{Task, WorkerAffinity};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

/// Scheduling state shared by all workers
///
/// Every field is only touched with the scheduler lock held, which is what
/// makes park-on-key and wake-by-key atomic with respect to each other.
#[derive(Debug, Default)]
pub(crate) struct RunQueue {
    /// Tasks ready to run, in FIFO order
    ready: VecDeque<Box<Task>>,

    /// Parked tasks, keyed by the mutex or condition they wait on
    blocked: FxHashMap<SyncKey, VecDeque<Box<Task>>>,

    /// Hint: bit set for every worker that may find a task in `ready`
    ///
    /// Bits are set on enqueue and cleared lazily when a worker finds no
    /// task it may run.
    hint: u64,

    /// Tasks enqueued and not yet terminated
    live: usize,

    /// Set once `live` drops to zero, or on shutdown
    quit: bool,
}

impl RunQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a task to the ready queue
    pub(crate) fn push_ready(&mut self, task: Box<Task>) -> WorkerAffinity {
        let affinity = task.affinity();
        self.hint |= affinity.bits();
        self.ready.push_back(task);
        affinity
    }

    /// Check if `worker` should look for work
    pub(crate) fn has_work_for(&self, worker: usize) -> bool {
        !self.ready.is_empty() && WorkerAffinity::from_bits(self.hint).contains(worker)
    }

    pub(crate) fn ready_is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    /// Remove the first ready task `worker` may run
    ///
    /// When there is none, the worker's hint bit is cleared so it goes back
    /// to sleep until a matching task is enqueued.
    pub(crate) fn take_for_worker(&mut self, worker: usize) -> Option<Box<Task>> {
        let position = self.ready.iter().position(|task| task.affinity().contains(worker));
        match position {
            Some(index) => self.ready.remove(index),
            None => {
                self.hint &= !WorkerAffinity::worker(worker).bits();
                None
            }
        }
    }

    /// Park a task on `key`
    pub(crate) fn park(&mut self, key: SyncKey, task: Box<Task>) {
        self.blocked.entry(key).or_default().push_back(task);
    }

    /// Move up to `limit` tasks parked on `key` to the ready queue (`None` = all)
    ///
    /// Returns the combined affinity of the woken tasks.
    pub(crate) fn wake(&mut self, key: SyncKey, limit: Option<usize>) -> WorkerAffinity {
        let mut woken = WorkerAffinity::from_bits(0);
        let Some(parked) = self.blocked.get_mut(&key) else {
            return woken;
        };

        let count = limit.map_or(parked.len(), |n| n.min(parked.len()));
        let moved: Vec<Box<Task>> = parked.drain(..count).collect();
        if parked.is_empty() {
            self.blocked.remove(&key);
        }
        for task in moved {
            woken = woken.union(self.push_ready(task));
        }
        woken
    }

    pub(crate) fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub(crate) fn blocked_len(&self) -> usize {
        self.blocked.values().map(VecDeque::len).sum()
    }

    pub(crate) fn live(&self) -> usize {
        self.live
    }

    /// Count a newly enqueued task
    pub(crate) fn add_live(&mut self) {
        self.live += 1;
    }

    /// Count a terminated task; returns true when it was the last one
    pub(crate) fn remove_live(&mut self) -> bool {
        self.live = self.live.saturating_sub(1);
        self.live == 0
    }

    pub(crate) fn is_quit(&self) -> bool {
        self.quit
    }

    pub(crate) fn set_quit(&mut self) {
        self.quit = true;
    }

    /// Remove every ready and parked task
    pub(crate) fn drain(&mut self) -> Vec<Box<Task>> {
        let mut tasks: Vec<Box<Task>> = self.ready.drain(..).collect();
        for (_, parked) in self.blocked.drain() {
            tasks.extend(parked);
        }
        self.hint = 0;
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIN_STACK_SIZE;

    fn task(affinity: WorkerAffinity) -> Box<Task> {
        Task::new(|| (), affinity, MIN_STACK_SIZE).unwrap().0
    }

    #[test]
    fn test_empty_queue() {
        let queue = RunQueue::new();
        assert!(queue.ready_is_empty());
        assert!(!queue.has_work_for(1));
        assert_eq!(queue.blocked_len(), 0);
        assert!(!queue.is_quit());
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = RunQueue::new();
        let first = task(WorkerAffinity::ALL);
        let second = task(WorkerAffinity::ALL);
        let (a, b) = (first.id(), second.id());
        queue.push_ready(first);
        queue.push_ready(second);

        assert_eq!(queue.take_for_worker(1).unwrap().id(), a);
        assert_eq!(queue.take_for_worker(2).unwrap().id(), b);
        assert!(queue.take_for_worker(1).is_none());
    }

    #[test]
    fn test_affinity_scan_skips_foreign_tasks() {
        let mut queue = RunQueue::new();
        let pinned = task(WorkerAffinity::worker(2));
        let free = task(WorkerAffinity::ALL);
        let (p, f) = (pinned.id(), free.id());
        queue.push_ready(pinned);
        queue.push_ready(free);

        assert_eq!(queue.take_for_worker(1).unwrap().id(), f);
        assert!(queue.take_for_worker(1).is_none());
        assert_eq!(queue.take_for_worker(2).unwrap().id(), p);
    }

    #[test]
    fn test_hint_cleared_when_nothing_matches() {
        let mut queue = RunQueue::new();
        queue.push_ready(task(WorkerAffinity::worker(3)));

        // Enqueueing only sets worker 3's bit
        assert!(!queue.has_work_for(1));
        assert!(queue.has_work_for(3));

        queue.push_ready(task(WorkerAffinity::worker(3).union(WorkerAffinity::worker(1))));
        assert!(queue.has_work_for(1));
        assert!(queue.take_for_worker(1).is_some());
        assert!(queue.take_for_worker(1).is_none());
        assert!(!queue.has_work_for(1));
        assert!(queue.has_work_for(3));
    }

    #[test]
    fn test_park_and_wake_all() {
        let mut queue = RunQueue::new();
        let lock = 0u8;
        let key = SyncKey::of(&lock);
        for _ in 0..3 {
            queue.park(key, task(WorkerAffinity::ALL));
        }
        assert_eq!(queue.blocked_len(), 3);

        let woken = queue.wake(key, None);
        assert_eq!(woken, WorkerAffinity::ALL);
        assert_eq!(queue.blocked_len(), 0);
        assert_eq!(queue.ready_len(), 3);
    }

    #[test]
    fn test_wake_limit_is_fifo() {
        let mut queue = RunQueue::new();
        let cond = 0u8;
        let key = SyncKey::of(&cond);
        let first = task(WorkerAffinity::worker(1));
        let id = first.id();
        queue.park(key, first);
        queue.park(key, task(WorkerAffinity::worker(2)));

        let woken = queue.wake(key, Some(1));
        assert_eq!(woken, WorkerAffinity::worker(1));
        assert_eq!(queue.blocked_len(), 1);
        assert_eq!(queue.take_for_worker(1).unwrap().id(), id);
    }

    #[test]
    fn test_wake_unknown_key() {
        let mut queue = RunQueue::new();
        let other = 0u8;
        assert!(queue.wake(SyncKey::of(&other), None).is_empty());
        assert!(queue.ready_is_empty());
    }

    #[test]
    fn test_wake_only_matching_key() {
        let mut queue = RunQueue::new();
        let (a, b) = (0u8, 0u8);
        queue.park(SyncKey::of(&a), task(WorkerAffinity::ALL));
        queue.park(SyncKey::of(&b), task(WorkerAffinity::ALL));

        queue.wake(SyncKey::of(&a), None);
        assert_eq!(queue.ready_len(), 1);
        assert_eq!(queue.blocked_len(), 1);
    }

    #[test]
    fn test_live_count() {
        let mut queue = RunQueue::new();
        queue.add_live();
        queue.add_live();
        assert!(!queue.remove_live());
        assert!(queue.remove_live());
        assert_eq!(queue.live(), 0);
    }

    #[test]
    fn test_drain_takes_everything() {
        let mut queue = RunQueue::new();
        let cond = 0u8;
        queue.push_ready(task(WorkerAffinity::ALL));
        queue.park(SyncKey::of(&cond), task(WorkerAffinity::ALL));
        assert_eq!(queue.drain().len(), 2);
        assert!(queue.ready_is_empty());
        assert_eq!(queue.blocked_len(), 0);
        assert!(!queue.has_work_for(1));
    }
}
