//! Integration tests for promises, futures and their combinators running
//! across real worker threads
//!
//! # Running Tests
//! ```bash
//! cargo test -p strand --test future_integration
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strand::this_task;
use strand::{
    make_ready_future, run, spawn, when_all, when_any, Promise, SchedulerConfig, TaskError,
};

fn config(workers: usize) -> SchedulerConfig {
    SchedulerConfig::new().worker_count(workers)
}

// ===== Promise / Future =====

#[test]
fn test_value_crosses_tasks() {
    let value = run(config(2), || {
        let promise = Arc::new(Promise::new());
        let future = promise.get_future().unwrap();
        let producer = promise.clone();
        spawn(move || {
            this_task::yield_now();
            producer.set_value(String::from("hello")).unwrap();
        })
        .unwrap();
        future.into_value()
    })
    .unwrap();
    assert_eq!(value.unwrap(), "hello");
}

#[test]
fn test_single_assignment_across_tasks() {
    let outcomes = run(config(4), || {
        let promise = Arc::new(Promise::new());
        let future = promise.get_future().unwrap();
        let racers: Vec<_> = (0..8)
            .map(|i| {
                let promise = promise.clone();
                spawn(move || promise.set_value(i).is_ok()).unwrap()
            })
            .collect();
        let winners = racers
            .into_iter()
            .filter(|racer| racer.get().unwrap())
            .count();
        (winners, future.get().unwrap())
    })
    .unwrap();
    assert_eq!(outcomes.0, 1);
    assert!((0..8).contains(&outcomes.1));
}

#[test]
fn test_get_is_repeatable() {
    let values = run(config(2), || {
        let future = spawn(|| vec![1, 2, 3]).unwrap();
        let first = future.get().unwrap();
        let second = future.get().unwrap();
        (first, second)
    })
    .unwrap();
    assert_eq!(values.0, vec![1, 2, 3]);
    assert_eq!(values.0, values.1);
}

#[test]
fn test_second_get_future_fails() {
    let promise = Promise::<u8>::new();
    assert!(promise.get_future().is_ok());
    assert!(matches!(promise.get_future(), Err(TaskError::FutureAlreadyRetrieved)));
}

#[test]
fn test_dropped_promise_breaks_waiter() {
    let outcome = run(config(2), || {
        let promise = Promise::<i32>::new();
        let future = promise.get_future().unwrap();
        spawn(move || {
            this_task::yield_now();
            drop(promise);
        })
        .unwrap();
        future.into_value()
    })
    .unwrap();
    assert!(matches!(outcome, Err(TaskError::BrokenPromise)));
}

#[test]
fn test_exception_reaches_every_reader() {
    let messages = run(config(2), || {
        let promise = Promise::<i32>::new();
        let future = promise.get_future().unwrap();
        promise.set_exception(anyhow::anyhow!("disk full")).unwrap();
        let first = future.get().unwrap_err().to_string();
        let second = future.get().unwrap_err().to_string();
        (first, second)
    })
    .unwrap();
    assert!(messages.0.contains("disk full"));
    assert_eq!(messages.0, messages.1);
}

#[test]
fn test_value_at_task_exit_waits_for_exit() {
    let observed = run(config(2), || {
        let finished = Arc::new(AtomicBool::new(false));
        let promise = Promise::new();
        let future = promise.get_future().unwrap();

        let flag = finished.clone();
        spawn(move || {
            promise.set_value_at_task_exit(7).unwrap();
            assert!(promise.is_satisfied());
            for _ in 0..10 {
                this_task::yield_now();
            }
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

        let value = future.get().unwrap();
        (value, finished.load(Ordering::SeqCst))
    })
    .unwrap();
    assert_eq!(observed, (7, true));
}

#[test]
fn test_value_at_task_exit_readable_after_producer_returns() {
    let value = run(config(2), || {
        let producer = spawn(|| {
            let promise = Promise::new();
            let future = promise.get_future().unwrap();
            promise.set_value_at_task_exit(11).unwrap();
            // The readiness flag is atomic; waiting here would deadlock
            assert!(!future.is_ready());
            future
        })
        .unwrap();
        let future = producer.into_value().unwrap();
        future.into_value().unwrap()
    })
    .unwrap();
    assert_eq!(value, 11);
}

#[test]
fn test_then_chain() {
    let value = run(config(3), || {
        spawn(|| 2)
            .unwrap()
            .then(|f| f.into_value().unwrap() * 10)
            .then(|f| f.into_value().unwrap() + 1)
            .into_value()
            .unwrap()
    })
    .unwrap();
    assert_eq!(value, 21);
}

// ===== Combinators =====

#[test]
fn test_when_all_keeps_failures() {
    let results = run(config(3), || {
        let inputs = vec![
            spawn(|| 1).unwrap(),
            spawn(|| -> i32 { panic!("bad input") }).unwrap(),
            make_ready_future(3),
        ];
        when_all(inputs)
            .into_value()
            .unwrap()
            .into_iter()
            .map(|f| f.into_value().ok())
            .collect::<Vec<_>>()
    })
    .unwrap();
    assert_eq!(results, vec![Some(1), None, Some(3)]);
}

#[test]
fn test_when_any_picks_ready_input() {
    let (index, late) = run(config(2), || {
        let first = Promise::<i32>::new();
        let second = Promise::<i32>::new();
        let inputs = vec![
            first.get_future().unwrap(),
            second.get_future().unwrap(),
            spawn(|| 42).unwrap(),
        ];

        let any = when_any(inputs).into_value().unwrap();
        let index = any.index;
        assert_eq!(any.futures[2].get().unwrap(), 42);
        assert!(!any.futures[0].is_ready());
        assert!(!any.futures[1].is_ready());

        // The losers can still complete and be read afterwards
        first.set_value(5).unwrap();
        second.set_value(6).unwrap();
        let late = (any.futures[0].get().unwrap(), any.futures[1].get().unwrap());
        (index, late)
    })
    .unwrap();
    assert_eq!(index, Some(2));
    assert_eq!(late, (5, 6));
}

#[test]
fn test_when_any_empty_input() {
    let any = when_any(Vec::<strand::Future<i32>>::new());
    assert!(any.is_ready());
    let any = any.into_value().unwrap();
    assert_eq!(any.index, None);
    assert!(any.futures.is_empty());
}

// ===== this_task =====

#[test]
fn test_spawn_and_wait_returns_result() {
    let value = run(config(2), || {
        let before = this_task::task_id();
        let value = this_task::spawn_and_wait(|| this_task::task_id()).unwrap();
        assert_ne!(value, before);
        this_task::spawn_and_wait(|| 6 * 7).unwrap()
    })
    .unwrap();
    assert_eq!(value, 42);
}

#[test]
fn test_spawn_and_wait_propagates_panic() {
    let outcome = run(config(2), || this_task::spawn_and_wait(|| -> u8 { panic!("helper failed") })).unwrap();
    assert!(matches!(outcome, Err(TaskError::Panicked(msg)) if msg == "helper failed"));
}
