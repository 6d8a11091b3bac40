//! Combinators over sets of futures

use crate::future::future::Future;
use crate::future::promise::Promise;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Result of [`when_any`]: the winning index and every input future
#[derive(Debug)]
pub struct WhenAny<T> {
    /// Index of the first future seen ready; `None` for an empty input
    pub index: Option<usize>,
    /// The input futures, in input order
    pub futures: Vec<Future<T>>,
}

struct AllState<T> {
    remaining: AtomicUsize,
    futures: Mutex<Option<Vec<Future<T>>>>,
    promise: Promise<Vec<Future<T>>>,
}

impl<T> AllState<T> {
    fn arrive(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Some(futures) = self.futures.lock().take() {
                let _ = self.promise.set_value(futures);
            }
        }
    }
}

/// Future that becomes ready once every input is ready
///
/// The result hands back the inputs in their original order; each is ready
/// and may hold either a value or a failure. An empty input completes
/// immediately.
pub fn when_all<T, I>(futures: I) -> Future<Vec<Future<T>>>
where
    T: Send + 'static,
    I: IntoIterator<Item = Future<T>>,
{
    let futures: Vec<Future<T>> = futures.into_iter().collect();
    let (promise, output) = Promise::with_future();
    if futures.is_empty() {
        let _ = promise.set_value(futures);
        return output;
    }

    let hooks: Vec<Future<T>> = futures.iter().map(Future::share_state).collect();
    let shared = Arc::new(AllState {
        remaining: AtomicUsize::new(futures.len()),
        futures: Mutex::new(Some(futures)),
        promise,
    });
    for hook in hooks {
        let shared = shared.clone();
        hook.on_ready(Box::new(move || shared.arrive()));
    }
    output
}

struct AnyState<T> {
    decided: AtomicBool,
    futures: Mutex<Option<Vec<Future<T>>>>,
    promise: Promise<WhenAny<T>>,
}

impl<T> AnyState<T> {
    fn arrive(&self, index: usize) {
        if self.decided.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(futures) = self.futures.lock().take() {
            let _ = self.promise.set_value(WhenAny {
                index: Some(index),
                futures,
            });
        }
    }
}

/// Future that becomes ready with the first input to become ready
///
/// Exactly one input wins. All inputs are handed back, so the others can
/// still be waited on. An empty input completes immediately with no index.
pub fn when_any<T, I>(futures: I) -> Future<WhenAny<T>>
where
    T: Send + 'static,
    I: IntoIterator<Item = Future<T>>,
{
    let futures: Vec<Future<T>> = futures.into_iter().collect();
    let (promise, output) = Promise::with_future();
    if futures.is_empty() {
        let _ = promise.set_value(WhenAny {
            index: None,
            futures,
        });
        return output;
    }

    let hooks: Vec<Future<T>> = futures.iter().map(Future::share_state).collect();
    let shared = Arc::new(AnyState {
        decided: AtomicBool::new(false),
        futures: Mutex::new(Some(futures)),
        promise,
    });
    for (index, hook) in hooks.into_iter().enumerate() {
        let shared = shared.clone();
        hook.on_ready(Box::new(move || shared.arrive(index)));
    }
    output
}
