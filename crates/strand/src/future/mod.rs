//! Promises, futures and combinators
//!
//! A [`Promise`] and its [`Future`] share one associated state: a
//! single-assignment slot plus a ready flag. Waiting on a future parks the
//! task on the state's condition variable, so a worker is never blocked by
//! a task waiting for a result.

mod combinators;
#[allow(clippy::module_inception)]
mod future;
mod promise;
mod state;

pub use combinators::{when_all, when_any, WhenAny};
pub use future::{make_ready_future, Future};
pub use promise::Promise;
