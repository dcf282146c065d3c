//! Single-settlement promises with per-source callback dispatch.
//!
//! A [`Producer`] owns the write side of a promise and settles it exactly
//! once, with either a value or an error. Any number of [`Promise`] handles
//! can subscribe to that settlement, before or after it happens, and derive
//! new promises from it with [`Promise::map`], [`Promise::flat_map`] and
//! friends, or join several of them with the functions in [`combinators`].
//!
//! Every source carries a [`Dispatch`] policy that decides where its
//! callbacks run: inline, on a named [`Executor`], or on the installed
//! [`MainContext`] when triggered from elsewhere.
//!
//! # Examples
//!
//! ```
//! use promise_dispatch::{Dispatch, Producer};
//! use futures::executor::block_on;
//! use std::thread;
//!
//! let (producer, promise) = Producer::<u32, String>::with_dispatch(Dispatch::Synchronous);
//! let doubled = promise.map(|value| value * 2);
//!
//! let task = thread::spawn(move || producer.resolve(21));
//! assert_eq!(block_on(doubled.settled()), Ok(42));
//! task.join().expect("The task thread has panicked");
//! ```

pub mod combinators;
pub mod dispatch;
pub mod promise;
pub mod queue;
pub mod source;

pub use combinators::{
    flatten, when_all, when_all_finalized, when_any, when_any_finalized, when_both, when_either,
};
pub use dispatch::{
    clear_main_context, install_main_context, main_context, Dispatch, Executor, Job, MainContext,
};
pub use promise::{Promise, Settled};
pub use queue::{ManualQueue, SerialQueue};
pub use source::{Producer, SourceOptions};

/// Errors raised by the execution plumbing. Promise failures never show up
/// here; they travel through the `Err` side of the promise itself.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("executor `{label}` is closed and no longer accepts jobs")]
    ExecutorClosed { label: String },
    #[error("failed to spawn the worker thread for `{label}`")]
    Spawn {
        label: String,
        #[source]
        source: std::io::Error,
    },
}
