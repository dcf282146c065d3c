//! The write side of a promise.
//!
//! A `Producer` and all of its `Promise` handles share one `Core`: a
//! one-shot state cell plus the list of callbacks waiting for it. The core
//! moves from pending to settled at most once. Callbacks are collected under
//! the lock and always invoked after it is released, so a callback may
//! subscribe to, or settle, any promise including its own.
//!
//! Between the transition and the last pending callback being handed off the
//! core is draining: late subscribers join the back of the queue instead of
//! overtaking callbacks registered before them.
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::dispatch::Dispatch;
use crate::promise::Promise;

pub(crate) type Callback<T, E> = Box<dyn FnOnce(Result<T, E>) + Send + 'static>;

enum State<T, E> {
    Pending(Vec<Callback<T, E>>),
    Draining(Result<T, E>, VecDeque<Callback<T, E>>),
    Settled(Result<T, E>),
}

pub(crate) struct Core<T, E> {
    state: Mutex<State<T, E>>,
    dispatch: Dispatch,
    warn_on_abandonment: bool,
    producers: AtomicUsize,
}

impl<T, E> Core<T, E> {
    fn pending(options: SourceOptions) -> Self {
        Self {
            state: Mutex::new(State::Pending(Vec::new())),
            dispatch: options.dispatch,
            warn_on_abandonment: options.warn_on_abandonment,
            producers: AtomicUsize::new(0),
        }
    }

    pub(crate) fn settled(result: Result<T, E>) -> Self {
        Self {
            state: Mutex::new(State::Settled(result)),
            dispatch: Dispatch::default(),
            warn_on_abandonment: false,
            producers: AtomicUsize::new(0),
        }
    }

    pub(crate) fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    pub(crate) fn is_pending(&self) -> bool {
        matches!(*self.state.lock(), State::Pending(_))
    }

    fn pending_callbacks(&self) -> usize {
        match &*self.state.lock() {
            State::Pending(callbacks) => callbacks.len(),
            State::Draining(..) | State::Settled(_) => 0,
        }
    }
}

impl<T, E> Core<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub(crate) fn result(&self) -> Option<Result<T, E>> {
        match &*self.state.lock() {
            State::Pending(_) => None,
            State::Draining(result, _) | State::Settled(result) => Some(result.clone()),
        }
    }

    /// First call wins; returns whether this call settled the core.
    pub(crate) fn settle(&self, result: Result<T, E>) -> bool {
        {
            let mut state = self.state.lock();
            let State::Pending(callbacks) = &mut *state else {
                tracing::trace!("ignoring settlement of an already settled promise");
                return false;
            };
            tracing::trace!(ok = result.is_ok(), callbacks = callbacks.len(), "promise settled");
            let queue = VecDeque::from(std::mem::take(callbacks));
            *state = State::Draining(result, queue);
        }
        self.drain();
        true
    }

    /// Hands queued callbacks off one at a time, outside the lock, until the
    /// queue is empty. Only the settling thread runs this.
    fn drain(&self) {
        loop {
            let (callback, result) = {
                let mut state = self.state.lock();
                let State::Draining(result, queue) = &mut *state else {
                    return;
                };
                match queue.pop_front() {
                    Some(callback) => (callback, result.clone()),
                    None => {
                        let settled = result.clone();
                        *state = State::Settled(settled);
                        return;
                    }
                }
            };
            callback(result);
        }
    }

    /// Registers a callback that runs through this core's dispatch policy.
    pub(crate) fn subscribe(&self, callback: Callback<T, E>) {
        let dispatch = self.dispatch.clone();
        self.subscribe_inline(Box::new(move |result| {
            dispatch.run(Box::new(move || callback(result)));
        }));
    }

    /// Registers a callback that runs on the settling (or subscribing)
    /// thread, bypassing the policy. Only for wakers.
    pub(crate) fn subscribe_inline(&self, callback: Callback<T, E>) {
        let result = {
            let mut state = self.state.lock();
            match &mut *state {
                State::Pending(callbacks) => {
                    callbacks.push(callback);
                    return;
                }
                State::Draining(_, queue) => {
                    queue.push_back(callback);
                    return;
                }
                State::Settled(result) => result.clone(),
            }
        };
        callback(result);
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Core<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Core");
        match &*self.state.lock() {
            State::Pending(callbacks) => out.field("pending_callbacks", &callbacks.len()),
            State::Draining(result, _) | State::Settled(result) => out.field("settled", result),
        };
        out.field("dispatch", &self.dispatch).finish()
    }
}

/// How a new source behaves.
#[derive(Clone, Debug)]
pub struct SourceOptions {
    dispatch: Dispatch,
    warn_on_abandonment: bool,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            dispatch: Dispatch::Unspecified,
            warn_on_abandonment: true,
        }
    }
}

impl SourceOptions {
    pub fn dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Log a warning when the last producer is dropped before settling.
    pub fn warn_on_abandonment(mut self, warn: bool) -> Self {
        self.warn_on_abandonment = warn;
        self
    }
}

/// The single-writer side of a promise. Clones share the same source; the
/// first `resolve`/`reject` across all of them wins and the rest are ignored.
///
/// # Examples
///
/// ```
/// use promise_dispatch::Producer;
/// use futures::executor::block_on;
/// use std::thread;
/// let (producer, promise) = Producer::<String, String>::new();
/// let consumer = promise.clone();
///
/// let task1 = thread::spawn(move || block_on(async {
///     println!("Received {:?}", consumer.await);
/// }));
/// producer.resolve("🍓".into());
/// producer.reject("too late".into());
/// task1.join().expect("The task1 thread has panicked.");
/// assert_eq!(promise.value().as_deref(), Some("🍓"));
/// ```
#[derive(Debug)]
pub struct Producer<T, E> {
    core: Arc<Core<T, E>>,
}

impl<T, E> Producer<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// A pending source with the default policy that warns when abandoned.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (Self, Promise<T, E>) {
        Self::with_options(SourceOptions::default())
    }

    /// A pending source whose callbacks run according to `dispatch`.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_dispatch::{Dispatch, ManualQueue, Producer};
    /// use std::sync::Arc;
    ///
    /// let queue = Arc::new(ManualQueue::new("ui"));
    /// let (producer, promise) = Producer::<u8, ()>::with_dispatch(Dispatch::on(queue.clone()));
    /// let doubled = promise.map(|value| value * 2);
    ///
    /// producer.resolve(4);
    /// assert!(doubled.is_pending());
    /// queue.run_pending();
    /// assert_eq!(doubled.value(), Some(8));
    /// ```
    pub fn with_dispatch(dispatch: Dispatch) -> (Self, Promise<T, E>) {
        Self::with_options(SourceOptions::default().dispatch(dispatch))
    }

    /// A pending source configured by `options`, for callers that also want
    /// to silence the abandonment warning.
    ///
    /// ```
    /// use promise_dispatch::{Dispatch, Producer, SourceOptions};
    ///
    /// let options = SourceOptions::default()
    ///     .dispatch(Dispatch::Synchronous)
    ///     .warn_on_abandonment(false);
    /// let (producer, promise) = Producer::<(), ()>::with_options(options);
    /// drop(producer);
    /// assert!(promise.is_pending());
    /// ```
    pub fn with_options(options: SourceOptions) -> (Self, Promise<T, E>) {
        let producer = Self::from_core(Arc::new(Core::pending(options)));
        let promise = producer.promise();
        (producer, promise)
    }

    /// Source backing a transformation or combinator; it never warns, the
    /// abandoned upstream source already does.
    pub(crate) fn derived(dispatch: Dispatch) -> (Self, Promise<T, E>) {
        Self::with_options(SourceOptions::default().dispatch(dispatch).warn_on_abandonment(false))
    }

    fn from_core(core: Arc<Core<T, E>>) -> Self {
        core.producers.fetch_add(1, Ordering::Relaxed);
        Self { core }
    }

    /// Another read handle on this source.
    pub fn promise(&self) -> Promise<T, E> {
        Promise::from_core(self.core.clone())
    }

    /// Settles with `value`. Returns `false`, doing nothing, if the source
    /// was already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.core.settle(Ok(value))
    }

    /// Settles with `error`. Returns `false`, doing nothing, if the source
    /// was already settled.
    pub fn reject(&self, error: E) -> bool {
        self.core.settle(Err(error))
    }

    /// Settles with either side of `result`, as [`resolve`](Self::resolve)
    /// or [`reject`](Self::reject) would.
    pub fn settle(&self, result: Result<T, E>) -> bool {
        self.core.settle(result)
    }

    /// Whether any producer of this source has settled it already.
    pub fn is_settled(&self) -> bool {
        !self.core.is_pending()
    }
}

impl<T, E> Clone for Producer<T, E> {
    fn clone(&self) -> Self {
        self.core.producers.fetch_add(1, Ordering::Relaxed);
        Self {
            core: self.core.clone(),
        }
    }
}

impl<T, E> Drop for Producer<T, E> {
    /// Nothing can settle the source once its last producer is gone.
    fn drop(&mut self) {
        if self.core.producers.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        if self.core.warn_on_abandonment && self.core.is_pending() {
            tracing::warn!(
                pending_callbacks = self.core.pending_callbacks(),
                dispatch = ?self.core.dispatch,
                "promise producer dropped before settling; its promise can never settle"
            );
        }
    }
}
