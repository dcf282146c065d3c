//! The read side of a promise: inspection, subscription and transformation.
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::dispatch::Dispatch;
use crate::source::{Core, Producer};

/// A shared, read-only handle on a source. Cloning is cheap and every clone
/// observes the same single settlement.
///
/// Handlers registered through any method of any clone run once, in the
/// order they were registered, on the context chosen by the source's
/// [`Dispatch`] policy.
pub struct Promise<T, E> {
    core: Arc<Core<T, E>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Promise").field(&*self.core).finish()
    }
}

/// Producer of a transformation's output. Dropped by an unwinding
/// transform, it leaves the derived promise pending for good.
struct TransformOutput<T, E>(Producer<T, E>)
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static;

impl<T, E> Drop for TransformOutput<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn drop(&mut self) {
        if std::thread::panicking() && !self.0.is_settled() {
            tracing::warn!(
                dispatch = ?self.0.promise().dispatch(),
                "promise transform panicked; the derived promise stays pending"
            );
        }
    }
}

impl<T, E> From<Result<T, E>> for Promise<T, E> {
    fn from(result: Result<T, E>) -> Self {
        Self::from_core(Arc::new(Core::settled(result)))
    }
}

impl<T, E> Promise<T, E> {
    pub(crate) fn from_core(core: Arc<Core<T, E>>) -> Self {
        Self { core }
    }

    /// An already fulfilled promise.
    pub fn resolved(value: T) -> Self {
        Self::from_core(Arc::new(Core::settled(Ok(value))))
    }

    /// An already failed promise.
    pub fn rejected(error: E) -> Self {
        Self::from_core(Arc::new(Core::settled(Err(error))))
    }

    pub fn dispatch(&self) -> &Dispatch {
        self.core.dispatch()
    }

    pub fn is_pending(&self) -> bool {
        self.core.is_pending()
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// The value, if the promise has already been fulfilled.
    pub fn value(&self) -> Option<T> {
        self.core.result().and_then(Result::ok)
    }

    /// The error, if the promise has already failed.
    pub fn error(&self) -> Option<E> {
        self.core.result().and_then(Result::err)
    }

    pub fn result(&self) -> Option<Result<T, E>> {
        self.core.result()
    }

    pub fn on_success<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.core.subscribe(Box::new(move |result| {
            if let Ok(value) = result {
                handler(value);
            }
        }));
        self
    }

    pub fn on_failure<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(E) + Send + 'static,
    {
        self.core.subscribe(Box::new(move |result| {
            if let Err(error) = result {
                handler(error);
            }
        }));
        self
    }

    pub fn on_settled<F>(&self, handler: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.core.subscribe(Box::new(move |_| handler()));
        self
    }

    pub fn on_settled_result<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(Result<T, E>) + Send + 'static,
    {
        self.core.subscribe(Box::new(handler));
        self
    }

    /// Mirrors this promise through a new source using `dispatch`, so every
    /// handler registered on the returned promise runs under that policy.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_dispatch::{Dispatch, ManualQueue, Promise};
    /// use std::sync::Arc;
    ///
    /// let queue = Arc::new(ManualQueue::new("ui"));
    /// let retargeted = Promise::<u8, ()>::resolved(1).dispatch_on(Dispatch::on(queue.clone()));
    /// assert!(retargeted.is_pending());
    /// queue.run_pending();
    /// assert_eq!(retargeted.value(), Some(1));
    /// ```
    pub fn dispatch_on(&self, dispatch: Dispatch) -> Promise<T, E> {
        let (producer, promise) = Producer::derived(dispatch);
        self.core.subscribe(Box::new(move |result| {
            producer.settle(result);
        }));
        promise
    }

    /// Derives a promise holding `transform` of the value; failures pass
    /// through unchanged. The step runs under this promise's policy.
    ///
    /// A transform that panics is caught like any other callback, but the
    /// derived promise then stays pending forever. A warning is logged when
    /// that happens; use [`try_map`](Self::try_map) for fallible steps.
    pub fn map<U, F>(&self, transform: F) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.map_result(move |result| result.map(transform))
    }

    /// Like [`map`](Self::map) for a transform that can fail; an `Err`
    /// rejects the returned promise.
    pub fn try_map<U, F>(&self, transform: F) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U, E> + Send + 'static,
    {
        self.map_result(move |result| result.and_then(transform))
    }

    /// Chains a promise-returning step; the returned promise settles with
    /// the inner promise.
    pub fn flat_map<U, F>(&self, transform: F) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<U, E> + Send + 'static,
    {
        self.flat_map_result(move |result| match result {
            Ok(value) => transform(value),
            Err(error) => Promise::rejected(error),
        })
    }

    pub fn map_err<E2, F>(&self, transform: F) -> Promise<T, E2>
    where
        E2: Clone + Send + 'static,
        F: FnOnce(E) -> E2 + Send + 'static,
    {
        self.map_result(move |result| result.map_err(transform))
    }

    /// Recovers from a failure with another promise, which may use a
    /// different error type.
    pub fn flat_map_err<E2, F>(&self, transform: F) -> Promise<T, E2>
    where
        E2: Clone + Send + 'static,
        F: FnOnce(E) -> Promise<T, E2> + Send + 'static,
    {
        self.flat_map_result(move |result| match result {
            Ok(value) => Promise::resolved(value),
            Err(error) => transform(error),
        })
    }

    pub fn map_result<U, E2, F>(&self, transform: F) -> Promise<U, E2>
    where
        U: Clone + Send + 'static,
        E2: Clone + Send + 'static,
        F: FnOnce(Result<T, E>) -> Result<U, E2> + Send + 'static,
    {
        let (producer, promise) = Producer::derived(self.dispatch().clone());
        let output = TransformOutput(producer);
        self.core.subscribe(Box::new(move |result| {
            output.0.settle(transform(result));
        }));
        promise
    }

    pub fn flat_map_result<U, E2, F>(&self, transform: F) -> Promise<U, E2>
    where
        U: Clone + Send + 'static,
        E2: Clone + Send + 'static,
        F: FnOnce(Result<T, E>) -> Promise<U, E2> + Send + 'static,
    {
        let (producer, promise) = Producer::derived(self.dispatch().clone());
        let output = TransformOutput(producer);
        self.core.subscribe(Box::new(move |result| {
            transform(result).core.subscribe(Box::new(move |inner| {
                output.0.settle(inner);
            }));
        }));
        promise
    }

    /// A future that completes with the settlement. Equivalent to
    /// `.into_future()`.
    pub fn settled(&self) -> Settled<T, E> {
        Settled {
            core: self.core.clone(),
            slot: None,
        }
    }
}

impl<T, E> IntoFuture for Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Output = Result<T, E>;
    type IntoFuture = Settled<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        Settled {
            core: self.core,
            slot: None,
        }
    }
}

struct Slot<T, E> {
    result: Option<Result<T, E>>,
    waker: Option<Waker>,
}

/// Future returned by awaiting a [`Promise`].
///
/// The waker is signalled from the settling thread directly, not through
/// the dispatch policy, so awaiting never depends on a queue the awaiting
/// thread would itself have to drain.
pub struct Settled<T, E> {
    core: Arc<Core<T, E>>,
    slot: Option<Arc<Mutex<Slot<T, E>>>>,
}

impl<T, E> Future for Settled<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(slot) = &this.slot {
            let mut slot = slot.lock();
            return match slot.result.take() {
                Some(result) => Poll::Ready(result),
                None => {
                    slot.waker = Some(cx.waker().clone());
                    Poll::Pending
                }
            };
        }
        if let Some(result) = this.core.result() {
            return Poll::Ready(result);
        }
        let slot = Arc::new(Mutex::new(Slot {
            result: None,
            waker: Some(cx.waker().clone()),
        }));
        let filler = slot.clone();
        this.core.subscribe_inline(Box::new(move |result| {
            let waker = {
                let mut slot = filler.lock();
                slot.result = Some(result);
                slot.waker.take()
            };
            if let Some(waker) = waker {
                waker.wake();
            }
        }));
        let ready = slot.lock().result.take();
        match ready {
            Some(result) => Poll::Ready(result),
            None => {
                this.slot = Some(slot);
                Poll::Pending
            }
        }
    }
}
