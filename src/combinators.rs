//! Joining and racing promises.
//!
//! Every combinator allocates exactly one new source with the default
//! dispatch policy and attaches a listener to each input. Inputs are never
//! modified. Listeners of different inputs may run at the same time on
//! different threads, so the shared bookkeeping is either atomic or behind
//! a lock.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::dispatch::Dispatch;
use crate::promise::Promise;
use crate::source::Producer;

/// Unwraps a promise of a promise.
pub fn flatten<T, E>(promise: &Promise<Promise<T, E>, E>) -> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    promise.flat_map(|inner| inner)
}

/// Fulfills with both values once both inputs succeed; fails with the first
/// failure observed.
///
/// # Examples
///
/// ```
/// use promise_dispatch::{when_both, Promise};
///
/// let both = when_both(&Promise::<_, ()>::resolved(1), &Promise::resolved("a"));
/// assert_eq!(both.value(), Some((1, "a")));
/// ```
pub fn when_both<A, B, E>(first: &Promise<A, E>, second: &Promise<B, E>) -> Promise<(A, B), E>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    let (producer, promise) = Producer::derived(Dispatch::default());
    let pair: Arc<Mutex<(Option<A>, Option<B>)>> = Arc::new(Mutex::new((None, None)));

    let (left, left_pair) = (producer.clone(), pair.clone());
    first.on_settled_result(move |result| match result {
        Ok(a) => {
            let both = {
                let mut pair = left_pair.lock();
                pair.0 = Some(a);
                take_both(&mut pair)
            };
            if let Some(both) = both {
                left.resolve(both);
            }
        }
        Err(error) => {
            left.reject(error);
        }
    });

    second.on_settled_result(move |result| match result {
        Ok(b) => {
            let both = {
                let mut pair = pair.lock();
                pair.1 = Some(b);
                take_both(&mut pair)
            };
            if let Some(both) = both {
                producer.resolve(both);
            }
        }
        Err(error) => {
            producer.reject(error);
        }
    });
    promise
}

fn take_both<A, B>(pair: &mut (Option<A>, Option<B>)) -> Option<(A, B)> {
    if pair.0.is_some() && pair.1.is_some() {
        pair.0.take().zip(pair.1.take())
    } else {
        None
    }
}

struct Gather<T> {
    values: Vec<Option<T>>,
    remaining: usize,
}

/// Fulfills with every value, in input order, once all inputs succeed.
/// Fails with the first failure observed. No inputs fulfill immediately with
/// an empty vector.
pub fn when_all<T, E, I>(promises: I) -> Promise<Vec<T>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    I: IntoIterator<Item = Promise<T, E>>,
{
    let promises: Vec<_> = promises.into_iter().collect();
    let (producer, promise) = Producer::derived(Dispatch::default());
    if promises.is_empty() {
        producer.resolve(Vec::new());
        return promise;
    }

    let gather = Arc::new(Mutex::new(Gather {
        values: promises.iter().map(|_| None).collect(),
        remaining: promises.len(),
    }));
    for (index, input) in promises.iter().enumerate() {
        let (producer, gather) = (producer.clone(), gather.clone());
        input.on_settled_result(move |result| match result {
            Ok(value) => {
                let complete = {
                    let mut gather = gather.lock();
                    gather.values[index] = Some(value);
                    gather.remaining -= 1;
                    if gather.remaining == 0 {
                        Some(gather.values.drain(..).flatten().collect::<Vec<_>>())
                    } else {
                        None
                    }
                };
                if let Some(values) = complete {
                    producer.resolve(values);
                }
            }
            Err(error) => {
                producer.reject(error);
            }
        });
    }
    promise
}

/// Fulfills with the first value produced by any input. Fails only once all
/// inputs failed, with the last failure observed.
///
/// With no inputs the returned promise never settles.
pub fn when_any<T, E, I>(promises: I) -> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    I: IntoIterator<Item = Promise<T, E>>,
{
    let promises: Vec<_> = promises.into_iter().collect();
    let (producer, promise) = Producer::derived(Dispatch::default());
    let remaining = Arc::new(AtomicUsize::new(promises.len()));
    for input in &promises {
        let (producer, remaining) = (producer.clone(), remaining.clone());
        input.on_settled_result(move |result| match result {
            Ok(value) => {
                producer.resolve(value);
            }
            Err(error) => {
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    producer.reject(error);
                }
            }
        });
    }
    promise
}

/// [`when_any`] for two promises.
pub fn when_either<T, E>(first: &Promise<T, E>, second: &Promise<T, E>) -> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    when_any([first.clone(), second.clone()])
}

/// Fulfills once every input has settled, whichever way. Never fails. No
/// inputs fulfill immediately.
pub fn when_all_finalized<T, E, I>(promises: I) -> Promise<(), E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    I: IntoIterator<Item = Promise<T, E>>,
{
    let promises: Vec<_> = promises.into_iter().collect();
    let (producer, promise) = Producer::derived(Dispatch::default());
    if promises.is_empty() {
        producer.resolve(());
        return promise;
    }

    let remaining = Arc::new(AtomicUsize::new(promises.len()));
    for input in &promises {
        let (producer, remaining) = (producer.clone(), remaining.clone());
        input.on_settled(move || {
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                producer.resolve(());
            }
        });
    }
    promise
}

/// Fulfills as soon as any input settles, whichever way. Never fails.
///
/// With no inputs the returned promise never settles.
pub fn when_any_finalized<T, E, I>(promises: I) -> Promise<(), E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    I: IntoIterator<Item = Promise<T, E>>,
{
    let (producer, promise) = Producer::derived(Dispatch::default());
    for input in promises {
        let producer = producer.clone();
        input.on_settled(move || {
            producer.resolve(());
        });
    }
    promise
}
