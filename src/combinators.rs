//! Building promises from values and collections.
//!
//! Everything here is an ordinary consumer of [`Promise`] and [`Resolver`]:
//! aggregation is done by attaching continuations, never by reaching into a
//! promise's internals.
use std::sync::Arc;

use parking_lot::Mutex;

use crate::deferred::{Deferred, Resolver};
use crate::error::guard;
use crate::promise::Promise;
use crate::value::{PromiseOrValue, Settle, Value};
use crate::Reason;

/// Marks `value` as already resolved.
pub fn value<T>(value: T) -> Value<T> {
    Value::new(value)
}

/// A promise for `source`. Promises come back as they are, values are
/// wrapped in an already fulfilled promise.
pub fn resolve<S: Settle>(source: S) -> Promise<S::Output> {
    match source.into_promise_or_value() {
        PromiseOrValue::Promise(promise) => promise,
        PromiseOrValue::Value(value) => Promise::fulfilled(value.into_inner()),
    }
}

/// An already rejected promise.
pub fn reject<T: Clone + Send + 'static>(reason: impl Into<Reason>) -> Promise<T> {
    Promise::rejected(reason)
}

/// Calls `callable` right away and resolves its result. An `Err` or a panic
/// becomes a rejected promise.
pub fn resolve_with<F, S>(callable: F) -> Promise<S::Output>
where
    F: FnOnce() -> Result<S, Reason>,
    S: Settle,
{
    match guard(callable) {
        Ok(source) => resolve(source),
        Err(reason) => Promise::rejected(reason),
    }
}

/// A mapper handing every element back unchanged.
pub fn identity<T: Clone + Send + 'static>(item: T) -> Result<Value<T>, Reason> {
    Ok(Value::new(item))
}

/// Applies `mapper` to every element as soon as that element is available.
///
/// The aggregate fulfills with the mapped elements in input order once all of
/// them are done. The first rejection, from an element or from `mapper`,
/// rejects the aggregate; elements still in flight are left to finish and
/// their results are dropped. An empty input fulfills with an empty `Vec`.
///
/// ```
/// use promises::combinators::{map, value};
///
/// let plus_one = map([value(1), value(2), value(3)], |n| Ok(value(n + 1)));
/// assert_eq!(plus_one.get().unwrap(), vec![2, 3, 4]);
/// ```
pub fn map<I, F, S>(items: I, mapper: F) -> Promise<Vec<S::Output>>
where
    I: IntoIterator,
    I::Item: Settle,
    F: Fn(<I::Item as Settle>::Output) -> Result<S, Reason> + Send + Sync + 'static,
    S: Settle,
{
    let items: Vec<_> = items.into_iter().map(resolve).collect();
    if items.is_empty() {
        return Promise::fulfilled(Vec::new());
    }

    let (aggregate, resolver) = Deferred::new().split();
    let gather = Arc::new(Mutex::new(Gather::new(items.len())));
    let mapper = Arc::new(mapper);
    for (index, item) in items.into_iter().enumerate() {
        let mapper = mapper.clone();
        let gather = gather.clone();
        let resolver = resolver.clone();
        item.then(move |input| (*mapper)(input))
            .subscribe(move |outcome| match outcome {
                Ok(output) => {
                    let gathered = gather.lock().put(index, output);
                    if let Some(outputs) = gathered {
                        resolver.resolve(outputs);
                    }
                }
                Err(reason) => resolver.reject(reason),
            });
    }
    aggregate
}

struct Gather<T> {
    slots: Vec<Option<T>>,
    remaining: usize,
}

impl<T> Gather<T> {
    fn new(len: usize) -> Self {
        Gather {
            slots: (0..len).map(|_| None).collect(),
            remaining: len,
        }
    }

    /// Stores one output. Hands back all of them once the last one arrives.
    fn put(&mut self, index: usize, output: T) -> Option<Vec<T>> {
        self.slots[index] = Some(output);
        self.remaining -= 1;
        if self.remaining > 0 {
            return None;
        }
        Some(self.slots.drain(..).flatten().collect())
    }
}

/// Waits for every element, keeping input order. Same failure policy as
/// [`map`].
pub fn all<I>(items: I) -> Promise<Vec<<I::Item as Settle>::Output>>
where
    I: IntoIterator,
    I::Item: Settle,
{
    map(items, identity)
}

/// Folds `items` strictly left to right.
///
/// Each step waits for both the element and the promise returned by
/// `reducer` before moving on. No elements means `initial`.
///
/// ```
/// use promises::combinators::{reduce, value};
///
/// let sum = reduce([value(1), value(2), value(3)], 0, |acc, n| Ok(value(acc + n)));
/// assert_eq!(sum.get().unwrap(), 6);
/// ```
pub fn reduce<I, F, S, R>(items: I, initial: R, reducer: F) -> Promise<R>
where
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: Settle,
    R: Clone + Send + 'static,
    F: FnMut(R, <I::Item as Settle>::Output) -> Result<S, Reason> + Send + 'static,
    S: Settle<Output = R>,
{
    let (folded, resolver) = Deferred::new().split();
    Fold {
        items: items.into_iter(),
        reducer,
        resolver,
    }
    .advance(initial);
    folded
}

/// A settlement that is either known now or has to be waited for.
enum Ready<T> {
    Now(Result<T, Reason>),
    Later(Promise<T>),
}

fn ready<S: Settle>(source: S) -> Ready<S::Output> {
    match source.into_promise_or_value() {
        PromiseOrValue::Value(value) => Ready::Now(Ok(value.into_inner())),
        PromiseOrValue::Promise(promise) => match promise.peek() {
            Some(outcome) => Ready::Now(outcome),
            None => Ready::Later(promise),
        },
    }
}

/// The state of a running [`reduce`].
///
/// Settled steps are folded in a loop. A pending one takes the fold along in
/// its continuation, so the stack never grows with the number of steps.
struct Fold<It, F, R> {
    items: It,
    reducer: F,
    resolver: Resolver<R>,
}

impl<It, F, S, R> Fold<It, F, R>
where
    It: Iterator + Send + 'static,
    It::Item: Settle,
    R: Clone + Send + 'static,
    F: FnMut(R, <It::Item as Settle>::Output) -> Result<S, Reason> + Send + 'static,
    S: Settle<Output = R>,
{
    fn advance(self, acc: R) {
        let (mut fold, mut acc) = (self, acc);
        loop {
            let Some(item) = fold.items.next() else {
                fold.resolver.resolve(acc);
                return;
            };
            let current = match ready(item) {
                Ready::Now(Ok(current)) => current,
                Ready::Now(Err(reason)) => return fold.resolver.reject(reason),
                Ready::Later(item) => {
                    item.subscribe(move |outcome| match outcome {
                        Ok(current) => {
                            if let Some((fold, next)) = fold.step(acc, current) {
                                fold.advance(next);
                            }
                        }
                        Err(reason) => fold.resolver.reject(reason),
                    });
                    return;
                }
            };
            match fold.step(acc, current) {
                Some((next_fold, next)) => {
                    fold = next_fold;
                    acc = next;
                }
                None => return,
            }
        }
    }

    /// Runs the reducer once. Gives the fold back with the new accumulator if
    /// that is already known; otherwise the fold carries on, or stops, from a
    /// continuation.
    fn step(mut self, acc: R, current: <It::Item as Settle>::Output) -> Option<(Self, R)> {
        let step = match guard(|| (self.reducer)(acc, current)) {
            Ok(step) => step,
            Err(reason) => {
                self.resolver.reject(reason);
                return None;
            }
        };
        match ready(step) {
            Ready::Now(Ok(next)) => Some((self, next)),
            Ready::Now(Err(reason)) => {
                self.resolver.reject(reason);
                None
            }
            Ready::Later(step) => {
                step.subscribe(move |outcome| match outcome {
                    Ok(next) => self.advance(next),
                    Err(reason) => self.resolver.reject(reason),
                });
                None
            }
        }
    }
}

/// Aggregates a fixed list of values and promises, see [`all`].
///
/// ```
/// use promises::{combinators::{resolve, value}, join};
///
/// let sum = join![value(1), resolve(value(2))].spread2(|a, b| Ok(value(a.unwrap() + b.unwrap())));
/// assert_eq!(sum.get().unwrap(), 3);
/// ```
#[macro_export]
macro_rules! join {
    ($($item:expr),* $(,)?) => {
        $crate::combinators::all(::std::vec![
            $($crate::PromiseOrValue::from($item)),*
        ])
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, Settlement};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::channel;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_resolve_returns_same_promise() {
        let promise = Promise::fulfilled(1);
        assert!(resolve(promise.clone()).ptr_eq(&promise));
        assert_eq!(resolve(value(2)).get().unwrap(), 2);
    }

    #[test]
    fn test_resolve_with_catches_errors() {
        let rejected = resolve_with(|| Err::<Value<i32>, _>(Reason::msg("nope")));
        assert!(rejected.is_rejected());
        assert_eq!(resolve_with(|| Ok(value(5))).get().unwrap(), 5);
    }

    #[test]
    fn test_map_empty() {
        let empty: Vec<Value<i32>> = Vec::new();
        assert!(map(empty, identity).get().unwrap().is_empty());
    }

    #[test]
    fn test_map_keeps_input_order() {
        let (first, first_resolver) = Deferred::<i32>::new().split();
        let mapped = map(
            vec![PromiseOrValue::from(first), value(2).into(), value(3).into()],
            |n| Ok(value(n + 1)),
        );
        assert!(mapped.is_pending());
        let task = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            first_resolver.resolve(1);
        });
        assert_eq!(mapped.get().unwrap(), vec![2, 3, 4]);
        task.join().expect("The task thread has panicked");
    }

    #[test]
    fn test_map_first_error_wins() {
        let (last, last_resolver) = Deferred::<i32>::new().split();
        let mapped = map(
            vec![value(1).into(), value(2).into(), PromiseOrValue::from(last)],
            |n| {
                if n == 2 {
                    Err(Reason::msg("two"))
                } else {
                    Ok(value(n))
                }
            },
        );
        last_resolver.resolve(3);
        match mapped.state() {
            Settlement::Rejected(reason) => assert_eq!(reason.to_string(), "two"),
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[test]
    fn test_all_mixed_sources() {
        let joined = all(vec![
            PromiseOrValue::from(Promise::fulfilled("a")),
            value("b").into(),
        ]);
        assert_eq!(joined.get().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_reduce_calls_in_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let log = calls.clone();
        let (second, second_resolver) = Deferred::<i32>::new().split();
        let sum = reduce(
            vec![value(1).into(), PromiseOrValue::from(second), value(3).into()],
            0,
            move |acc, n| {
                log.lock().push(n);
                Ok(value(acc + n))
            },
        );
        assert!(sum.is_pending());
        assert_eq!(*calls.lock(), vec![1]);
        second_resolver.resolve(2);
        assert_eq!(sum.get().unwrap(), 6);
        assert_eq!(*calls.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn test_reduce_waits_for_reducer_promise() {
        let steps = Arc::new(AtomicUsize::new(0));
        let counter = steps.clone();
        let product = reduce([value(2), value(3)], 1, move |acc, n| {
            counter.fetch_add(1, Ordering::SeqCst);
            let (step, resolver) = Deferred::new().split();
            thread::spawn(move || resolver.resolve(acc * n));
            Ok(step)
        });
        assert_eq!(product.get().unwrap(), 6);
        assert_eq!(steps.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reduce_empty_is_initial() {
        let none: Option<Value<i32>> = None;
        assert_eq!(reduce(none, 10, |acc, n| Ok(value(acc + n))).get().unwrap(), 10);
    }

    #[test]
    fn test_reduce_long_settled_chain() {
        let items: Vec<_> = (0..100_000).map(|_| value(1u64)).collect();
        assert_eq!(reduce(items, 0, |acc, n| Ok(value(acc + n))).get().unwrap(), 100_000);
    }

    #[test]
    fn test_gather_hands_back_outputs_once() {
        let mut gather = Gather::new(3);
        assert_eq!(gather.put(2, "c"), None);
        assert_eq!(gather.put(0, "a"), None);
        assert_eq!(gather.put(1, "b"), Some(vec!["a", "b", "c"]));
    }

    #[test]
    fn test_reduce_pending_elements_out_of_order() {
        let (promises, resolvers): (Vec<_>, Vec<_>) =
            (0..4).map(|_| Deferred::<i32>::new().split()).unzip();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let log = calls.clone();
        let digits = reduce(promises, 0, move |acc, n| {
            log.lock().push(n);
            Ok(value(acc * 10 + n))
        });
        for (n, resolver) in resolvers.into_iter().enumerate().rev() {
            resolver.resolve(n as i32 + 1);
        }
        assert_eq!(digits.get().unwrap(), 1234);
        assert_eq!(*calls.lock(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_reduce_long_pending_chain() {
        const STEPS: u64 = 100_000;
        let (steps, pending) = channel::<(Resolver<u64>, u64)>();
        let settler = thread::spawn(move || {
            for (resolver, next) in pending.iter() {
                resolver.resolve(next);
            }
        });
        let items: Vec<_> = (0..STEPS).map(|_| value(1u64)).collect();
        let sum = reduce(items, 0, move |acc, n| {
            let (step, resolver) = Deferred::new().split();
            steps
                .send((resolver, acc + n))
                .map_err(|_| Reason::msg("settler is gone"))?;
            Ok(step)
        });
        assert_eq!(sum.get_timeout(Duration::from_secs(60)).unwrap(), STEPS);
        settler.join().expect("The settler thread has panicked");
    }

    #[test]
    fn test_reduce_rejected_element() {
        let sum = reduce(
            vec![value(1).into(), PromiseOrValue::from(reject::<i32>(Error::ProducerDropped))],
            0,
            |acc, n| Ok(value(acc + n)),
        );
        assert!(sum.is_rejected());
    }

    #[test]
    fn test_join_spread_five() {
        let sum = crate::join![value(1), value(2), value(3), value(4), value(5)].spread5(
            |a, b, c, d, e| {
                Ok(value(
                    a.unwrap_or(0) + b.unwrap_or(0) + c.unwrap_or(0) + d.unwrap_or(0) + e.unwrap_or(0),
                ))
            },
        );
        assert_eq!(sum.get().unwrap(), 15);
    }
}
