use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{error, trace};

use crate::combinators;
use crate::deferred::{Deferred, Resolver};
use crate::error::{guard, guard_rejection};
use crate::sequence::Sequence;
use crate::value::{PromiseOrValue, Settle, Value};
use crate::{Error, Reason};

/// The read side of a value that settles once, either fulfilled or rejected.
///
/// A `Promise` can be cloned and handed to any number of consumers; all
/// clones observe the same settlement. Continuations attached with
/// [`then`](Promise::then) and friends run on the thread that settles the
/// promise, or right away on the calling thread when the promise has already
/// settled. Each continuation runs exactly once.
///
/// # Examples
///
/// ```
/// use promises::{Deferred, combinators::value};
/// use futures::executor::block_on;
/// use std::thread;
///
/// let deferred = Deferred::<String>::new();
/// let greeting = deferred.promise().then(|name| Ok(value(format!("Hi {name}"))));
///
/// let resolver = deferred.resolver();
/// let producer = thread::spawn(move || resolver.resolve("🍓".into()));
///
/// assert_eq!(block_on(greeting).unwrap(), "Hi 🍓");
/// producer.join().expect("The producer thread has panicked");
/// ```
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    cell: Mutex<Cell<T>>,
    settled: Condvar,
}

type Continuation<T> = Box<dyn FnOnce(Result<T, Reason>) + Send>;

enum Cell<T> {
    Pending {
        continuations: Vec<Continuation<T>>,
        // Tasks awaiting the promise through `Future::poll`.
        wakers: Vec<Waker>,
    },
    Fulfilled(T),
    Rejected(Reason),
}

impl<T: Clone> Cell<T> {
    fn outcome(&self) -> Option<Result<T, Reason>> {
        match self {
            Cell::Pending { .. } => None,
            Cell::Fulfilled(value) => Some(Ok(value.clone())),
            Cell::Rejected(reason) => Some(Err(reason.clone())),
        }
    }
}

/// A snapshot of where a promise stands.
#[derive(Debug, Clone)]
pub enum Settlement<T> {
    Pending,
    Fulfilled(T),
    Rejected(Reason),
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Promise<T> {
    fn with_cell(cell: Cell<T>) -> Self {
        Promise {
            inner: Arc::new(Inner {
                cell: Mutex::new(cell),
                settled: Condvar::new(),
            }),
        }
    }

    /// Whether both handles point at the same promise.
    pub fn ptr_eq(&self, other: &Promise<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.inner.cell.lock(), Cell::Pending { .. })
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(*self.inner.cell.lock(), Cell::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(*self.inner.cell.lock(), Cell::Rejected(_))
    }

    /// Moves a pending promise to `settled`, handing back whoever was waiting.
    /// Returns `None` when the promise had already settled.
    fn transition(&self, settled: Cell<T>) -> Option<(Vec<Continuation<T>>, Vec<Waker>)> {
        let mut cell = self.inner.cell.lock();
        let waiting = match &mut *cell {
            Cell::Pending {
                continuations,
                wakers,
            } => (mem::take(continuations), mem::take(wakers)),
            _ => return None,
        };
        *cell = settled;
        drop(cell);
        self.inner.settled.notify_all();
        Some(waiting)
    }

    /// Rejects without cloning a `T`, so resolvers can do it from `Drop`.
    pub(crate) fn reject_pending(&self, reason: Reason) -> bool {
        let Some((continuations, wakers)) = self.transition(Cell::Rejected(reason.clone())) else {
            return false;
        };
        trace!(%reason, continuations = continuations.len(), "promise rejected");
        wakers.into_iter().for_each(Waker::wake);
        run_continuations(continuations, || Err(reason.clone()));
        true
    }
}

/// Runs every continuation, even when one of them panics. The first panic is
/// raised again once the queue is empty.
fn run_continuations<T>(
    continuations: Vec<Continuation<T>>,
    mut outcome: impl FnMut() -> Result<T, Reason>,
) {
    let mut escaped = None;
    for continuation in continuations {
        let outcome = outcome();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || continuation(outcome))) {
            escaped.get_or_insert(payload);
        }
    }
    if let Some(payload) = escaped {
        panic::resume_unwind(payload);
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    pub(crate) fn pending() -> Self {
        Promise::with_cell(Cell::Pending {
            continuations: Vec::new(),
            wakers: Vec::new(),
        })
    }

    /// A promise that is already fulfilled with `value`.
    pub fn fulfilled(value: T) -> Self {
        Promise::with_cell(Cell::Fulfilled(value))
    }

    /// A promise that is already rejected with `reason`.
    pub fn rejected(reason: impl Into<Reason>) -> Self {
        Promise::with_cell(Cell::Rejected(reason.into()))
    }

    /// First settlement wins. Later calls change nothing and return `false`.
    pub(crate) fn settle(&self, outcome: Result<T, Reason>) -> bool {
        let settled = match &outcome {
            Ok(value) => Cell::Fulfilled(value.clone()),
            Err(reason) => Cell::Rejected(reason.clone()),
        };
        let Some((continuations, wakers)) = self.transition(settled) else {
            trace!("ignoring settlement of an already settled promise");
            return false;
        };
        trace!(
            fulfilled = outcome.is_ok(),
            continuations = continuations.len(),
            "promise settled"
        );
        wakers.into_iter().for_each(Waker::wake);
        run_continuations(continuations, || outcome.clone());
        true
    }

    /// Runs `continuation` once the promise settles, or now if it already has.
    pub(crate) fn subscribe<F>(&self, continuation: F)
    where
        F: FnOnce(Result<T, Reason>) + Send + 'static,
    {
        let mut cell = self.inner.cell.lock();
        let outcome = match &mut *cell {
            Cell::Pending { continuations, .. } => {
                continuations.push(Box::new(continuation));
                return;
            }
            Cell::Fulfilled(value) => Ok(value.clone()),
            Cell::Rejected(reason) => Err(reason.clone()),
        };
        drop(cell);
        continuation(outcome);
    }

    /// The settlement if there is one, without waiting.
    pub(crate) fn peek(&self) -> Option<Result<T, Reason>> {
        self.inner.cell.lock().outcome()
    }

    pub fn state(&self) -> Settlement<T> {
        match self.peek() {
            None => Settlement::Pending,
            Some(Ok(value)) => Settlement::Fulfilled(value),
            Some(Err(reason)) => Settlement::Rejected(reason),
        }
    }

    fn derive<U, F>(&self, continuation: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Result<T, Reason>, Resolver<U>) + Send + 'static,
    {
        let (promise, resolver) = Deferred::new().split();
        self.subscribe(move |outcome| continuation(outcome, resolver));
        promise
    }

    /// Chains `on_fulfilled` onto the fulfillment of this promise.
    ///
    /// What the handler returns settles the derived promise: a [`Value`]
    /// fulfills it, a [`Promise`] is waited for, an `Err` (or a panic) rejects
    /// it. A rejection of this promise skips the handler and passes through
    /// unchanged.
    pub fn then<F, S>(&self, on_fulfilled: F) -> Promise<S::Output>
    where
        F: FnOnce(T) -> Result<S, Reason> + Send + 'static,
        S: Settle,
    {
        self.derive(move |outcome, next| match outcome {
            Ok(value) => next.settle_with(guard(|| on_fulfilled(value))),
            Err(reason) => next.reject(reason),
        })
    }

    /// Like [`then`](Promise::then), but a rejection goes through
    /// `on_rejected`, whose result becomes the new settlement.
    pub fn then_or_else<F, G, S, R>(&self, on_fulfilled: F, on_rejected: G) -> Promise<S::Output>
    where
        F: FnOnce(T) -> Result<S, Reason> + Send + 'static,
        G: FnOnce(Reason) -> Result<R, Reason> + Send + 'static,
        S: Settle,
        R: Settle<Output = S::Output>,
    {
        self.derive(move |outcome, next| match outcome {
            Ok(value) => next.settle_with(guard(|| on_fulfilled(value))),
            Err(reason) => {
                let cause = reason.clone();
                next.settle_with(guard_rejection(&cause, || on_rejected(reason)))
            }
        })
    }

    /// Recovers from any rejection.
    pub fn fail<F, S>(&self, on_rejected: F) -> Promise<T>
    where
        F: FnOnce(Reason) -> Result<S, Reason> + Send + 'static,
        S: Settle<Output = T>,
    {
        self.derive(move |outcome, next| match outcome {
            Ok(value) => next.resolve(value),
            Err(reason) => {
                let cause = reason.clone();
                next.settle_with(guard_rejection(&cause, || on_rejected(reason)))
            }
        })
    }

    /// Recovers only from rejections caused by an `E`. Any other rejection
    /// passes through untouched.
    ///
    /// ```
    /// use promises::{combinators::{reject, value}, Error};
    ///
    /// let recovered = reject::<i32>(Error::ProducerDropped)
    ///     .fail_when(|_: &std::io::Error| Ok(value(0)))
    ///     .fail_when(|_: &Error| Ok(value(1)));
    /// assert_eq!(recovered.get().unwrap(), 1);
    /// ```
    pub fn fail_when<E, F, S>(&self, on_rejected: F) -> Promise<T>
    where
        E: StdError + 'static,
        F: FnOnce(&E) -> Result<S, Reason> + Send + 'static,
        S: Settle<Output = T>,
    {
        self.derive(move |outcome, next| match outcome {
            Ok(value) => next.resolve(value),
            Err(reason) => match reason.downcast_ref::<E>() {
                Some(error) => next.settle_with(guard_rejection(&reason, || on_rejected(error))),
                None => next.reject(reason),
            },
        })
    }

    /// Runs a side effect on fulfillment and keeps the original value.
    ///
    /// If the handler returns a promise it is waited for; its result is
    /// dropped but its rejection is not.
    pub fn tap<F, S>(&self, on_fulfilled: F) -> Promise<T>
    where
        F: FnOnce(&T) -> Result<S, Reason> + Send + 'static,
        S: Settle,
    {
        self.derive(move |outcome, next| match outcome {
            Ok(value) => match guard(|| on_fulfilled(&value)) {
                Ok(side) => match side.into_promise_or_value() {
                    PromiseOrValue::Value(_) => next.resolve(value),
                    PromiseOrValue::Promise(side) => side.subscribe(move |side| match side {
                        Ok(_) => next.resolve(value),
                        Err(reason) => next.reject(reason),
                    }),
                },
                Err(reason) => next.reject(reason),
            },
            Err(reason) => next.reject(reason),
        })
    }

    /// Runs `callable` whatever the outcome, then forwards the original
    /// settlement.
    ///
    /// A promise returned by `callable` is waited for first, and its
    /// rejection replaces the original outcome. So does an `Err` or panic
    /// from `callable` itself.
    pub fn always<F, S>(&self, callable: F) -> Promise<T>
    where
        F: FnOnce() -> Result<S, Reason> + Send + 'static,
        S: Settle,
    {
        self.derive(move |outcome, next| match guard(callable) {
            Ok(side) => match side.into_promise_or_value() {
                PromiseOrValue::Value(_) => {
                    next.settle(outcome);
                }
                PromiseOrValue::Promise(side) => side.subscribe(move |side| match side {
                    Ok(_) => {
                        next.settle(outcome);
                    }
                    Err(reason) => next.reject(reason),
                }),
            },
            Err(reason) => next.reject(reason),
        })
    }

    /// Passes the first two elements of the fulfilled sequence as arguments.
    /// Missing elements come through as `None`.
    pub fn spread2<F, S>(&self, f: F) -> Promise<S::Output>
    where
        T: Sequence,
        F: FnOnce(Option<T::Item>, Option<T::Item>) -> Result<S, Reason> + Send + 'static,
        S: Settle,
    {
        self.then(move |sequence| {
            let mut items = sequence.into_items()?.into_iter();
            f(items.next(), items.next())
        })
    }

    pub fn spread3<F, S>(&self, f: F) -> Promise<S::Output>
    where
        T: Sequence,
        F: FnOnce(Option<T::Item>, Option<T::Item>, Option<T::Item>) -> Result<S, Reason>
            + Send
            + 'static,
        S: Settle,
    {
        self.then(move |sequence| {
            let mut items = sequence.into_items()?.into_iter();
            f(items.next(), items.next(), items.next())
        })
    }

    pub fn spread4<F, S>(&self, f: F) -> Promise<S::Output>
    where
        T: Sequence,
        F: FnOnce(
                Option<T::Item>,
                Option<T::Item>,
                Option<T::Item>,
                Option<T::Item>,
            ) -> Result<S, Reason>
            + Send
            + 'static,
        S: Settle,
    {
        self.then(move |sequence| {
            let mut items = sequence.into_items()?.into_iter();
            f(items.next(), items.next(), items.next(), items.next())
        })
    }

    pub fn spread5<F, S>(&self, f: F) -> Promise<S::Output>
    where
        T: Sequence,
        F: FnOnce(
                Option<T::Item>,
                Option<T::Item>,
                Option<T::Item>,
                Option<T::Item>,
                Option<T::Item>,
            ) -> Result<S, Reason>
            + Send
            + 'static,
        S: Settle,
    {
        self.then(move |sequence| {
            let mut items = sequence.into_items()?.into_iter();
            f(
                items.next(),
                items.next(),
                items.next(),
                items.next(),
                items.next(),
            )
        })
    }

    /// Maps every element of the fulfilled sequence, see
    /// [`combinators::map`].
    pub fn map<F, S>(&self, mapper: F) -> Promise<Vec<S::Output>>
    where
        T: Sequence,
        T::Item: Clone + Send + 'static,
        F: Fn(T::Item) -> Result<S, Reason> + Send + Sync + 'static,
        S: Settle,
    {
        self.then(move |sequence| {
            let items = sequence.into_items()?;
            Ok(combinators::map(items.into_iter().map(Value::new), mapper))
        })
    }

    /// Folds the fulfilled sequence left to right, see
    /// [`combinators::reduce`].
    pub fn reduce<F, S, R>(&self, initial: R, reducer: F) -> Promise<R>
    where
        T: Sequence,
        T::Item: Clone + Send + 'static,
        R: Clone + Send + 'static,
        F: FnMut(R, T::Item) -> Result<S, Reason> + Send + 'static,
        S: Settle<Output = R>,
    {
        self.then(move |sequence| {
            let items = sequence.into_items()?;
            Ok(combinators::reduce(
                items.into_iter().map(Value::new),
                initial,
                reducer,
            ))
        })
    }

    /// Folds the fulfilled sequence using its first element as the initial
    /// accumulator. An empty sequence fulfills with `None`.
    pub fn reduce_first<F, S>(&self, reducer: F) -> Promise<Option<T::Item>>
    where
        T: Sequence,
        T::Item: Clone + Send + 'static,
        F: FnMut(T::Item, T::Item) -> Result<S, Reason> + Send + 'static,
        S: Settle<Output = T::Item>,
    {
        self.then(move |sequence| {
            let mut items = sequence.into_items()?.into_iter();
            Ok(match items.next() {
                Some(first) => PromiseOrValue::Promise(
                    combinators::reduce(items.map(Value::new), first, reducer)
                        .then(|folded| Ok(Value::new(Some(folded)))),
                ),
                None => PromiseOrValue::Value(Value::new(None)),
            })
        })
    }

    /// Drops the fulfillment and fulfills with `value` instead.
    pub fn yield_value<U: Clone + Send + 'static>(&self, value: U) -> Promise<U> {
        self.then(move |_| Ok(Value::new(value)))
    }

    /// Drops the fulfillment and settles from `next` instead.
    pub fn yield_to<S: Settle>(&self, next: S) -> Promise<S::Output> {
        self.then(move |_| Ok(next))
    }

    /// Consumes the fulfillment. A rejection is dropped silently.
    ///
    /// # Panics
    ///
    /// If `on_success` fails there is nobody left to report to, so the
    /// failure panics on whichever thread settles the promise, after every
    /// other continuation of this promise has run.
    pub fn done<F>(&self, on_success: F)
    where
        F: FnOnce(T) -> Result<(), Reason> + Send + 'static,
    {
        self.subscribe(move |outcome| match outcome {
            Ok(value) => {
                if let Err(reason) = guard(|| on_success(value)) {
                    error!(%reason, "done handler failed with no failure handler");
                    panic!("unhandled failure in done handler: {reason}");
                }
            }
            Err(reason) => trace!(%reason, "dropping rejection with no failure handler"),
        })
    }

    /// Consumes the settlement. A failing `on_success` is reported to
    /// `on_failure` as well.
    pub fn done_or_else<F, G>(&self, on_success: F, on_failure: G)
    where
        F: FnOnce(T) -> Result<(), Reason> + Send + 'static,
        G: FnOnce(Reason) + Send + 'static,
    {
        self.subscribe(move |outcome| match outcome {
            Ok(value) => {
                if let Err(reason) = guard(|| on_success(value)) {
                    on_failure(reason);
                }
            }
            Err(reason) => on_failure(reason),
        })
    }

    /// Blocks the calling thread until the promise settles.
    pub fn get(&self) -> Result<T, Error> {
        let mut cell = self.inner.cell.lock();
        loop {
            if let Some(outcome) = cell.outcome() {
                return outcome.map_err(rejected);
            }
            self.inner.settled.wait(&mut cell);
        }
    }

    /// Blocks for at most `timeout`. Giving up leaves the promise untouched.
    /// A timeout too large to express as a deadline waits like [`get`](Promise::get).
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, Error> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.get();
        };
        let mut cell = self.inner.cell.lock();
        loop {
            if let Some(outcome) = cell.outcome() {
                return outcome.map_err(rejected);
            }
            if self.inner.settled.wait_until(&mut cell, deadline).timed_out() {
                return match cell.outcome() {
                    Some(outcome) => outcome.map_err(rejected),
                    None => Err(Error::Timeout(timeout)),
                };
            }
        }
    }
}

fn rejected(reason: Reason) -> Error {
    Error::Rejected(reason.into_error())
}

impl<T: Clone + Send + 'static> Future for Promise<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut cell = self.inner.cell.lock();
        match &mut *cell {
            Cell::Pending { wakers, .. } => {
                if !wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
            Cell::Fulfilled(value) => Poll::Ready(Ok(value.clone())),
            Cell::Rejected(reason) => Poll::Ready(Err(rejected(reason.clone()))),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cell = self.inner.cell.lock();
        let mut debug = f.debug_struct("Promise");
        match &*cell {
            Cell::Pending { continuations, .. } => {
                debug.field("continuations", &continuations.len());
            }
            Cell::Fulfilled(value) => {
                debug.field("fulfilled", value);
            }
            Cell::Rejected(reason) => {
                debug.field("rejected", reason);
            }
        }
        debug.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinators::{reject, resolve, value};
    use futures::executor::block_on;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[derive(Debug, thiserror::Error)]
    #[error("not found")]
    struct NotFound;

    #[derive(Debug, thiserror::Error)]
    #[error("denied")]
    struct Denied;

    #[test]
    fn test_then_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let next = Promise::fulfilled(41).then(move |n| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(value(n + 1))
        });
        assert_eq!(next.get().unwrap(), 42);
        assert_eq!(next.get().unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_then_waits_for_returned_promise() {
        let (inner, resolver) = Deferred::<String>::new().split();
        let outer = Promise::fulfilled("1".to_string()).then(move |_| Ok(inner));
        assert!(outer.is_pending());
        resolver.resolve("1 2".into());
        assert_eq!(outer.get().unwrap(), "1 2");
    }

    #[test]
    fn test_rejection_skips_then() {
        let reason = Reason::msg("boom");
        let next = Promise::<i32>::rejected(reason.clone()).then(|_| -> Result<Value<i32>, Reason> {
            panic!("must not run");
        });
        match next.state() {
            Settlement::Rejected(seen) => assert!(seen.ptr_eq(&reason)),
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[test]
    fn test_handler_error_rejects() {
        let next = Promise::fulfilled(1).then(|_| Err::<Value<i32>, _>(Reason::from(NotFound)));
        let error = next.get().unwrap_err();
        assert!(error.reason().unwrap().is::<NotFound>());
    }

    #[test]
    fn test_handler_panic_rejects() {
        let next = Promise::fulfilled(1).then(|_| -> Result<Value<i32>, Reason> { panic!("oops") });
        let error = next.get().unwrap_err();
        assert!(matches!(
            error.reason().unwrap().downcast_ref::<Error>(),
            Some(Error::Panicked { .. })
        ));
    }

    #[test]
    fn test_then_or_else_recovers() {
        let next = Promise::<i32>::rejected(NotFound).then_or_else(|n| Ok(value(n)), |_| Ok(value(-1)));
        assert_eq!(next.get().unwrap(), -1);
    }

    #[test]
    fn test_fail_when_passes_unrelated_errors() {
        let reason = Reason::from(Denied);
        let handled = Arc::new(AtomicUsize::new(0));
        let counter = handled.clone();
        let next = Promise::<i32>::rejected(reason.clone()).fail_when(move |_: &NotFound| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(value(0))
        });
        match next.state() {
            Settlement::Rejected(seen) => assert!(seen.ptr_eq(&reason)),
            other => panic!("unexpected state {other:?}"),
        }
        assert_eq!(handled.load(Ordering::SeqCst), 0);
        assert_eq!(next.fail(|_| Ok(value(7))).get().unwrap(), 7);
    }

    #[test]
    fn test_tap_keeps_value() {
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = seen.clone();
        let next = Promise::fulfilled(5usize).tap(move |n| {
            sink.store(*n, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(next.get().unwrap(), 5);
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_tap_rejection_wins() {
        let next = Promise::fulfilled(5).tap(|_| Ok(reject::<()>(Denied)));
        assert!(next.get().unwrap_err().reason().unwrap().is::<Denied>());
    }

    #[test]
    fn test_always_forwards_original_rejection() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        let next = Promise::<i32>::rejected(NotFound).always(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(resolve(value(())))
        });
        assert!(next.get().unwrap_err().reason().unwrap().is::<NotFound>());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_always_error_rejects_downstream() {
        let next = Promise::fulfilled(3).always(|| Err::<(), _>(Reason::from(Denied)));
        assert!(next.get().unwrap_err().reason().unwrap().is::<Denied>());
    }

    #[test]
    fn test_spread_missing_elements_are_none() {
        let sum = Promise::fulfilled(vec![1, 2]).spread3(|a, b, c| {
            assert_eq!(c, None);
            Ok(value(a.unwrap_or(0) + b.unwrap_or(0)))
        });
        assert_eq!(sum.get().unwrap(), 3);
    }

    #[test]
    fn test_reduce_first() {
        let folded = Promise::fulfilled(vec![1, 2, 3]).reduce_first(|a, b| Ok(value(a * 10 + b)));
        assert_eq!(folded.get().unwrap(), Some(123));
        let empty = Promise::fulfilled(Vec::<i32>::new()).reduce_first(|a, b| Ok(value(a + b)));
        assert_eq!(empty.get().unwrap(), None);
    }

    #[test]
    fn test_yield() {
        assert_eq!(Promise::fulfilled(1).yield_value("one").get().unwrap(), "one");
        let next = Promise::fulfilled(1).yield_to(Promise::fulfilled(2));
        assert_eq!(next.get().unwrap(), 2);
    }

    #[test]
    fn test_done_drops_rejection() {
        Promise::<i32>::rejected(NotFound).done(|_| panic!("must not run"));
    }

    #[test]
    #[should_panic(expected = "unhandled failure in done handler")]
    fn test_done_escalates_handler_failure() {
        Promise::fulfilled(1).done(|_| Err(Reason::msg("bad")));
    }

    #[test]
    fn test_done_or_else_routes_handler_failure() {
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = failures.clone();
        Promise::fulfilled(1).done_or_else(
            |_| Err(Reason::msg("bad")),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_get_timeout_leaves_promise_pending() {
        let (promise, resolver) = Deferred::<i32>::new().split();
        assert!(matches!(
            promise.get_timeout(Duration::from_millis(10)),
            Err(Error::Timeout(_))
        ));
        assert!(promise.is_pending());
        resolver.resolve(9);
        assert_eq!(promise.get_timeout(Duration::from_millis(10)).unwrap(), 9);
    }

    #[test]
    fn test_await_from_other_thread() {
        let (promise, resolver) = Deferred::<String>::new().split();
        let waiter = thread::spawn(move || block_on(promise));
        resolver.resolve(String::from("🍓"));
        assert_eq!(waiter.join().expect("The waiter thread has panicked").unwrap(), "🍓");
    }

    #[test]
    fn test_failing_done_runs_every_continuation() {
        let (promise, resolver) = Deferred::<i32>::new().split();
        let first = promise.then(|n| Ok(value(n)));
        promise.done(|_| Err(Reason::msg("bad")));
        let third = promise.then(|n| Ok(value(n + 1)));

        let escalated = panic::catch_unwind(AssertUnwindSafe(|| resolver.resolve(1)));
        assert!(escalated.is_err());
        assert_eq!(first.get().unwrap(), 1);
        assert_eq!(third.get_timeout(Duration::from_secs(1)).unwrap(), 2);
    }

    #[test]
    fn test_get_timeout_unbounded() {
        let (promise, resolver) = Deferred::<i32>::new().split();
        let task = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            resolver.resolve(5);
        });
        assert_eq!(promise.get_timeout(Duration::MAX).unwrap(), 5);
        task.join().expect("The task thread has panicked");
    }

    #[test]
    fn test_panic_while_recovering_keeps_cause() {
        let next = Promise::<i32>::rejected(NotFound)
            .fail(|_| -> Result<Value<i32>, Reason> { panic!("recovery failed") });
        let reason = next.get().unwrap_err().reason().unwrap();
        match reason.downcast_ref::<Error>() {
            Some(Error::Panicked {
                message,
                cause: Some(cause),
            }) => {
                assert_eq!(message, "recovery failed");
                assert!(cause.downcast_ref::<NotFound>().is_some());
            }
            other => panic!("unexpected reason {other:?}"),
        }
    }

    #[test]
    fn test_replay_to_late_continuation() {
        let (promise, resolver) = Deferred::<i32>::new().split();
        let early = promise.then(|n| Ok(value(n)));
        resolver.resolve(8);
        let late = promise.then(|n| Ok(value(n)));
        assert_eq!(early.get().unwrap(), 8);
        assert_eq!(late.get().unwrap(), 8);
    }
}
