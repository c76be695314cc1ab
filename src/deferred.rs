use std::sync::Arc;

use tracing::trace;

use crate::promise::Promise;
use crate::value::{PromiseOrValue, Settle};
use crate::{Error, Reason};

/// The write side of a [`Promise`].
///
/// Resolvers can be cloned and shared between producers; whichever settles
/// first wins and every later attempt is ignored. Once the last clone is
/// dropped while the promise is still pending, the promise is rejected with
/// [`Error::ProducerDropped`].
///
/// # Examples
///
/// ```
/// use promises::Deferred;
/// use std::thread;
///
/// let (promise, resolver) = Deferred::<&str>::new().split();
/// let racer = resolver.clone();
/// let task1 = thread::spawn(move || racer.resolve("first"));
/// let task2 = thread::spawn(move || resolver.resolve("second"));
/// task1.join().expect("The task1 thread has panicked");
/// task2.join().expect("The task2 thread has panicked");
///
/// let winner = promise.get().unwrap();
/// assert!(winner == "first" || winner == "second");
/// ```
pub struct Resolver<T> {
    producer: Arc<Producer<T>>,
}

struct Producer<T> {
    promise: Promise<T>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Resolver {
            producer: self.producer.clone(),
        }
    }
}

impl<T> Drop for Producer<T> {
    /// If this is an unresolved producer, reject the promise.
    fn drop(&mut self) {
        if self.promise.is_pending()
            && self.promise.reject_pending(Reason::new(Error::ProducerDropped))
        {
            trace!("producer dropped before settling");
        }
    }
}

impl<T: Clone + Send + 'static> Resolver<T> {
    pub fn resolve(&self, value: T) {
        self.try_resolve(value);
    }

    pub fn reject(&self, reason: impl Into<Reason>) {
        self.try_reject(reason);
    }

    /// Resolves and reports whether this call was the one that settled.
    pub fn try_resolve(&self, value: T) -> bool {
        self.producer.promise.settle(Ok(value))
    }

    /// Rejects and reports whether this call was the one that settled.
    pub fn try_reject(&self, reason: impl Into<Reason>) -> bool {
        self.producer.promise.settle(Err(reason.into()))
    }

    pub fn settle(&self, outcome: Result<T, Reason>) -> bool {
        self.producer.promise.settle(outcome)
    }

    /// Adopts the eventual settlement of `promise`.
    pub fn chain(&self, promise: &Promise<T>) {
        if promise.ptr_eq(&self.producer.promise) {
            self.reject(Error::SelfResolution);
            return;
        }
        let resolver = self.clone();
        promise.subscribe(move |outcome| {
            resolver.settle(outcome);
        });
    }

    pub fn is_settled(&self) -> bool {
        !self.producer.promise.is_pending()
    }

    /// Settles from a handler's result: a value fulfills, a promise is
    /// adopted, an error rejects.
    pub(crate) fn settle_with<S>(&self, outcome: Result<S, Reason>)
    where
        S: Settle<Output = T>,
    {
        match outcome.map(Settle::into_promise_or_value) {
            Ok(PromiseOrValue::Value(value)) => self.resolve(value.into_inner()),
            Ok(PromiseOrValue::Promise(promise)) => self.chain(&promise),
            Err(reason) => self.reject(reason),
        }
    }
}

/// A fresh [`Promise`] together with its [`Resolver`].
///
/// Asking for either half again hands out the same underlying pair.
pub struct Deferred<T> {
    promise: Promise<T>,
    resolver: Resolver<T>,
}

impl<T: Clone + Send + 'static> Deferred<T> {
    pub fn new() -> Self {
        let promise = Promise::pending();
        let resolver = Resolver {
            producer: Arc::new(Producer {
                promise: promise.clone(),
            }),
        };
        Deferred { promise, resolver }
    }

    pub fn promise(&self) -> Promise<T> {
        self.promise.clone()
    }

    pub fn resolver(&self) -> Resolver<T> {
        self.resolver.clone()
    }

    pub fn split(self) -> (Promise<T>, Resolver<T>) {
        (self.promise, self.resolver)
    }
}

impl<T: Clone + Send + 'static> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}
