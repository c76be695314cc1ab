//! What a handler hands back: an immediately available value or a promise
//! to wait for.
//!
//! Handlers return `Result<S, Reason>` where `S: Settle`. The closed set of
//! `Settle` implementors is the whole vocabulary: [`Value`] for "this is the
//! result", [`Promise`] for "the result comes from there", the
//! [`PromiseOrValue`] enum when a handler picks one at run time, and `()` for
//! side-effect handlers with nothing to wait for.
use crate::promise::Promise;

/// A plain value marked as already resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Value<T>(T);

impl<T> Value<T> {
    pub fn new(value: T) -> Self {
        Value(value)
    }

    pub fn get(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

/// Either a promise or a value that is already there.
#[derive(Debug, Clone)]
pub enum PromiseOrValue<T> {
    Promise(Promise<T>),
    Value(Value<T>),
}

impl<T> From<Promise<T>> for PromiseOrValue<T> {
    fn from(promise: Promise<T>) -> Self {
        PromiseOrValue::Promise(promise)
    }
}

impl<T> From<Value<T>> for PromiseOrValue<T> {
    fn from(value: Value<T>) -> Self {
        PromiseOrValue::Value(value)
    }
}

/// Something a promise can be settled from.
pub trait Settle: Send + 'static {
    type Output: Clone + Send + 'static;

    fn into_promise_or_value(self) -> PromiseOrValue<Self::Output>;
}

impl<T: Clone + Send + 'static> Settle for Value<T> {
    type Output = T;

    fn into_promise_or_value(self) -> PromiseOrValue<T> {
        PromiseOrValue::Value(self)
    }
}

impl<T: Clone + Send + 'static> Settle for Promise<T> {
    type Output = T;

    fn into_promise_or_value(self) -> PromiseOrValue<T> {
        PromiseOrValue::Promise(self)
    }
}

impl<T: Clone + Send + 'static> Settle for PromiseOrValue<T> {
    type Output = T;

    fn into_promise_or_value(self) -> PromiseOrValue<T> {
        self
    }
}

impl Settle for () {
    type Output = ();

    fn into_promise_or_value(self) -> PromiseOrValue<()> {
        PromiseOrValue::Value(Value(()))
    }
}
