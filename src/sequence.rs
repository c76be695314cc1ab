use std::collections::VecDeque;

use crate::Error;

/// A fulfillment value that can be taken apart into ordered elements.
///
/// This is the bound behind [`Promise::map`](crate::Promise::map),
/// [`Promise::reduce`](crate::Promise::reduce) and the `spread` family. Types
/// that only learn their shape at run time report
/// [`Error::NotASequence`] instead of elements, which rejects the derived
/// promise.
pub trait Sequence {
    type Item;

    fn into_items(self) -> Result<Vec<Self::Item>, Error>;
}

impl<T> Sequence for Vec<T> {
    type Item = T;

    fn into_items(self) -> Result<Vec<T>, Error> {
        Ok(self)
    }
}

impl<T> Sequence for VecDeque<T> {
    type Item = T;

    fn into_items(self) -> Result<Vec<T>, Error> {
        Ok(self.into())
    }
}

impl<T, const N: usize> Sequence for [T; N] {
    type Item = T;

    fn into_items(self) -> Result<Vec<T>, Error> {
        Ok(Vec::from(self))
    }
}

impl<T> Sequence for Box<[T]> {
    type Item = T;

    fn into_items(self) -> Result<Vec<T>, Error> {
        Ok(self.into_vec())
    }
}

// An absent sequence has no elements.
impl<S: Sequence> Sequence for Option<S> {
    type Item = S::Item;

    fn into_items(self) -> Result<Vec<S::Item>, Error> {
        match self {
            Some(sequence) => sequence.into_items(),
            None => Ok(Vec::new()),
        }
    }
}
