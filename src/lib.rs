//! Promises that settle once and can be shared across threads.
//!
//! A [`Deferred`] pairs a [`Promise`], the read side, with a [`Resolver`],
//! the write side. Producers settle the resolver exactly once; consumers
//! derive new promises from the old one with [`Promise::then`] and friends,
//! block on it with [`Promise::get`], or `.await` it.
//!
//! Work that should run off the calling thread goes through a
//! [`DeferredManager`], which hands it to a [`Scheduler`] under an execution
//! [`Profile`].
//!
//! ```
//! use promises::{combinators::value, join, DeferredManager, Profile, ThreadPoolScheduler};
//!
//! let manager = DeferredManager::new(ThreadPoolScheduler::builder().build().unwrap());
//! let a = manager.defer(|resolver| {
//!     resolver.resolve(2);
//!     Ok(())
//! });
//! let b = manager.resolve_blocking(Profile::Io, || "3".parse::<i32>());
//!
//! let product = join![a, b].spread2(|a, b| Ok(value(a.unwrap_or(0) * b.unwrap_or(0))));
//! assert_eq!(product.get().unwrap(), 6);
//! ```
pub mod combinators;
mod deferred;
mod error;
mod manager;
mod promise;
pub mod scheduler;
mod sequence;
mod value;

pub use deferred::{Deferred, Resolver};
pub use error::{Error, Reason};
pub use manager::DeferredManager;
pub use promise::{Promise, Settlement};
pub use scheduler::{CurrentThreadScheduler, Job, Profile, Scheduler, SchedulerBuilder, ThreadPoolScheduler};
pub use sequence::Sequence;
pub use value::{PromiseOrValue, Settle, Value};
