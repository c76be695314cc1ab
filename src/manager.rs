use std::fmt;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::deferred::{Deferred, Resolver};
use crate::error::guard;
use crate::promise::Promise;
use crate::scheduler::{Job, Profile, Scheduler};
use crate::{Error, Reason};

/// Creates promises and runs their producers on a [`Scheduler`].
///
/// The manager is an ordinary value: build one around the scheduler you want
/// and pass it to whoever needs to defer work. Clones share the scheduler.
///
/// # Examples
///
/// ```
/// use promises::{combinators::value, DeferredManager, ThreadPoolScheduler};
///
/// let scheduler = ThreadPoolScheduler::builder().cpu_threads(2).build().unwrap();
/// let manager = DeferredManager::new(scheduler);
///
/// let answer = manager
///     .defer(|resolver| {
///         resolver.resolve(21);
///         Ok(())
///     })
///     .then(|n| Ok(value(n * 2)));
/// assert_eq!(answer.get().unwrap(), 42);
/// ```
#[derive(Clone)]
pub struct DeferredManager {
    scheduler: Arc<dyn Scheduler>,
}

impl DeferredManager {
    pub fn new(scheduler: impl Scheduler + 'static) -> Self {
        Self::with_scheduler(Arc::new(scheduler))
    }

    pub fn with_scheduler(scheduler: Arc<dyn Scheduler>) -> Self {
        DeferredManager { scheduler }
    }

    pub fn deferred<T: Clone + Send + 'static>(&self) -> Deferred<T> {
        Deferred::new()
    }

    pub fn resolved<T: Clone + Send + 'static>(&self, value: T) -> Promise<T> {
        Promise::fulfilled(value)
    }

    pub fn rejected<T: Clone + Send + 'static>(&self, reason: impl Into<Reason>) -> Promise<T> {
        Promise::rejected(reason)
    }

    /// Runs `producer` on the CPU profile, see [`defer_on`](Self::defer_on).
    pub fn defer<T, F>(&self, producer: F) -> Promise<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(Resolver<T>) -> Result<(), Reason> + Send + 'static,
    {
        self.defer_on(Profile::Cpu, producer)
    }

    /// Hands `producer` a fresh resolver and runs it under `profile`.
    ///
    /// Returns without waiting for the producer. An `Err` or a panic from the
    /// producer rejects the promise, unless it settled it already.
    pub fn defer_on<T, F>(&self, profile: Profile, producer: F) -> Promise<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(Resolver<T>) -> Result<(), Reason> + Send + 'static,
    {
        let (promise, resolver) = Deferred::new().split();
        self.schedule(profile, producer, resolver);
        promise
    }

    /// Runs `producer` with `resolver` under `profile`.
    ///
    /// Failures never get lost: an `Err` or a panic from the producer rejects
    /// `resolver`, and so does a scheduler refusing the work.
    pub fn schedule<T, F>(&self, profile: Profile, producer: F, resolver: Resolver<T>)
    where
        T: Clone + Send + 'static,
        F: FnOnce(Resolver<T>) -> Result<(), Reason> + Send + 'static,
    {
        let fallback = resolver.clone();
        let job: Job = Box::new(move || {
            let guarded = fallback.clone();
            if let Err(reason) = guard(move || producer(fallback)) {
                debug!(%reason, "producer failed");
                guarded.reject(reason);
            }
        });
        debug!(%profile, "scheduling producer");
        if let Err(error) = self.scheduler.schedule(profile, job) {
            warn!(%profile, %error, "scheduler refused producer");
            resolver.reject(error);
        }
    }

    /// Runs the blocking call `f` under `profile` and settles from its result.
    pub fn resolve_blocking<T, E, F>(&self, profile: Profile, f: F) -> Promise<T>
    where
        T: Clone + Send + 'static,
        E: Into<Reason>,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        self.defer_on(profile, move |resolver| {
            resolver.settle(f().map_err(Into::into));
            Ok(())
        })
    }

    /// Waits for the first message on `receiver` under `profile`.
    ///
    /// Gives up with [`Error::Timeout`] after `timeout`, if one is set, and
    /// with [`Error::ProducerDropped`] once every sender is gone.
    pub fn resolve_receiver<T>(
        &self,
        receiver: Receiver<T>,
        profile: Profile,
        timeout: Option<Duration>,
    ) -> Promise<T>
    where
        T: Clone + Send + 'static,
    {
        self.defer_on(profile, move |resolver| {
            let value = match timeout {
                Some(timeout) => receiver.recv_timeout(timeout).map_err(|e| match e {
                    RecvTimeoutError::Timeout => Error::Timeout(timeout),
                    RecvTimeoutError::Disconnected => Error::ProducerDropped,
                })?,
                None => receiver.recv().map_err(|_| Error::ProducerDropped)?,
            };
            resolver.resolve(value);
            Ok(())
        })
    }
}

impl fmt::Debug for DeferredManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredManager").finish_non_exhaustive()
    }
}
