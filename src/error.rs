use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by this crate.
///
/// A rejected promise never produces an `Error` on its own: the rejection
/// travels as a [`Reason`]. `Error` shows up when the rejection has to leave
/// the promise world, i.e. from [`Promise::get`](crate::Promise::get) or when
/// the promise is awaited, and as the cause of rejections this crate raises
/// itself.
#[derive(Debug, Error)]
pub enum Error {
    /// The promise completed with an error. The original cause is the source.
    #[error("promise was rejected: {0}")]
    Rejected(#[source] Arc<dyn StdError + Send + Sync + 'static>),
    /// A blocking wait gave up before the promise settled.
    #[error("promise still pending after {0:?}")]
    Timeout(Duration),
    /// A collection operation got a value it could not split into elements.
    #[error("{type_name} is not a sequence (can not map or reduce it)")]
    NotASequence { type_name: &'static str },
    /// A user handler panicked instead of returning. A handler that was
    /// recovering from a rejection keeps that rejection as the source.
    #[error("handler panicked: {message}")]
    Panicked {
        message: String,
        #[source]
        cause: Option<Arc<dyn StdError + Send + Sync + 'static>>,
    },
    /// Every resolver was dropped while the promise was still pending.
    #[error("producer dropped before settling the promise")]
    ProducerDropped,
    /// A resolver was asked to adopt the promise it settles.
    #[error("a promise can not adopt its own settlement")]
    SelfResolution,
    /// The scheduler no longer accepts work.
    #[error("scheduler is shut down")]
    SchedulerShutdown,
    #[error("failed to spawn worker thread")]
    Spawn(#[from] io::Error),
}

impl Error {
    /// The rejection behind an [`Error::Rejected`], for typed inspection.
    pub fn reason(&self) -> Option<Reason> {
        match self {
            Error::Rejected(cause) => Some(Reason(cause.clone())),
            _ => None,
        }
    }

    pub fn not_a_sequence<T: ?Sized>() -> Self {
        Error::NotASequence {
            type_name: std::any::type_name::<T>(),
        }
    }
}

/// Why a promise was rejected.
///
/// A cheap, cloneable handle over any error type. Every rejected promise
/// replays the same `Reason` to all of its observers, so comparing with
/// [`Reason::ptr_eq`] tells whether a rejection passed through untouched.
///
/// Any `std::error::Error + Send + Sync` converts into a `Reason`, which lets
/// handlers use `?`:
///
/// ```
/// use promises::{combinators::{resolve, value}, Reason};
///
/// let parsed = resolve(value("42".to_string()))
///     .then(|s| Ok(value(s.parse::<i32>()?)));
/// assert_eq!(parsed.get().unwrap(), 42);
/// ```
#[derive(Clone)]
pub struct Reason(Arc<dyn StdError + Send + Sync + 'static>);

#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);

impl Reason {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Reason(Arc::new(error))
    }

    /// A reason carrying nothing but a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Reason::new(Message(message.into()))
    }

    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.0.is::<E>()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }

    pub fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.0
    }

    pub fn into_error(self) -> Arc<dyn StdError + Send + Sync + 'static> {
        self.0
    }

    /// Whether both reasons are the very same rejection.
    pub fn ptr_eq(&self, other: &Reason) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<E> From<E> for Reason
where
    E: StdError + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Reason::new(error)
    }
}

impl fmt::Debug for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

/// Runs user code, turning a panic into a rejection reason.
pub(crate) fn guard<R>(f: impl FnOnce() -> Result<R, Reason>) -> Result<R, Reason> {
    catch(f, None)
}

/// Runs a handler of `cause`. A panic keeps `cause` as its source.
pub(crate) fn guard_rejection<R>(
    cause: &Reason,
    f: impl FnOnce() -> Result<R, Reason>,
) -> Result<R, Reason> {
    catch(f, Some(cause))
}

fn catch<R>(f: impl FnOnce() -> Result<R, Reason>, cause: Option<&Reason>) -> Result<R, Reason> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(Reason::new(Error::Panicked {
            message: panic_message(&*payload),
            cause: cause.map(|cause| cause.clone().into_error()),
        }))
    })
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
