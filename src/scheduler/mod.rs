//! Where deferred work runs.
//!
//! The promise engine never starts threads. It hands units of work to a
//! [`Scheduler`] together with the [`Profile`] the work asked for, and the
//! scheduler decides which thread runs them. [`ThreadPoolScheduler`] is the
//! stock implementation; anything honoring the profiles will do.
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use tracing::error;

use crate::error::panic_message;
use crate::Error;

mod builder;
mod pool;
mod trampoline;

pub use builder::SchedulerBuilder;
pub use pool::ThreadPoolScheduler;

/// A unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// The kind of thread a unit of work should run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Profile {
    /// Computation. A fixed pool, one thread per core.
    #[default]
    Cpu,
    /// Blocking work. A pool that grows on demand and shrinks when idle.
    Io,
    /// Right now, on the calling thread.
    Immediate,
    /// On the calling thread, after the unit currently running there returns.
    Trampoline,
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Profile::Cpu => "cpu",
            Profile::Io => "io",
            Profile::Immediate => "immediate",
            Profile::Trampoline => "trampoline",
        };
        f.write_str(name)
    }
}

/// Runs units of work under an execution profile.
///
/// A scheduler must not lose work it accepted: every job handed to
/// [`schedule`](Scheduler::schedule) that returns `Ok` eventually runs on a
/// thread matching `profile`, unless the scheduler is torn down first.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, profile: Profile, job: Job) -> Result<(), Error>;
}

/// Runs everything on the calling thread.
///
/// `Cpu` and `Io` work runs inline like `Immediate`; `Trampoline` still
/// queues behind the unit already running. Handy for tests and for single
/// threaded programs.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentThreadScheduler;

impl Scheduler for CurrentThreadScheduler {
    fn schedule(&self, profile: Profile, job: Job) -> Result<(), Error> {
        match profile {
            Profile::Trampoline => trampoline::run(job),
            Profile::Cpu | Profile::Io | Profile::Immediate => run_job(job),
        }
        Ok(())
    }
}

/// Runs a job, keeping a panic from taking the thread down with it.
pub(crate) fn run_job(job: Job) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
        error!(message = %panic_message(&*payload), "scheduled job panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_current_thread_runs_inline() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        CurrentThreadScheduler
            .schedule(
                Profile::Cpu,
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_run_job_survives_panic() {
        run_job(Box::new(|| panic!("job failed")));
    }

    #[test]
    fn test_profile_display() {
        assert_eq!(Profile::Io.to_string(), "io");
        assert_eq!(Profile::default(), Profile::Cpu);
    }
}
