use std::thread;
use std::time::Duration;

use super::ThreadPoolScheduler;
use crate::Error;

/// Builder for configuring and creating a [`ThreadPoolScheduler`].
///
/// # Examples
///
/// ```
/// use promises::scheduler::SchedulerBuilder;
/// use std::time::Duration;
///
/// let scheduler = SchedulerBuilder::new()
///     .cpu_threads(2)
///     .io_keep_alive(Duration::from_secs(5))
///     .thread_name("fetch")
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct SchedulerBuilder {
    /// Number of threads in the CPU pool.
    pub(super) cpu_threads: usize,
    /// How long an idle IO thread waits for work before exiting.
    pub(super) io_keep_alive: Duration,
    /// Prefix of every worker thread name.
    pub(super) thread_name: String,
}

impl SchedulerBuilder {
    /// Creates a builder with default configuration.
    ///
    /// The CPU pool gets one thread per logical CPU, falling back to `1` if
    /// that is unknown. Idle IO threads live for 60 seconds.
    pub fn new() -> Self {
        let cpu_threads = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            cpu_threads,
            io_keep_alive: Duration::from_secs(60),
            thread_name: "promises".to_string(),
        }
    }

    /// Sets the number of CPU pool threads.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn cpu_threads(mut self, n: usize) -> Self {
        assert!(n > 0, "cpu_threads must be > 0");

        self.cpu_threads = n;
        self
    }

    pub fn io_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.io_keep_alive = keep_alive;
        self
    }

    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = prefix.into();
        self
    }

    /// Starts the CPU pool threads. IO threads are started on demand.
    pub fn build(self) -> Result<ThreadPoolScheduler, Error> {
        ThreadPoolScheduler::new(self)
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "cpu_threads must be > 0")]
    fn test_zero_cpu_threads() {
        let _ = SchedulerBuilder::new().cpu_threads(0);
    }

    #[test]
    fn test_defaults() {
        let builder = SchedulerBuilder::default();
        assert!(builder.cpu_threads >= 1);
        assert_eq!(builder.io_keep_alive, Duration::from_secs(60));
        assert_eq!(builder.thread_name, "promises");
    }
}
