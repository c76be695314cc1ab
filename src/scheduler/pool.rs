use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use super::{run_job, trampoline, Job, Profile, Scheduler, SchedulerBuilder};
use crate::Error;

/// The stock [`Scheduler`]: thread pools for `Cpu` and `Io` work, the calling
/// thread for `Immediate` and `Trampoline` work.
///
/// Dropping the scheduler closes its queues. Workers finish the jobs already
/// queued and then exit.
///
/// # Examples
///
/// ```
/// use promises::scheduler::{Profile, Scheduler, ThreadPoolScheduler};
/// use std::sync::mpsc::channel;
///
/// let scheduler = ThreadPoolScheduler::builder().cpu_threads(2).build().unwrap();
/// let (tx, rx) = channel();
/// scheduler.schedule(Profile::Cpu, Box::new(move || tx.send(6 * 7).unwrap())).unwrap();
/// assert_eq!(rx.recv().unwrap(), 42);
/// ```
#[derive(Debug)]
pub struct ThreadPoolScheduler {
    cpu: FixedPool,
    io: ElasticPool,
}

impl ThreadPoolScheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    pub(super) fn new(config: SchedulerBuilder) -> Result<Self, Error> {
        let cpu = FixedPool::new(&config.thread_name, config.cpu_threads)?;
        let io = ElasticPool::new(&config.thread_name, config.io_keep_alive);
        debug!(cpu_threads = config.cpu_threads, "scheduler started");
        Ok(ThreadPoolScheduler { cpu, io })
    }
}

impl Scheduler for ThreadPoolScheduler {
    fn schedule(&self, profile: Profile, job: Job) -> Result<(), Error> {
        match profile {
            Profile::Cpu => self.cpu.execute(job),
            Profile::Io => self.io.execute(job),
            Profile::Immediate => {
                run_job(job);
                Ok(())
            }
            Profile::Trampoline => {
                trampoline::run(job);
                Ok(())
            }
        }
    }
}

/// A fixed number of workers sharing one queue.
#[derive(Debug)]
struct FixedPool {
    sender: Sender<Job>,
}

impl FixedPool {
    fn new(name: &str, threads: usize) -> Result<Self, Error> {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        for index in 0..threads {
            let receiver = receiver.clone();
            thread::Builder::new()
                .name(format!("{name}-cpu-{index}"))
                .spawn(move || {
                    for job in receiver.iter() {
                        run_job(job);
                    }
                    debug!("cpu worker exiting");
                })?;
        }
        Ok(FixedPool { sender })
    }

    fn execute(&self, job: Job) -> Result<(), Error> {
        self.sender.send(job).map_err(|_| Error::SchedulerShutdown)
    }
}

impl Drop for FixedPool {
    fn drop(&mut self) {
        if !self.sender.is_empty() {
            warn!(queued = self.sender.len(), "cpu pool dropped with queued work");
        }
    }
}

/// Workers are started when no idle one is around and retire after sitting
/// idle for `keep_alive`.
#[derive(Debug)]
struct ElasticPool {
    name: String,
    keep_alive: Duration,
    sender: Sender<Job>,
    receiver: Receiver<Job>,
    // Waiting workers that no submitted job has claimed yet.
    idle: Arc<AtomicUsize>,
    spawned: AtomicUsize,
}

impl ElasticPool {
    fn new(name: &str, keep_alive: Duration) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        ElasticPool {
            name: name.to_string(),
            keep_alive,
            sender,
            receiver,
            idle: Arc::new(AtomicUsize::new(0)),
            spawned: AtomicUsize::new(0),
        }
    }

    fn execute(&self, job: Job) -> Result<(), Error> {
        if claim(&self.idle).is_err() {
            self.spawn_worker()?;
        }
        self.sender.send(job).map_err(|_| Error::SchedulerShutdown)
    }

    fn spawn_worker(&self) -> Result<(), Error> {
        let index = self.spawned.fetch_add(1, Ordering::Relaxed);
        let receiver = self.receiver.clone();
        let idle = self.idle.clone();
        let keep_alive = self.keep_alive;
        thread::Builder::new()
            .name(format!("{}-io-{index}", self.name))
            .spawn(move || {
                debug!(index, "io worker started");
                loop {
                    match receiver.recv_timeout(keep_alive) {
                        Ok(job) => {
                            run_job(job);
                            idle.fetch_add(1, Ordering::SeqCst);
                        }
                        // A job may have claimed this worker in the meantime;
                        // only retire if nobody did.
                        Err(RecvTimeoutError::Timeout) => {
                            if claim(&idle).is_ok() {
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!(index, "io worker exiting");
            })?;
        Ok(())
    }
}

fn claim(idle: &AtomicUsize) -> Result<usize, usize> {
    idle.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
}
