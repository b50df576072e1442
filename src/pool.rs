//! A bounded pool of reusable worker threads with typed, per-task result channels.
//!
//! Workers are spawned lazily, up to a maximum, and each one completes a `Ready`
//! handshake before it is handed any work. Idle workers are reused first. When every
//! worker is busy and the pool is full, callers wait on a condition variable in bounded
//! steps until a worker frees up or their deadline passes.
//!
//! A submitted task receives a [`ProgressSender`] for `Progress` and `Heartbeat` messages
//! and finishes with `Done` or `Error`. Panics inside a task are caught and reported as
//! `Error`. The worker is marked idle again on every exit path of a task.
//!
//! ```text
//!  caller ── submit(task) ──▶ acquire idle worker ──▶ job channel ──▶ worker thread
//!    ▲                                                                    │
//!    └──────────── TaskHandle::wait(timeout) ◀── result channel ◀──────────┘
//! ```

use crate::{Deadline, TaskError};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// A message from a worker to the caller that submitted a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage<T> {
    /// The worker finished starting up.
    Ready,
    /// The worker is alive and has started the task.
    Heartbeat,
    /// The task's progress in percent.
    Progress(u8),
    /// The task's result.
    Done(T),
    /// The task failed or panicked.
    Error(String),
}

/// The bookkeeping of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PooledWorker {
    /// The worker's id, unique within its pool.
    pub id: usize,
    /// Whether the worker is running a task.
    pub busy: bool,
    /// When the worker last became idle (or was spawned).
    pub last_used_at: Instant,
}

/// Configuration for a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// The maximum number of workers.
    max_workers: usize,
    /// How long to wait for a new worker's `Ready` message.
    spawn_timeout: Duration,
    /// The longest single wait for a worker to become idle before rechecking.
    poll_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let parallelism = thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        Self {
            max_workers: parallelism.clamp(2, 4),
            spawn_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl PoolConfig {
    /// Creates a new [`PoolConfig`] with the default values.
    ///
    /// The default maximum number of workers is `min(4, max(2, available_parallelism))`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of workers. Values below `1` are treated as `1`.
    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Sets how long to wait for a newly spawned worker to report `Ready`.
    ///
    /// The default is 2 seconds.
    #[must_use]
    pub fn with_spawn_timeout(mut self, timeout: Duration) -> Self {
        self.spawn_timeout = timeout;
        self
    }

    /// Sets the longest single wait for a busy worker to free up before rechecking.
    ///
    /// The default is 10 milliseconds.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The maximum number of workers.
    #[must_use]
    pub const fn max_workers(&self) -> usize {
        self.max_workers
    }
}

/// A unit of work sent to a worker thread.
type Job = Box<dyn FnOnce() + Send>;

/// A spawned worker.
struct Worker {
    /// The worker's bookkeeping.
    info: PooledWorker,
    /// Sends jobs to the worker thread.
    jobs: Sender<Job>,
    /// The worker thread.
    thread: JoinHandle<()>,
}

/// The mutable state of the pool.
struct State {
    /// Every live worker.
    workers: Vec<Worker>,
    /// The id of the next worker to spawn.
    next_id: usize,
    /// Slots reserved by callers that are spawning a worker outside the lock.
    spawning: usize,
    /// Whether [`WorkerPool::shutdown`] was called.
    shut_down: bool,
}

/// State shared between the pool and the jobs running on its workers.
struct Shared {
    /// The pool state. All busy/idle transitions happen under this lock.
    state: Mutex<State>,
    /// Signaled whenever a worker becomes idle.
    freed: Condvar,
}

impl Shared {
    /// Marks the worker idle and wakes one waiting caller.
    fn release(&self, id: usize) {
        let mut state = self.state.lock();
        if let Some(worker) = state.workers.iter_mut().find(|worker| worker.info.id == id) {
            worker.info.busy = false;
            worker.info.last_used_at = Instant::now();
        }
        drop(state);
        self.freed.notify_one();
    }
}

/// Releases a worker when dropped, including when the job is dropped without running.
struct Release {
    /// The pool state.
    shared: Arc<Shared>,
    /// The worker to release.
    id: usize,
}

impl Drop for Release {
    fn drop(&mut self) {
        self.shared.release(self.id);
    }
}

/// Lets a running task report progress to the caller.
#[derive(Debug)]
pub struct ProgressSender<T> {
    /// The task's result channel.
    sender: Sender<WorkerMessage<T>>,
}

impl<T> ProgressSender<T> {
    /// Reports progress in percent (clamped to `100`).
    pub fn progress(&self, percent: u8) {
        self.send(WorkerMessage::Progress(percent.min(100)));
    }

    /// Reports that the task is still alive.
    pub fn heartbeat(&self) {
        self.send(WorkerMessage::Heartbeat);
    }

    /// Sends a message. A caller that stopped listening is not an error.
    fn send(&self, message: WorkerMessage<T>) {
        let _ = self.sender.send(message);
    }
}

/// A handle to a submitted task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    /// The id of the worker running the task.
    worker: usize,
    /// The task's result channel.
    receiver: Receiver<WorkerMessage<T>>,
}

impl<T> TaskHandle<T> {
    /// The id of the worker running the task.
    #[must_use]
    pub const fn worker(&self) -> usize {
        self.worker
    }

    /// Waits up to `timeout` for the task's result, skipping liveness and progress messages.
    ///
    /// Dropping the handle (or timing out) abandons the task: the worker still runs it
    /// to completion and then becomes idle, but its result is discarded.
    ///
    /// # Errors
    /// Returns [`TaskError::Timeout`] if no result arrives in time, [`TaskError::Failed`]
    /// if the task failed or panicked, or [`TaskError::Disconnected`] if the worker went away.
    pub fn wait(self, timeout: Duration) -> Result<T, TaskError> {
        let deadline = Deadline::after(timeout);
        loop {
            match self.receiver.recv_timeout(deadline.clamp(timeout)) {
                Ok(WorkerMessage::Done(value)) => return Ok(value),
                Ok(WorkerMessage::Error(message)) => return Err(TaskError::Failed(message)),
                Ok(WorkerMessage::Progress(percent)) => {
                    trace!(worker = self.worker, percent, "task progress");
                }
                Ok(WorkerMessage::Ready | WorkerMessage::Heartbeat) => {}
                Err(RecvTimeoutError::Timeout) => return Err(TaskError::Timeout(timeout)),
                Err(RecvTimeoutError::Disconnected) => return Err(TaskError::Disconnected),
            }
        }
    }
}

/// A bounded pool of reusable worker threads.
///
/// The pool is an owned object: create one (usually via a [`Scheduler`](crate::Scheduler)),
/// share it by reference, and call [`WorkerPool::shutdown`] (or drop it) when done.
pub struct WorkerPool {
    /// The pool configuration.
    config: PoolConfig,
    /// The pool state.
    shared: Arc<Shared>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("workers", &self.workers())
            .finish()
    }
}

impl WorkerPool {
    /// Creates a new, empty [`WorkerPool`]. No threads are spawned until work is submitted.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(State { workers: Vec::new(), next_id: 0, spawning: 0, shut_down: false }),
                freed: Condvar::new(),
            }),
        }
    }

    /// The pool configuration.
    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// A snapshot of every live worker.
    #[must_use]
    pub fn workers(&self) -> Vec<PooledWorker> {
        self.shared.state.lock().workers.iter().map(|worker| worker.info).collect()
    }

    /// Runs `task` on an idle worker, spawning one if the pool is not yet full.
    ///
    /// If every worker is busy, this waits until one frees up or `deadline` passes.
    ///
    /// # Errors
    /// Returns [`TaskError::Unavailable`] if no worker became idle before the deadline,
    /// [`TaskError::ShutDown`] if the pool was shut down,
    /// or [`TaskError::Disconnected`] if the chosen worker thread has died.
    pub fn submit<T, F>(&self, task: F, deadline: &Deadline) -> Result<TaskHandle<T>, TaskError>
    where
        T: Send + 'static,
        F: FnOnce(&ProgressSender<T>) -> Result<T, String> + Send + 'static,
    {
        let (id, jobs) = self.acquire(deadline)?;
        let release = Release { shared: Arc::clone(&self.shared), id };
        let (sender, receiver) = mpsc::channel();

        let job: Job = Box::new(move || {
            let progress = ProgressSender { sender };
            progress.heartbeat();
            let message = match panic::catch_unwind(AssertUnwindSafe(|| task(&progress))) {
                Ok(Ok(value)) => WorkerMessage::Done(value),
                Ok(Err(message)) => WorkerMessage::Error(message),
                Err(payload) => WorkerMessage::Error(panic_message(payload.as_ref())),
            };
            // idle before the result is visible, so a caller reacting to it can reuse this worker
            drop(release);
            progress.send(message);
        });

        if jobs.send(job).is_err() {
            warn!(worker = id, "worker thread is gone, removing it from the pool");
            self.shared.state.lock().workers.retain(|worker| worker.info.id != id);
            self.shared.freed.notify_one();
            return Err(TaskError::Disconnected);
        }

        Ok(TaskHandle { worker: id, receiver })
    }

    /// Marks an idle worker busy, spawning a worker or waiting for one as needed.
    ///
    /// Spawning reserves a slot and runs the handshake without holding the state lock,
    /// so finishing workers can still mark themselves idle in the meantime.
    fn acquire(&self, deadline: &Deadline) -> Result<(usize, Sender<Job>), TaskError> {
        let mut spawn_failed = false;
        let mut state = self.shared.state.lock();
        loop {
            if state.shut_down {
                return Err(TaskError::ShutDown);
            }

            if let Some(worker) = state.workers.iter_mut().find(|worker| !worker.info.busy) {
                worker.info.busy = true;
                return Ok((worker.info.id, worker.jobs.clone()));
            }

            if !spawn_failed && state.workers.len() + state.spawning < self.config.max_workers {
                let id = state.next_id;
                state.next_id += 1;
                state.spawning += 1;
                let spawned = MutexGuard::unlocked(&mut state, || self.spawn(id));
                state.spawning -= 1;

                match spawned {
                    Ok(_) if state.shut_down => return Err(TaskError::ShutDown),
                    Ok(mut worker) => {
                        worker.info.busy = true;
                        let jobs = worker.jobs.clone();
                        state.workers.push(worker);
                        debug!(worker = id, total = state.workers.len(), "spawned worker");
                        return Ok((id, jobs));
                    }
                    Err(error) => {
                        warn!(worker = id, %error, "failed to spawn worker");
                        self.shared.freed.notify_one();
                        if state.workers.is_empty() && state.spawning == 0 {
                            return Err(TaskError::Unavailable);
                        }
                        spawn_failed = true;
                    }
                }
                continue;
            }

            if deadline.expired() {
                return Err(TaskError::Unavailable);
            }
            let wait = deadline.clamp(self.config.poll_interval);
            let _ = self.shared.freed.wait_for(&mut state, wait);
        }
    }

    /// Spawns a worker thread and waits for its `Ready` message.
    fn spawn(&self, id: usize) -> Result<Worker, TaskError> {
        let (jobs, job_receiver) = mpsc::channel::<Job>();
        let (ready, ready_receiver) = mpsc::channel::<WorkerMessage<()>>();

        let thread = thread::Builder::new()
            .name(format!("pixpress-worker-{id}"))
            .spawn(move || {
                let _ = ready.send(WorkerMessage::Ready);
                drop(ready);
                while let Ok(job) = job_receiver.recv() {
                    job();
                }
            })
            .map_err(|error| TaskError::Failed(error.to_string()))?;

        match ready_receiver.recv_timeout(self.config.spawn_timeout) {
            Ok(WorkerMessage::Ready) => Ok(Worker {
                info: PooledWorker { id, busy: false, last_used_at: Instant::now() },
                jobs,
                thread,
            }),
            // dropping `jobs` makes the thread exit once it does start
            Ok(_) | Err(RecvTimeoutError::Timeout) => Err(TaskError::Timeout(self.config.spawn_timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(TaskError::Disconnected),
        }
    }

    /// Stops accepting work and joins every worker thread.
    ///
    /// Tasks that are already running are allowed to finish.
    pub fn shutdown(&self) {
        let workers = {
            let mut state = self.shared.state.lock();
            state.shut_down = true;
            std::mem::take(&mut state.workers)
        };
        self.shared.freed.notify_all();

        let count = workers.len();
        for Worker { info, jobs, thread } in workers {
            drop(jobs);
            if thread.join().is_err() {
                warn!(worker = info.id, "worker thread panicked");
            }
        }
        debug!(workers = count, "worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Extracts the message of a caught panic.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_owned()
    }
}
