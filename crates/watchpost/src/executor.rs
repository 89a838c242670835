//! Key-deduplicating executor.
//!
//! Dispatches check bodies to one of two back-ends: a fixed pool of worker
//! threads for synchronous bodies, and the tokio runtime for asynchronous
//! bodies. Submissions are keyed; while a job for a key is in flight, every
//! further submit for that key receives the same shared future.
//!
//! One mutex protects the in-flight map and the rolling counters. It is
//! taken only at state transitions (submit, completion) and never while
//! user code runs.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::check::{CheckOutput, CheckReturn};
use crate::error::CheckError;
use crate::result::CheckId;

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Worker threads for synchronous check bodies.
    pub workers: usize,

    /// Queued (not yet started) synchronous jobs before submits push back.
    pub queue_limit: usize,

    /// How long a submit may block on a saturated queue before rejecting.
    pub submit_patience: Duration,

    /// Errored-job entries retained for the debug endpoint.
    pub errored_retention: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let cpus = thread::available_parallelism().map(|n| n.get()).unwrap_or(2);
        Self {
            workers: cpus * 2,
            queue_limit: 256,
            submit_patience: Duration::from_millis(50),
            errored_retention: 100,
        }
    }
}

/// Identifies one (check, target environment) execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub check_id: CheckId,
    pub environment: String,
}

impl JobKey {
    pub fn new(check_id: CheckId, environment: impl Into<String>) -> Self {
        Self {
            check_id,
            environment: environment.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.check_id, self.environment)
    }
}

/// Terminal failure of one job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("{0}")]
    Check(#[from] CheckError),

    #[error("check panicked: {0}")]
    Panicked(String),

    #[error("check exceeded its {}ms deadline", .0.as_millis())]
    DeadlineExceeded(Duration),

    #[error("executor was shut down before the check completed")]
    ShutDown,
}

/// Submit-time rejection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("executor queue is saturated")]
    Saturated,

    #[error("executor is shut down")]
    ShutDown,
}

pub type JobResult = Result<CheckReturn, JobError>;

type SharedOutcome = Shared<BoxFuture<'static, Arc<JobResult>>>;

/// Await-able handle to an in-flight or completed job. Cloning yields the
/// same underlying future; duplicate submitters all see one execution.
#[derive(Clone)]
pub struct JobHandle {
    fut: SharedOutcome,
}

impl JobHandle {
    pub async fn outcome(&self) -> Arc<JobResult> {
        self.fut.clone().await
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle").finish_non_exhaustive()
    }
}

/// The work a check submission performs.
pub enum Job {
    /// Runs on the worker pool.
    Sync(Box<dyn FnOnce() -> CheckOutput + Send>),
    /// Runs as a task on the event loop.
    Async(BoxFuture<'static, CheckOutput>),
}

/// Rolling executor counters.
///
/// `completed` counts every finished job, errored ones included; `errored`
/// counts the failing subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ExecutorStatistics {
    pub running: u64,
    pub completed: u64,
    pub errored: u64,
}

/// One retained entry of the errored-job buffer.
#[derive(Debug, Clone)]
pub struct ErroredJob {
    pub key: JobKey,
    pub error: String,
    pub occurred_at: SystemTime,
}

struct WorkItem {
    key: JobKey,
    run: Box<dyn FnOnce() -> CheckOutput + Send>,
    tx: oneshot::Sender<Arc<JobResult>>,
    deadline: Option<(Instant, Duration)>,
}

struct ExecutorState {
    in_flight: HashMap<JobKey, JobHandle>,
    running: u64,
    completed: u64,
    errored: u64,
    errored_log: VecDeque<ErroredJob>,
    retention: usize,
}

struct Inner {
    state: Arc<Mutex<ExecutorState>>,
    accepting: AtomicBool,
    abort: Arc<AtomicBool>,
    work_tx: Mutex<Option<Sender<WorkItem>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    handle: tokio::runtime::Handle,
    submit_patience: Duration,
}

/// The dispatcher. Cheap to clone and share.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

impl Executor {
    /// Spawn the worker pool. Must be called from within a tokio runtime;
    /// asynchronous jobs are spawned onto the calling runtime.
    pub fn new(config: ExecutorConfig) -> Self {
        let state = Arc::new(Mutex::new(ExecutorState {
            in_flight: HashMap::new(),
            running: 0,
            completed: 0,
            errored: 0,
            errored_log: VecDeque::new(),
            retention: config.errored_retention,
        }));

        let (work_tx, work_rx) = crossbeam_channel::bounded::<WorkItem>(config.queue_limit);
        let abort = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(config.workers);
        for idx in 0..config.workers {
            let rx = work_rx.clone();
            let state = state.clone();
            let abort = abort.clone();
            let worker = thread::Builder::new()
                .name(format!("watchpost-worker-{idx}"))
                .spawn(move || worker_loop(rx, state, abort))
                .expect("failed to spawn executor worker thread");
            workers.push(worker);
        }

        info!(workers = config.workers, queue_limit = config.queue_limit, "Executor started");

        Self {
            inner: Arc::new(Inner {
                state,
                accepting: AtomicBool::new(true),
                abort,
                work_tx: Mutex::new(Some(work_tx)),
                workers: Mutex::new(workers),
                handle: tokio::runtime::Handle::current(),
                submit_patience: config.submit_patience,
            }),
        }
    }

    /// Submit a job. Never suspends: the caller gets a future to await.
    ///
    /// If a job for `key` is already in flight the existing handle is
    /// returned and `job` is dropped unexecuted.
    pub fn submit(
        &self,
        key: JobKey,
        job: Job,
        deadline: Option<Duration>,
    ) -> Result<JobHandle, SubmitError> {
        if !self.inner.accepting.load(Ordering::Acquire) {
            return Err(SubmitError::ShutDown);
        }

        let (handle, tx) = {
            let mut state = self.inner.state.lock().expect("executor state poisoned");
            if let Some(existing) = state.in_flight.get(&key) {
                debug!(key = %key, "Joining in-flight job");
                return Ok(existing.clone());
            }

            let (tx, rx) = oneshot::channel::<Arc<JobResult>>();
            let fut: BoxFuture<'static, Arc<JobResult>> = rx
                .map(|received| received.unwrap_or_else(|_| Arc::new(Err(JobError::ShutDown))))
                .boxed();
            let handle = JobHandle { fut: fut.shared() };
            state.in_flight.insert(key.clone(), handle.clone());
            state.running += 1;
            (handle, tx)
        };

        match job {
            Job::Async(fut) => {
                let state = self.inner.state.clone();
                let task_key = key.clone();
                self.inner.handle.spawn(async move {
                    let output = match deadline {
                        Some(limit) => match tokio::time::timeout(limit, fut).await {
                            Ok(output) => output.map_err(JobError::Check),
                            // Cancelled at the next suspension point.
                            Err(_) => Err(JobError::DeadlineExceeded(limit)),
                        },
                        None => fut.await.map_err(JobError::Check),
                    };
                    finish(&state, &task_key, output, tx);
                });
                Ok(handle)
            }
            Job::Sync(run) => {
                let item = WorkItem {
                    key: key.clone(),
                    run,
                    tx,
                    deadline: deadline.map(|d| (Instant::now() + d, d)),
                };

                let guard = self.inner.work_tx.lock().expect("executor sender poisoned");
                let Some(sender) = guard.as_ref() else {
                    self.rollback(&key);
                    return Err(SubmitError::ShutDown);
                };

                match sender.try_send(item) {
                    Ok(()) => Ok(handle),
                    Err(TrySendError::Full(item)) => {
                        // Backpressure: block briefly, then reject.
                        match sender.send_timeout(item, self.inner.submit_patience) {
                            Ok(()) => Ok(handle),
                            Err(_) => {
                                warn!(key = %key, "Executor queue saturated, rejecting submit");
                                self.rollback(&key);
                                Err(SubmitError::Saturated)
                            }
                        }
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        self.rollback(&key);
                        Err(SubmitError::ShutDown)
                    }
                }
            }
        }
    }

    fn rollback(&self, key: &JobKey) {
        let mut state = self.inner.state.lock().expect("executor state poisoned");
        state.in_flight.remove(key);
        state.running = state.running.saturating_sub(1);
    }

    pub fn statistics(&self) -> ExecutorStatistics {
        let state = self.inner.state.lock().expect("executor state poisoned");
        ExecutorStatistics {
            running: state.running,
            completed: state.completed,
            errored: state.errored,
        }
    }

    /// The most recent errored jobs, oldest first.
    pub fn errored_snapshot(&self) -> Vec<ErroredJob> {
        let state = self.inner.state.lock().expect("executor state poisoned");
        state.errored_log.iter().cloned().collect()
    }

    /// Stop accepting work. With `drain` the call waits for in-flight jobs
    /// to complete; without it, queued jobs are failed fast. Worker threads
    /// are joined either way.
    pub async fn shutdown(&self, drain: bool) {
        info!(drain, "Executor shutting down");
        self.inner.accepting.store(false, Ordering::Release);
        if !drain {
            self.inner.abort.store(true, Ordering::Relaxed);
        }

        // Closing the channel lets workers exit once the queue empties.
        let sender = self.inner.work_tx.lock().expect("executor sender poisoned").take();
        drop(sender);

        if drain {
            loop {
                let running = {
                    let state = self.inner.state.lock().expect("executor state poisoned");
                    state.running
                };
                if running == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        let workers = std::mem::take(&mut *self.inner.workers.lock().expect("executor workers poisoned"));
        let _ = tokio::task::spawn_blocking(move || {
            for worker in workers {
                let _ = worker.join();
            }
        })
        .await;
        info!("Executor stopped");
    }
}

fn worker_loop(rx: Receiver<WorkItem>, state: Arc<Mutex<ExecutorState>>, abort: Arc<AtomicBool>) {
    while let Ok(item) = rx.recv() {
        if abort.load(Ordering::Relaxed) {
            finish(&state, &item.key, Err(JobError::ShutDown), item.tx);
            continue;
        }

        // A job that expired while queued is not worth starting. Once the
        // body runs, the deadline is soft: the check is expected to honor
        // its own timeouts.
        if let Some((deadline, limit)) = item.deadline {
            if Instant::now() > deadline {
                finish(&state, &item.key, Err(JobError::DeadlineExceeded(limit)), item.tx);
                continue;
            }
        }

        let output = match catch_unwind(AssertUnwindSafe(item.run)) {
            Ok(output) => output.map_err(JobError::Check),
            Err(panic) => Err(JobError::Panicked(panic_message(panic))),
        };
        finish(&state, &item.key, output, item.tx);
    }
}

fn finish(
    state: &Mutex<ExecutorState>,
    key: &JobKey,
    output: JobResult,
    tx: oneshot::Sender<Arc<JobResult>>,
) {
    let output = Arc::new(output);
    {
        let mut state = state.lock().expect("executor state poisoned");
        state.in_flight.remove(key);
        state.running = state.running.saturating_sub(1);
        state.completed += 1;
        if let Err(error) = output.as_ref() {
            state.errored += 1;
            state.errored_log.push_back(ErroredJob {
                key: key.clone(),
                error: error.to_string(),
                occurred_at: SystemTime::now(),
            });
            while state.errored_log.len() > state.retention {
                state.errored_log.pop_front();
            }
        }
    }
    // Receiver may be gone when the poll was cancelled; the result is still
    // accounted for above.
    let _ = tx.send(output);
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
