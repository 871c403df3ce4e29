//! Fixed-size worker pool with in-place retry and two shutdown modes.
//!
//! This is the generic executor the sync orchestrator (§4.6) drives: a job
//! is an opaque, cancellation-aware unit of work; the pool runs exactly
//! `workers` tasks pulling from a bounded queue and reports one result per
//! submitted job.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::metrics::{self, JobOutcome};

/// A unit of work submitted to a [`WorkerPool`].
///
/// Implementations must treat `cancel` as cooperative: check it at
/// suspension points and return [`CoreError::Cancelled`] promptly once it
/// fires.
#[async_trait]
pub trait Job: Send + Sync {
    /// Stable identifier used to correlate submissions with results.
    fn id(&self) -> String;

    /// Run the job once. The pool wraps this in the retry loop of §4.2.
    async fn execute(&self, cancel: &CancellationToken) -> Result<(), CoreError>;
}

type BoxedJob = Box<dyn Job>;

/// Terminal outcome of one job, emitted exactly once per submission (unless
/// the pool is force-shut before the job is picked up).
#[derive(Debug)]
pub struct JobResult {
    pub job_id: String,
    pub outcome: Result<(), CoreError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolState {
    Created,
    Running,
    Draining,
    Aborted,
    Terminated,
}

/// Fixed-size parallel job executor. See module docs and §4.2 of the design
/// spec for the full state machine.
pub struct WorkerPool {
    workers: usize,
    queue_capacity: usize,
    max_retries: u32,
    state: RwLock<PoolState>,
    job_tx: AsyncMutex<Option<mpsc::Sender<BoxedJob>>>,
    job_rx: Arc<AsyncMutex<Option<mpsc::Receiver<BoxedJob>>>>,
    result_rx: AsyncMutex<Option<mpsc::Receiver<JobResult>>>,
    result_tx_template: AsyncMutex<Option<mpsc::Sender<JobResult>>>,
    cancel: CancellationToken,
    handles: AsyncMutex<Option<Vec<JoinHandle<()>>>>,
    shutdown_started: AtomicBool,
}

impl WorkerPool {
    /// `workers <= 0` coerces to 1; `queue_capacity <= 0` coerces to
    /// `2 * workers`.
    pub fn new(workers: i64, queue_capacity: i64, max_retries: u32) -> Self {
        let workers = if workers <= 0 { 1 } else { workers as usize };
        let queue_capacity = if queue_capacity <= 0 {
            2 * workers
        } else {
            queue_capacity as usize
        };

        let (job_tx, job_rx) = mpsc::channel(queue_capacity);
        let (result_tx, result_rx) = mpsc::channel(queue_capacity);

        Self {
            workers,
            queue_capacity,
            max_retries,
            state: RwLock::new(PoolState::Created),
            job_tx: AsyncMutex::new(Some(job_tx)),
            job_rx: Arc::new(AsyncMutex::new(Some(job_rx))),
            result_rx: AsyncMutex::new(Some(result_rx)),
            result_tx_template: AsyncMutex::new(Some(result_tx)),
            cancel: CancellationToken::new(),
            handles: AsyncMutex::new(None),
            shutdown_started: AtomicBool::new(false),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    fn state(&self) -> PoolState {
        *self.state.read().unwrap()
    }

    fn set_state(&self, state: PoolState) {
        *self.state.write().unwrap() = state;
    }

    /// `created -> running`; spawns exactly `workers` worker tasks.
    pub async fn start(&self) {
        if self.state() != PoolState::Created {
            return;
        }
        self.set_state(PoolState::Running);

        let job_rx = self.job_rx.lock().await.take().expect("pool already started");
        let job_rx = Arc::new(AsyncMutex::new(job_rx));

        // Taken out (not cloned from the field) so the struct holds no
        // Sender of its own once workers are spawned: the channel must
        // close as soon as the last worker-held clone drops, or a caller's
        // `results.recv()` drain loop after `shutdown()`/`shutdown_now()`
        // would block forever.
        let result_tx_template = self
            .result_tx_template
            .lock()
            .await
            .take()
            .expect("pool already started");

        let mut handles = Vec::with_capacity(self.workers);
        for worker_index in 0..self.workers {
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx_template.clone();
            let cancel = self.cancel.clone();
            let max_retries = self.max_retries;

            handles.push(tokio::spawn(async move {
                worker_loop(worker_index, job_rx, result_tx, cancel, max_retries).await;
            }));
        }
        drop(result_tx_template);

        *self.handles.lock().await = Some(handles);
        info!(workers = self.workers, queue_capacity = self.queue_capacity, "pool started");
    }

    /// While `running`, blocks on a full queue, then enqueues. In any other
    /// state, returns [`CoreError::PoolShuttingDown`] without enqueuing.
    pub async fn submit(&self, job: BoxedJob) -> Result<(), CoreError> {
        if self.state() != PoolState::Running {
            return Err(CoreError::PoolShuttingDown(job.id()));
        }

        let guard = self.job_tx.lock().await;
        match guard.as_ref() {
            Some(tx) => {
                let id = job.id();
                tx.send(job)
                    .await
                    .map_err(|_| CoreError::PoolShuttingDown(id))
            }
            None => Err(CoreError::PoolShuttingDown(job.id())),
        }
    }

    /// Take ownership of the result channel receiver. Callable once; later
    /// calls return `None`.
    pub async fn take_results(&self) -> Option<mpsc::Receiver<JobResult>> {
        self.result_rx.lock().await.take()
    }

    /// `running -> draining`; closes intake, waits for queued and in-flight
    /// jobs to finish, then closes the result channel. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutdown_started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_state(PoolState::Draining);
        // Dropping the sender closes intake; queued jobs already in the
        // channel buffer are still delivered to workers before recv()
        // observes the close.
        self.job_tx.lock().await.take();

        if let Some(handles) = self.handles.lock().await.take() {
            for handle in handles {
                let _ = handle.await;
            }
        }
        self.set_state(PoolState::Terminated);
        info!("pool drained and terminated");
    }

    /// `running -> aborted`; cancels the pool-wide token, closes intake, and
    /// waits for workers to observe cancellation and exit. Idempotent.
    pub async fn shutdown_now(&self) {
        if self.shutdown_started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_state(PoolState::Aborted);
        self.cancel.cancel();
        self.job_tx.lock().await.take();

        if let Some(handles) = self.handles.lock().await.take() {
            for handle in handles {
                let _ = handle.await;
            }
        }
        self.set_state(PoolState::Terminated);
        warn!("pool aborted and terminated");
    }
}

async fn worker_loop(
    worker_index: usize,
    job_rx: Arc<AsyncMutex<mpsc::Receiver<BoxedJob>>>,
    result_tx: mpsc::Sender<JobResult>,
    cancel: CancellationToken,
    max_retries: u32,
) {
    loop {
        let job = {
            let mut rx = job_rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };

        let job_id = job.id();
        debug!(worker_index, job_id = %job_id, "picked up job");
        let outcome = run_with_retry(job.as_ref(), &cancel, max_retries).await;

        metrics::record_job_outcome(if outcome.is_ok() {
            JobOutcome::Success
        } else if outcome.as_ref().err().map(CoreError::is_cancelled).unwrap_or(false) {
            JobOutcome::Cancelled
        } else {
            JobOutcome::Failed
        });

        if result_tx
            .send(JobResult {
                job_id,
                outcome,
            })
            .await
            .is_err()
        {
            // Result channel consumer gone; nothing left to do but stop.
            break;
        }
    }
}

/// For attempt `a` in `0..=max_retries`: check cancellation, run the job,
/// retry on failure with no delay (batch-level retries add delay; see
/// §4.3), and wrap the final failure in `RetryExhausted`.
async fn run_with_retry(
    job: &dyn Job,
    cancel: &CancellationToken,
    max_retries: u32,
) -> Result<(), CoreError> {
    let mut last_error = None;

    for attempt in 0..=max_retries {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled(job.id()));
        }

        match job.execute(cancel).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                if attempt < max_retries {
                    metrics::record_retry(attempt + 1);
                }
                last_error = Some(err);
            }
        }
    }

    let last_error = last_error.expect("loop runs at least once");
    Err(last_error.into_retry_exhausted(max_retries + 1))
}
