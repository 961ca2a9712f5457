//! Parallel job processing over a bounded worker pool.
//!
//! A [`ParallelProcessor`] fans one job out into subjobs produced by a
//! [`Splitter`] and runs them through an inner processor, at most
//! `maxRunningJobs` at a time:
//!
//! 1. Workers advertise themselves on a pool channel whenever they are idle.
//! 2. The splitter runs on its own task, publishing subjobs onto a channel
//!    bounded by `jobQueueSize`; the channel closes when it finishes.
//! 3. The dispatch loop pairs each subjob with an idle worker until the
//!    subjob channel drains, then signals all workers to stop and awaits
//!    them.
//!
//! Both channels are bounded, so a splitter that outruns the workers blocks
//! on send and the two rates match naturally. Submission order is preserved
//! up to the dispatch handoff; completion order is not guaranteed.
//!
//! A failing subjob does not abort the stream: the pool keeps draining,
//! remembers the last error seen, and returns it once everything has been
//! dispatched. Partial pipeline progress is preserved deliberately, since
//! completed subjobs have already persisted their outputs.

use super::{Job, JobMonitor, Processor, SchedulerError, Splitter};
use crate::config::Config;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type ErrorSlot = Arc<Mutex<Option<SchedulerError>>>;

/// Fans a job out through a splitter and a bounded worker pool.
pub struct ParallelProcessor {
    inner: Arc<dyn Processor>,
    splitter: Arc<dyn Splitter>,
    resources: Config,
}

impl ParallelProcessor {
    /// Creates a processor that splits each job and runs the subjobs through
    /// `inner`. Worker count and queue capacity come from the
    /// `maxRunningJobs` and `jobQueueSize` resource keys.
    pub fn new(inner: Arc<dyn Processor>, splitter: Arc<dyn Splitter>, resources: Config) -> Self {
        Self {
            inner,
            splitter,
            resources,
        }
    }
}

#[async_trait]
impl Processor for ParallelProcessor {
    async fn start(&self, job: Job) -> Result<Box<dyn JobMonitor>, SchedulerError> {
        let inner = Arc::clone(&self.inner);
        let splitter = Arc::clone(&self.splitter);
        let resources = self.resources.clone();
        let handle = tokio::spawn(dispatch(inner, splitter, resources, job));
        Ok(Box::new(ParallelMonitor {
            handle: Some(handle),
        }))
    }
}

/// Monitor over the background dispatch task.
struct ParallelMonitor {
    handle: Option<JoinHandle<Result<(), SchedulerError>>>,
}

#[async_trait]
impl JobMonitor for ParallelMonitor {
    async fn wait(&mut self) -> Result<(), SchedulerError> {
        match self.handle.take() {
            Some(handle) => handle
                .await
                .unwrap_or_else(|err| Err(SchedulerError::Task(err.to_string()))),
            // Already awaited.
            None => Ok(()),
        }
    }
}

async fn dispatch(
    inner: Arc<dyn Processor>,
    splitter: Arc<dyn Splitter>,
    resources: Config,
    job: Job,
) -> Result<(), SchedulerError> {
    let max_running = resources.get_int("maxRunningJobs").max(1) as usize;
    let queue_size = resources.get_int("jobQueueSize").max(1) as usize;
    let last_error: ErrorSlot = Arc::new(Mutex::new(None));
    let stop = CancellationToken::new();

    let (pool_tx, mut pool_rx) = mpsc::channel::<mpsc::Sender<Job>>(max_running);
    let mut workers = Vec::with_capacity(max_running);
    for worker in 0..max_running {
        workers.push(tokio::spawn(worker_loop(
            worker,
            Arc::clone(&inner),
            pool_tx.clone(),
            stop.clone(),
            Arc::clone(&last_error),
        )));
    }
    drop(pool_tx);

    let (subjob_tx, mut subjob_rx) = mpsc::channel::<Job>(queue_size);
    let splitter_error = Arc::clone(&last_error);
    let splitter_task = tokio::spawn(async move {
        if let Err(err) = splitter.split(&job, &subjob_tx).await {
            warn!("error splitting {}: {err}", job.name);
            *splitter_error.lock().await = Some(err);
        }
        // subjob_tx drops here, closing the channel.
    });

    while let Some(subjob) = subjob_rx.recv().await {
        let Some(worker) = pool_rx.recv().await else {
            break;
        };
        if worker.send(subjob).await.is_err() {
            warn!("worker exited before accepting its subjob");
        }
    }

    stop.cancel();
    drop(pool_rx);
    if let Err(err) = splitter_task.await {
        warn!("splitter task failed: {err}");
    }
    for worker in workers {
        if let Err(err) = worker.await {
            warn!("worker task failed: {err}");
        }
    }

    let result = match last_error.lock().await.take() {
        Some(err) => Err(err),
        None => Ok(()),
    };
    result
}

async fn worker_loop(
    worker: usize,
    inner: Arc<dyn Processor>,
    pool: mpsc::Sender<mpsc::Sender<Job>>,
    stop: CancellationToken,
    last_error: ErrorSlot,
) {
    let (job_tx, mut job_rx) = mpsc::channel::<Job>(1);
    loop {
        // Tell the dispatcher this worker is ready to accept more work.
        if pool.send(job_tx.clone()).await.is_err() {
            break;
        }
        tokio::select! {
            // Biased so a subjob handed over right before shutdown is still
            // picked up instead of being lost to the stop signal.
            biased;
            received = job_rx.recv() => {
                let Some(subjob) = received else { break };
                debug!(worker, "Run Job: {}", subjob.name);
                if let Err(err) = inner.run(subjob).await {
                    warn!(worker, "{err}");
                    *last_error.lock().await = Some(err);
                }
            }
            _ = stop.cancelled() => break,
        }
    }
}
