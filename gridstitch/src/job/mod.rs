//! Job model and processor capabilities.
//!
//! A [`Job`] is the unit of work: a name, an optional executable, a snapshot
//! of typed arguments, and a [`CommandBuilder`] that turns those arguments
//! into argv tokens for the external tool. Jobs are immutable once
//! submitted.
//!
//! Processors are composable: terminal processors execute a job as an OS
//! process ([`LocalProcessor`]) or a cluster job
//! ([`crate::cluster::GridProcessor`]); the [`ParallelProcessor`] fans a job
//! out through a [`Splitter`] and a bounded worker pool. Starting a job
//! yields a [`JobMonitor`] used to follow its output and await termination.

mod local;
mod parallel;

pub use local::LocalProcessor;
pub use parallel::ParallelProcessor;

use crate::args::{ArgError, JobArgs};
use crate::cluster::ClusterError;
use crate::igrid::GridError;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncBufRead;
use tokio::sync::mpsc;
use tracing::info;

/// Errors surfaced by job processing.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Preparing the command line failed.
    #[error("error preparing the command line arguments: {0}")]
    Cmdline(#[from] ArgError),

    /// The job has no executable or no command-line builder.
    #[error("job {0} is not executable")]
    NotExecutable(String),

    /// Spawning the child process failed.
    #[error("error starting {executable}: {source}")]
    Spawn {
        executable: String,
        source: std::io::Error,
    },

    /// Wiring a stdout/stderr pipe failed.
    #[error("error opening the command {0} pipe")]
    Pipe(&'static str),

    /// The child terminated with a non-zero status.
    #[error("{name} exited with {status}")]
    NonZeroExit { name: String, status: String },

    /// The requested output stream is not available on this job variant,
    /// or has already been claimed.
    #[error("{0} is not available for this job")]
    OutputUnavailable(&'static str),

    /// A semantic constraint failed before submission.
    #[error("{0}")]
    Validation(String),

    /// A background task was cancelled or panicked.
    #[error("background task failed: {0}")]
    Task(String),

    /// Cluster submission or polling failed.
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// A tile-grid file could not be processed.
    #[error(transparent)]
    Grid(#[from] GridError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A line-readable output stream of a running or completed job.
pub type OutputStream = Box<dyn AsyncBufRead + Send + Unpin>;

/// Builds the argv tokens for a specific external tool from a job's
/// arguments. One implementation exists per tool.
pub trait CommandBuilder: Send + Sync {
    fn build(&self, args: &JobArgs) -> Result<Vec<String>, SchedulerError>;
}

/// The unit of work.
#[derive(Clone)]
pub struct Job {
    /// Job name, also used to derive subjob names.
    pub name: String,
    /// Path of the external executable; empty for composite jobs.
    pub executable: String,
    /// Snapshot of the job's arguments.
    pub args: JobArgs,
    /// Builder producing argv for the executable, when there is one.
    pub builder: Option<Arc<dyn CommandBuilder>>,
}

impl Job {
    /// Renders the job's command line through its builder.
    pub fn command_line(&self) -> Result<Vec<String>, SchedulerError> {
        let builder = self
            .builder
            .as_ref()
            .ok_or_else(|| SchedulerError::NotExecutable(self.name.clone()))?;
        builder.build(&self.args)
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("executable", &self.executable)
            .finish_non_exhaustive()
    }
}

/// Follow-up handle for a started job.
#[async_trait]
pub trait JobMonitor: Send {
    /// Claims the job's standard output stream. At most one caller may take
    /// it; whoever does becomes responsible for draining it.
    async fn stdout(&mut self) -> Result<OutputStream, SchedulerError> {
        Err(SchedulerError::OutputUnavailable("stdout"))
    }

    /// Claims the job's standard error stream.
    async fn stderr(&mut self) -> Result<OutputStream, SchedulerError> {
        Err(SchedulerError::OutputUnavailable("stderr"))
    }

    /// Blocks until the job terminates, surfacing its final status.
    async fn wait(&mut self) -> Result<(), SchedulerError>;
}

/// Processes a single job.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Starts the job and returns as soon as it is underway; completion is
    /// observed through the returned monitor.
    async fn start(&self, job: Job) -> Result<Box<dyn JobMonitor>, SchedulerError>;

    /// Starts the job and waits for it to complete.
    async fn run(&self, job: Job) -> Result<(), SchedulerError> {
        let mut monitor = self.start(job).await?;
        monitor.wait().await
    }
}

/// Splits a job into a finite sequence of subjobs, published on a bounded
/// channel. Single pass; the receiver closes the channel after `split`
/// returns.
#[async_trait]
pub trait Splitter: Send + Sync {
    async fn split(&self, job: &Job, subjobs: &mpsc::Sender<Job>) -> Result<(), SchedulerError>;
}

/// A monitor for jobs that complete at start time.
struct CompletedMonitor;

#[async_trait]
impl JobMonitor for CompletedMonitor {
    async fn wait(&mut self) -> Result<(), SchedulerError> {
        Ok(())
    }
}

/// A processor that only prints the command line it would run.
pub struct EchoProcessor;

#[async_trait]
impl Processor for EchoProcessor {
    async fn start(&self, job: Job) -> Result<Box<dyn JobMonitor>, SchedulerError> {
        let cmdline = job.command_line()?;
        info!("Execute {} {} {:?}", job.name, job.executable, cmdline);
        Ok(Box::new(CompletedMonitor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::ArgRegistry;

    struct StaticCommand(Vec<String>);

    impl CommandBuilder for StaticCommand {
        fn build(&self, _args: &JobArgs) -> Result<Vec<String>, SchedulerError> {
            Ok(self.0.clone())
        }
    }

    fn job_with_builder() -> Job {
        Job {
            name: "test".into(),
            executable: "/bin/true".into(),
            args: JobArgs::new(Arc::new(ArgRegistry::new())),
            builder: Some(Arc::new(StaticCommand(vec!["-x".into()]))),
        }
    }

    #[test]
    fn test_command_line_requires_builder() {
        let mut job = job_with_builder();
        assert_eq!(job.command_line().unwrap(), vec!["-x".to_string()]);

        job.builder = None;
        assert!(matches!(
            job.command_line(),
            Err(SchedulerError::NotExecutable(name)) if name == "test"
        ));
    }

    #[tokio::test]
    async fn test_echo_processor_completes_immediately() {
        let processor = EchoProcessor;
        processor.run(job_with_builder()).await.unwrap();
    }

    #[tokio::test]
    async fn test_echo_monitor_has_no_output_streams() {
        let processor = EchoProcessor;
        let mut monitor = processor.start(job_with_builder()).await.unwrap();
        assert!(matches!(
            monitor.stdout().await,
            Err(SchedulerError::OutputUnavailable("stdout"))
        ));
    }
}
