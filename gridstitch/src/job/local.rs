//! Local OS-process execution.
//!
//! The local processor spawns the job's executable with the builder-produced
//! argv, capturing stdout and stderr as separate pipes. While waiting for
//! termination the monitor keeps draining any stream that has not been
//! claimed through [`JobMonitor::stdout`]/[`JobMonitor::stderr`] into the
//! orchestrator's own stdout/stderr; a child whose pipe buffers fill would
//! otherwise deadlock.

use super::{Job, JobMonitor, OutputStream, Processor, SchedulerError};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Runs jobs as local child processes.
pub struct LocalProcessor;

#[async_trait]
impl Processor for LocalProcessor {
    async fn start(&self, job: Job) -> Result<Box<dyn JobMonitor>, SchedulerError> {
        let cmdline = job.command_line()?;
        if job.executable.is_empty() {
            return Err(SchedulerError::NotExecutable(job.name));
        }
        info!("Execute {} {:?}", job.executable, cmdline);

        let mut child = Command::new(&job.executable)
            .args(&cmdline)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SchedulerError::Spawn {
                executable: job.executable.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or(SchedulerError::Pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(SchedulerError::Pipe("stderr"))?;
        Ok(Box::new(LocalMonitor {
            name: job.name,
            child,
            stdout: Some(stdout),
            stderr: Some(stderr),
        }))
    }
}

/// Monitor over a spawned child process.
struct LocalMonitor {
    name: String,
    child: Child,
    stdout: Option<tokio::process::ChildStdout>,
    stderr: Option<tokio::process::ChildStderr>,
}

/// Copies a child stream to our stdout until it closes.
fn drain_stdout(stream: impl AsyncRead + Send + Unpin + 'static) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        if let Err(err) = tokio::io::copy(&mut reader, &mut tokio::io::stdout()).await {
            warn!("error draining child stdout: {err}");
        }
    })
}

/// Copies a child stream to our stderr until it closes.
fn drain_stderr(stream: impl AsyncRead + Send + Unpin + 'static) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        if let Err(err) = tokio::io::copy(&mut reader, &mut tokio::io::stderr()).await {
            warn!("error draining child stderr: {err}");
        }
    })
}

#[async_trait]
impl JobMonitor for LocalMonitor {
    async fn stdout(&mut self) -> Result<OutputStream, SchedulerError> {
        let stream = self
            .stdout
            .take()
            .ok_or(SchedulerError::OutputUnavailable("stdout"))?;
        Ok(Box::new(BufReader::new(stream)))
    }

    async fn stderr(&mut self) -> Result<OutputStream, SchedulerError> {
        let stream = self
            .stderr
            .take()
            .ok_or(SchedulerError::OutputUnavailable("stderr"))?;
        Ok(Box::new(BufReader::new(stream)))
    }

    async fn wait(&mut self) -> Result<(), SchedulerError> {
        let mut drains = Vec::new();
        if let Some(stream) = self.stdout.take() {
            drains.push(drain_stdout(stream));
        }
        if let Some(stream) = self.stderr.take() {
            drains.push(drain_stderr(stream));
        }

        let status = self.child.wait().await?;
        // The pipes close when the child exits, so the drains finish on
        // their own shortly after.
        for drain in drains {
            if let Err(err) = drain.await {
                warn!("output drain task failed: {err}");
            }
        }

        if !status.success() {
            return Err(SchedulerError::NonZeroExit {
                name: self.name.clone(),
                status: status.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{ArgRegistry, JobArgs};
    use crate::job::CommandBuilder;
    use std::sync::Arc;
    use tokio::io::AsyncBufReadExt;

    struct StaticCommand(Vec<String>);

    impl CommandBuilder for StaticCommand {
        fn build(&self, _args: &JobArgs) -> Result<Vec<String>, SchedulerError> {
            Ok(self.0.clone())
        }
    }

    fn shell_job(name: &str, script: &str) -> Job {
        Job {
            name: name.into(),
            executable: "/bin/sh".into(),
            args: JobArgs::new(Arc::new(ArgRegistry::new())),
            builder: Some(Arc::new(StaticCommand(vec![
                "-c".to_string(),
                script.to_string(),
            ]))),
        }
    }

    #[tokio::test]
    async fn test_run_successful_process() {
        LocalProcessor.run(shell_job("ok", "exit 0")).await.unwrap();
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_an_error() {
        let err = LocalProcessor
            .run(shell_job("fails", "exit 3"))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NonZeroExit { name, .. } if name == "fails"));
    }

    #[tokio::test]
    async fn test_spawn_error_is_surfaced() {
        let mut job = shell_job("missing", "exit 0");
        job.executable = "/nonexistent/binary".into();
        let err = LocalProcessor.run(job).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_stdout_can_be_claimed_once() {
        let mut monitor = LocalProcessor
            .start(shell_job("echoes", "echo hello"))
            .await
            .unwrap();

        let mut stdout = monitor.stdout().await.unwrap();
        let mut line = String::new();
        stdout.read_line(&mut line).await.unwrap();
        assert_eq!(line.trim(), "hello");

        assert!(matches!(
            monitor.stdout().await,
            Err(SchedulerError::OutputUnavailable("stdout"))
        ));
        monitor.wait().await.unwrap();
    }
}
