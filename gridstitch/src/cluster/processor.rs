//! The grid processor: job submission and state polling over a DRMAA
//! session.

use super::{ClusterError, ClusterJob, DrmaaProxy, DrmaaSession, JobState, JobTemplate, PE_EXTENSION};
use crate::config::Config;
use crate::job::{Job, JobMonitor, OutputStream, Processor, SchedulerError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tracing::{info, warn};

/// Default per-job timeout when `jobTimeout` is unset.
pub const DEFAULT_JOB_TIMEOUT_SECS: i64 = 10_800;

/// Interval between job state polls.
pub const POLL_INTERVAL_SECS: u64 = 30;

/// Submits jobs through a DRMAA session and polls them to completion.
pub struct GridProcessor {
    session_name: String,
    accounting_id: String,
    resources: Config,
    session: Arc<dyn DrmaaSession>,
}

impl GridProcessor {
    /// Creates a grid processor bound to the process-wide session named
    /// `session_name`, creating that session through `proxy` on first use.
    pub async fn new(
        session_name: &str,
        accounting_id: &str,
        proxy: &dyn DrmaaProxy,
        resources: Config,
    ) -> Result<Self, ClusterError> {
        let session = super::session_for(session_name, proxy)
            .await
            .map_err(|err| {
                warn!("error creating session {session_name}: {err}");
                ClusterError::SessionUnavailable(session_name.to_string())
            })?;
        Ok(Self {
            session_name: session_name.to_string(),
            accounting_id: accounting_id.to_string(),
            resources,
            session,
        })
    }

    /// Closes the underlying session.
    pub async fn close_session(&self) -> Result<(), ClusterError> {
        super::close_session(&self.session_name).await
    }

    fn build_template(&self, job: &Job) -> Result<JobTemplate, SchedulerError> {
        let mut jt = JobTemplate {
            remote_command: job.executable.clone(),
            args: job.command_line()?,
            job_name: job.name.clone(),
            accounting_id: self.accounting_id.clone(),
            queue_name: self.resources.get_string("ugeQueue"),
            min_slots: self.resources.get_int("ugeMinSlots"),
            max_slots: self.resources.get_int("ugeMaxSlots"),
            resource_limits: self.resources.get_string_map("ugeResources"),
            job_environment: self.resources.get_string_map("ugeJobEnvironment"),
            output_path: self.resources.get_string("outputDir"),
            error_path: self.resources.get_string("errorDir"),
            ..Default::default()
        };
        jt.working_directory = self.resources.get_string("workingDir");
        if jt.working_directory.is_empty() {
            jt.working_directory = match std::env::current_dir() {
                Ok(dir) => dir.display().to_string(),
                Err(err) => {
                    warn!("error retrieving the working directory: {err}");
                    ".".to_string()
                }
            };
        }
        jt.set_extension(
            PE_EXTENSION,
            &self.resources.get_string("ugeParallelEnvironment"),
        );
        Ok(jt)
    }

    fn job_timeout(&self) -> i64 {
        match self.resources.get_int("jobTimeout") {
            0 => DEFAULT_JOB_TIMEOUT_SECS,
            timeout => timeout,
        }
    }
}

#[async_trait]
impl Processor for GridProcessor {
    async fn start(&self, job: Job) -> Result<Box<dyn JobMonitor>, SchedulerError> {
        let jt = self.build_template(&job)?;
        for dir in [&jt.output_path, &jt.error_path] {
            if !dir.is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let timeout = self.job_timeout();

        info!(
            "Submit ({}-{}) {} {} {:?}",
            jt.min_slots, jt.max_slots, job.name, job.executable, jt.args
        );
        let submitted = self.session.run_job(&jt).await?;
        info!("Submitted job {}", submitted.id);

        wait_for_state(
            self.session.as_ref(),
            &submitted,
            Some(JobState::Running),
            timeout,
        )
        .await?;

        Ok(Box::new(GridMonitor {
            session: Arc::clone(&self.session),
            template: jt,
            job: submitted,
            timeout,
        }))
    }
}

/// Polls the session until the job reaches `desired` (when given), `Done`,
/// or `Failed`; a positive `timeout_secs` bounds the whole wait.
async fn wait_for_state(
    session: &dyn DrmaaSession,
    job: &ClusterJob,
    desired: Option<JobState>,
    timeout_secs: i64,
) -> Result<bool, ClusterError> {
    let poll = async {
        loop {
            tokio::time::sleep(Duration::from_secs(POLL_INTERVAL_SECS)).await;
            let state = session
                .job_state(job)
                .await
                .map_err(|err| ClusterError::Status {
                    id: job.id.clone(),
                    message: err.to_string(),
                })?;
            if desired == Some(state) {
                return Ok(true);
            }
            match state {
                JobState::Done => return Ok(false),
                JobState::Failed => return Err(ClusterError::JobFailed(job.id.clone())),
                _ => {}
            }
        }
    };

    if timeout_secs > 0 {
        match tokio::time::timeout(Duration::from_secs(timeout_secs as u64), poll).await {
            Ok(result) => result,
            Err(_) => Err(ClusterError::Timeout(job.id.clone())),
        }
    } else {
        poll.await
    }
}

/// Monitor over a submitted grid job. Output is read back from the
/// scheduler-captured `<dir>/*.o<jobID>` and `<dir>/*.e<jobID>` files.
struct GridMonitor {
    session: Arc<dyn DrmaaSession>,
    template: JobTemplate,
    job: ClusterJob,
    timeout: i64,
}

impl GridMonitor {
    async fn open_captured(&self, dir: &str, kind: char) -> Result<OutputStream, SchedulerError> {
        let dir = if dir.is_empty() {
            self.template.working_directory.as_str()
        } else {
            dir
        };
        let path = resolve_captured_file(dir, &format!(".{kind}{}", self.job.id))?;
        info!("Opening {}", path.display());
        let file = tokio::fs::File::open(&path).await?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Finds the single file under `dir` matching `*<suffix>`.
fn resolve_captured_file(dir: &str, suffix: &str) -> Result<PathBuf, ClusterError> {
    let dir = dir.trim_end_matches('/');
    let pattern = format!("{dir}/*{suffix}");
    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().ends_with(suffix) {
            candidates.push(entry.path());
        }
    }
    match candidates.len() {
        0 => Err(ClusterError::NoOutputFile(pattern)),
        1 => Ok(candidates.remove(0)),
        _ => Err(ClusterError::AmbiguousOutputFile {
            pattern,
            candidates: candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
        }),
    }
}

#[async_trait]
impl JobMonitor for GridMonitor {
    async fn stdout(&mut self) -> Result<OutputStream, SchedulerError> {
        let dir = self.template.output_path.clone();
        self.open_captured(&dir, 'o').await
    }

    async fn stderr(&mut self) -> Result<OutputStream, SchedulerError> {
        let dir = self.template.error_path.clone();
        self.open_captured(&dir, 'e').await
    }

    async fn wait(&mut self) -> Result<(), SchedulerError> {
        wait_for_state(self.session.as_ref(), &self.job, None, self.timeout).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{ArgRegistry, JobArgs};
    use crate::job::CommandBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// A session that walks each job through a scripted state sequence.
    struct ScriptedSession {
        states: Vec<JobState>,
        polls: AtomicUsize,
        submissions: Mutex<Vec<JobTemplate>>,
    }

    impl ScriptedSession {
        fn new(states: Vec<JobState>) -> Self {
            Self {
                states,
                polls: AtomicUsize::new(0),
                submissions: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DrmaaSession for ScriptedSession {
        async fn run_job(&self, template: &JobTemplate) -> Result<ClusterJob, ClusterError> {
            self.submissions.lock().await.push(template.clone());
            Ok(ClusterJob { id: "4242".into() })
        }

        async fn job_state(&self, _job: &ClusterJob) -> Result<JobState, ClusterError> {
            let poll = self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(*self.states.get(poll).unwrap_or(&JobState::Done))
        }

        async fn close(&self) -> Result<(), ClusterError> {
            Ok(())
        }
    }

    struct StaticCommand(Vec<String>);

    impl CommandBuilder for StaticCommand {
        fn build(&self, _args: &JobArgs) -> Result<Vec<String>, SchedulerError> {
            Ok(self.0.clone())
        }
    }

    fn grid_processor(session: Arc<ScriptedSession>, resources: Config) -> GridProcessor {
        GridProcessor {
            session_name: "test".into(),
            accounting_id: "acct".into(),
            resources,
            session,
        }
    }

    fn cluster_job(name: &str) -> Job {
        Job {
            name: name.into(),
            executable: "/opt/dmg/dmg_client".into(),
            args: JobArgs::new(Arc::new(ArgRegistry::new())),
            builder: Some(Arc::new(StaticCommand(vec!["--index".into(), "0".into()]))),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_polls_until_done() {
        let session = Arc::new(ScriptedSession::new(vec![
            JobState::Queued,
            JobState::Running,
            JobState::Running,
            JobState::Done,
        ]));
        let processor = grid_processor(Arc::clone(&session), Config::default());
        processor.run(cluster_job("band_0")).await.unwrap();
        assert_eq!(session.polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_state_is_an_error() {
        let session = Arc::new(ScriptedSession::new(vec![
            JobState::Queued,
            JobState::Failed,
        ]));
        let processor = grid_processor(session, Config::default());
        let err = processor.run(cluster_job("band_0")).await.unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Cluster(ClusterError::JobFailed(id)) if id == "4242"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_uses_the_default() {
        // A job that never leaves Queued: with jobTimeout unset the default
        // of 10800s must apply, so the wait fails at that bound.
        let session = Arc::new(ScriptedSession::new(vec![JobState::Queued; 1000]));
        let processor = grid_processor(session, Config::default());
        assert_eq!(processor.job_timeout(), DEFAULT_JOB_TIMEOUT_SECS);

        let err = processor.run(cluster_job("band_0")).await.unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Cluster(ClusterError::Timeout(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_template_carries_cluster_config() {
        let mut resources = Config::default();
        resources.insert("ugeQueue", serde_json::json!("short.q"));
        resources.insert("ugeMinSlots", serde_json::json!(2));
        resources.insert("ugeMaxSlots", serde_json::json!(4));
        resources.insert("ugeParallelEnvironment", serde_json::json!("batch"));
        resources.insert("workingDir", serde_json::json!("/scratch/stitch"));
        resources.insert(
            "ugeResources",
            serde_json::json!({ "h_vmem": "8G" }),
        );

        let session = Arc::new(ScriptedSession::new(vec![JobState::Running, JobState::Done]));
        let processor = grid_processor(Arc::clone(&session), resources);
        processor.run(cluster_job("band_0")).await.unwrap();

        let submissions = session.submissions.lock().await;
        let jt = &submissions[0];
        assert_eq!(jt.queue_name, "short.q");
        assert_eq!(jt.working_directory, "/scratch/stitch");
        assert_eq!(jt.accounting_id, "acct");
        assert_eq!(
            jt.native_spec(),
            "-A acct -pe batch 2-4 -q short.q -l h_vmem=8G"
        );
    }

    #[test]
    fn test_resolve_captured_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stitch.o4242"), "Server Address: x\n").unwrap();
        std::fs::write(dir.path().join("stitch.e4242"), "").unwrap();

        let dir_str = dir.path().display().to_string();
        let found = resolve_captured_file(&dir_str, ".o4242").unwrap();
        assert!(found.display().to_string().ends_with("stitch.o4242"));

        let err = resolve_captured_file(&dir_str, ".o9999").unwrap_err();
        assert!(matches!(err, ClusterError::NoOutputFile(_)));

        std::fs::write(dir.path().join("other.o4242"), "").unwrap();
        let err = resolve_captured_file(&dir_str, ".o4242").unwrap_err();
        assert!(matches!(err, ClusterError::AmbiguousOutputFile { .. }));
    }
}
