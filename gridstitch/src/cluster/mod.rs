//! Cluster job submission through the DRMAA contract.
//!
//! This module carries only the session and job-template contract of DRMAA;
//! the actual v1/v2 C bindings are supplied by the deployment and installed
//! through [`register_proxy`] at startup. Sessions are process-wide: a
//! create request for a name that already has a session reuses it.

mod processor;

pub use processor::{GridProcessor, DEFAULT_JOB_TIMEOUT_SECS, POLL_INTERVAL_SECS};

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex, OnceLock, PoisonError};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

/// Errors raised by cluster submission and polling.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("cannot create job session '{0}'")]
    SessionUnavailable(String),

    #[error("no DRMAA backend registered for '{0}'")]
    NoBackend(String),

    #[error("error submitting job: {0}")]
    Submit(String),

    #[error("error getting job {id} status: {message}")]
    Status { id: String, message: String },

    #[error("job {0} failed")]
    JobFailed(String),

    #[error("job {0} timeout")]
    Timeout(String),

    #[error("no file found that matches {0}")]
    NoOutputFile(String),

    #[error("found more than one match for {pattern}: {candidates:?}")]
    AmbiguousOutputFile {
        pattern: String,
        candidates: Vec<String>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// State of a submitted cluster job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Undetermined,
    Queued,
    QueuedHeld,
    Running,
    Suspended,
    Requeued,
    RequeuedHeld,
    Done,
    Failed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobState::Undetermined => "Undetermined",
            JobState::Queued => "Queued",
            JobState::QueuedHeld => "QueuedHeld",
            JobState::Running => "Running",
            JobState::Suspended => "Suspended",
            JobState::Requeued => "Requeued",
            JobState::RequeuedHeld => "RequeuedHeld",
            JobState::Done => "Done",
            JobState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Handle to a job accepted by the workload manager.
#[derive(Debug, Clone)]
pub struct ClusterJob {
    pub id: String,
}

/// A job submission request.
#[derive(Debug, Clone, Default)]
pub struct JobTemplate {
    pub remote_command: String,
    pub args: Vec<String>,
    pub job_name: String,
    pub accounting_id: String,
    pub working_directory: String,
    pub queue_name: String,
    pub min_slots: i64,
    pub max_slots: i64,
    pub resource_limits: BTreeMap<String, String>,
    pub job_environment: BTreeMap<String, String>,
    pub output_path: String,
    pub error_path: String,
    extensions: BTreeMap<String, String>,
}

/// Extension key selecting the UGE parallel environment.
pub const PE_EXTENSION: &str = "uge_jt_pe";

impl JobTemplate {
    /// Sets an implementation-specific extension request.
    pub fn set_extension(&mut self, extension: &str, value: &str) {
        self.extensions.insert(extension.into(), value.into());
    }

    /// Returns an extension request, or "" when unset.
    pub fn extension(&self, extension: &str) -> &str {
        self.extensions
            .get(extension)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Renders the native specification understood by UGE-style schedulers:
    /// `-A <acct> -pe <pe> <min>-<max> -q <queue> -l k1=v1,k2=v2`.
    pub fn native_spec(&self) -> String {
        let mut spec = String::new();
        if !self.accounting_id.is_empty() {
            spec.push_str("-A ");
            spec.push_str(&self.accounting_id);
            spec.push(' ');
        }
        let pe = self.extension(PE_EXTENSION);
        if !pe.is_empty() && (self.min_slots > 0 || self.max_slots > 0) {
            spec.push_str("-pe ");
            spec.push_str(pe);
            spec.push(' ');
            if self.min_slots > 0 {
                spec.push_str(&self.min_slots.to_string());
            }
            if self.max_slots > 0 {
                spec.push('-');
                spec.push_str(&self.max_slots.to_string());
            }
            spec.push(' ');
        }
        if !self.queue_name.is_empty() {
            spec.push_str("-q ");
            spec.push_str(&self.queue_name);
            spec.push(' ');
        }
        if !self.resource_limits.is_empty() {
            spec.push_str("-l ");
            let limits: Vec<String> = self
                .resource_limits
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            spec.push_str(&limits.join(","));
            spec.push(' ');
        }
        spec.trim_end().to_string()
    }
}

/// A live DRMAA session.
#[async_trait]
pub trait DrmaaSession: Send + Sync {
    /// Submits a job and returns its cluster handle.
    async fn run_job(&self, template: &JobTemplate) -> Result<ClusterJob, ClusterError>;

    /// Reports the current state of a submitted job.
    async fn job_state(&self, job: &ClusterJob) -> Result<JobState, ClusterError>;

    /// Tears the session down. Idempotent.
    async fn close(&self) -> Result<(), ClusterError>;
}

/// Factory for DRMAA sessions, implemented by the deployment's binding.
#[async_trait]
pub trait DrmaaProxy: Send + Sync {
    async fn create_session(&self, name: &str) -> Result<Arc<dyn DrmaaSession>, ClusterError>;
}

fn sessions() -> &'static Mutex<HashMap<String, Arc<dyn DrmaaSession>>> {
    static SESSIONS: OnceLock<Mutex<HashMap<String, Arc<dyn DrmaaSession>>>> = OnceLock::new();
    SESSIONS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Returns the process-wide session with the given name, creating it
/// through `proxy` on first use.
pub async fn session_for(
    name: &str,
    proxy: &dyn DrmaaProxy,
) -> Result<Arc<dyn DrmaaSession>, ClusterError> {
    let mut registry = sessions().lock().await;
    if let Some(existing) = registry.get(name) {
        return Ok(Arc::clone(existing));
    }
    let session = proxy.create_session(name).await?;
    registry.insert(name.to_string(), Arc::clone(&session));
    Ok(session)
}

/// Closes and forgets the named session. Closing an unknown name is a no-op.
pub async fn close_session(name: &str) -> Result<(), ClusterError> {
    let session = sessions().lock().await.remove(name);
    match session {
        Some(session) => {
            info!("Close session {name}");
            session.close().await
        }
        None => Ok(()),
    }
}

fn proxies() -> &'static StdMutex<HashMap<String, Arc<dyn DrmaaProxy>>> {
    static PROXIES: OnceLock<StdMutex<HashMap<String, Arc<dyn DrmaaProxy>>>> = OnceLock::new();
    PROXIES.get_or_init(|| StdMutex::new(HashMap::new()))
}

/// Installs a DRMAA backend under a processor-type name (`drmaa1`,
/// `drmaa2`). Deployments call this once at startup.
pub fn register_proxy(kind: &str, proxy: Arc<dyn DrmaaProxy>) {
    proxies()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(kind.to_string(), proxy);
}

/// Looks up a registered DRMAA backend.
pub fn registered_proxy(kind: &str) -> Result<Arc<dyn DrmaaProxy>, ClusterError> {
    proxies()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(kind)
        .cloned()
        .ok_or_else(|| ClusterError::NoBackend(kind.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_spec_full() {
        let mut jt = JobTemplate {
            accounting_id: "imgproc".into(),
            queue_name: "short.q".into(),
            min_slots: 4,
            max_slots: 8,
            ..Default::default()
        };
        jt.set_extension(PE_EXTENSION, "batch");
        jt.resource_limits.insert("h_vmem".into(), "8G".into());
        jt.resource_limits.insert("scratch".into(), "true".into());

        assert_eq!(
            jt.native_spec(),
            "-A imgproc -pe batch 4-8 -q short.q -l h_vmem=8G,scratch=true"
        );
    }

    #[test]
    fn test_native_spec_skips_unset_sections() {
        let jt = JobTemplate::default();
        assert_eq!(jt.native_spec(), "");

        let jt = JobTemplate {
            queue_name: "long.q".into(),
            ..Default::default()
        };
        assert_eq!(jt.native_spec(), "-q long.q");
    }

    #[test]
    fn test_pe_requires_slots() {
        let mut jt = JobTemplate::default();
        jt.set_extension(PE_EXTENSION, "batch");
        // No slot bounds requested, so no -pe section.
        assert_eq!(jt.native_spec(), "");
    }

    #[test]
    fn test_job_state_display() {
        assert_eq!(JobState::QueuedHeld.to_string(), "QueuedHeld");
        assert_eq!(JobState::Done.to_string(), "Done");
    }
}
