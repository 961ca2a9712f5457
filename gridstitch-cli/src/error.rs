//! CLI error handling with user-friendly messages.

use gridstitch::cluster::ClusterError;
use gridstitch::config::ConfigError;
use gridstitch::job::SchedulerError;
use std::fmt;
use std::process;

/// CLI-specific errors.
#[derive(Debug)]
pub enum CliError {
    /// Reading the configuration file(s) failed
    Config(ConfigError),
    /// The requested processor type is not usable
    Processor(String),
    /// Creating the cluster session failed
    Cluster(ClusterError),
    /// The service run itself failed
    Service(SchedulerError),
}

impl CliError {
    /// Exit the process with an error message and a non-zero code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);
        if let CliError::Processor(_) = self {
            eprintln!();
            eprintln!("Supported processor types are: echo, local, drmaa1, drmaa2.");
            eprintln!("The drmaa types require a DRMAA backend registered at startup.");
        }
        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(e) => write!(f, "Error reading the config file(s): {}", e),
            CliError::Processor(msg) => write!(f, "Invalid processor: {}", msg),
            CliError::Cluster(e) => write!(f, "Error creating the cluster processor: {}", e),
            CliError::Service(e) => write!(f, "Error running the service: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::Cluster(e) => Some(e),
            CliError::Service(e) => Some(e),
            CliError::Processor(_) => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e)
    }
}

impl From<ClusterError> for CliError {
    fn from(e: ClusterError) -> Self {
        CliError::Cluster(e)
    }
}

impl From<SchedulerError> for CliError {
    fn from(e: SchedulerError) -> Self {
        CliError::Service(e)
    }
}
