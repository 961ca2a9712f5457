//! Logging setup shared by the CLI and tests.
//!
//! Orchestrator output goes to stderr so that job stdout (including the
//! DMG rendezvous lines) stays clean; on the grid, stderr ends up in the
//! scheduler-captured `.e<jobID>` file. The filter is configurable through
//! `RUST_LOG` and defaults to `info`.

use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber. Calling it twice is a no-op,
/// which keeps parallel test binaries happy.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
