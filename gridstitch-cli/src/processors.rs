//! Processor-type selection shared by the DMG and mipmap services.

use crate::error::CliError;
use gridstitch::cluster::{registered_proxy, GridProcessor};
use gridstitch::config::Config;
use gridstitch::job::{EchoProcessor, Processor};
use std::sync::Arc;

/// Creates the job processor for a processor-type name. The `local`
/// constructor is passed in because the local processor differs per
/// service (plain process spawning for mipmaps, the section processor for
/// DMG sections).
pub async fn create_processor(
    processor_type: &str,
    account_id: &str,
    session_name: &str,
    resources: &Config,
    local: impl FnOnce() -> Result<Arc<dyn Processor>, CliError>,
) -> Result<Arc<dyn Processor>, CliError> {
    match processor_type {
        "echo" => Ok(Arc::new(EchoProcessor)),
        "local" => local(),
        "drmaa1" | "drmaa2" => {
            let proxy = registered_proxy(processor_type)?;
            let grid = GridProcessor::new(
                session_name,
                account_id,
                proxy.as_ref(),
                resources.clone(),
            )
            .await?;
            Ok(Arc::new(grid))
        }
        other => Err(CliError::Processor(format!(
            "'{other}' - supported types are: echo, local, drmaa1, drmaa2"
        ))),
    }
}
