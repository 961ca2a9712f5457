//! gridstitch CLI - submits DMG stitching and mipmap pyramid pipelines.
//!
//! The CLI is organized into:
//! - `Cli` / `Commands`: argument parsing (clap)
//! - `dmg` / `mipmaps`: per-service operation dispatch
//! - `processors`: processor-type selection (`echo`, `local`, `drmaa1`,
//!   `drmaa2`)
//! - `CliError`: centralized error handling

mod dmg;
mod error;
mod mipmaps;
mod processors;

use clap::{Parser, Subcommand};
use error::CliError;

/// Job submission options shared by both services.
#[derive(Debug, Clone, clap::Args)]
pub struct SubmitOpts {
    /// Grid job session name
    #[arg(long = "sessionName", default_value = "dmg")]
    pub session_name: String,

    /// Job name
    #[arg(long = "jobName", default_value = "dmg")]
    pub job_name: String,

    /// Grid account id
    #[arg(short = 'A', default_value = "")]
    pub account_id: String,

    /// Destroy the grid session when done, if no errors were encountered
    #[arg(long = "destroySession", action = clap::ArgAction::SetTrue)]
    pub destroy_session: bool,
}

#[derive(Parser)]
#[command(name = "gridstitch")]
#[command(version = gridstitch::VERSION)]
#[command(about = "Distributed image pyramid and stitching orchestrator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Distributed multigrid gradient-domain stitching
    Dmg {
        #[command(flatten)]
        submit: SubmitOpts,

        /// Job processor type {echo, local, drmaa1, drmaa2}
        #[arg(long = "dmgProcessor", default_value = "drmaa1")]
        dmg_processor: String,

        /// Section job processor type {echo, local, drmaa1, drmaa2}
        #[arg(long = "sectionProcessor", default_value = "local")]
        section_processor: String,

        #[arg(value_enum)]
        operation: dmg::DmgOperation,

        #[command(flatten)]
        flags: dmg::DmgFlags,
    },

    /// Mipmap retile/scale pyramid generation
    Mipmaps {
        #[command(flatten)]
        submit: SubmitOpts,

        /// Job processor type {echo, local, drmaa1, drmaa2}
        #[arg(long = "mipmapsProcessor", default_value = "drmaa1")]
        mipmaps_processor: String,

        #[arg(value_enum)]
        operation: mipmaps::MipmapOperation,

        #[command(flatten)]
        flags: mipmaps::MipmapFlags,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    gridstitch::logging::init_logging();

    let result = match cli.command {
        Commands::Dmg {
            submit,
            dmg_processor,
            section_processor,
            operation,
            flags,
        } => dmg::run(submit, dmg_processor, section_processor, operation, flags).await,
        Commands::Mipmaps {
            submit,
            mipmaps_processor,
            operation,
            flags,
        } => mipmaps::run(submit, mipmaps_processor, operation, flags).await,
    };

    if let Err(e) = result {
        e.exit();
    }
}
