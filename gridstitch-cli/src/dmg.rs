//! The DMG stitching service commands.

use crate::error::CliError;
use crate::processors::create_processor;
use crate::SubmitOpts;
use clap::{ArgAction, ValueEnum};
use gridstitch::args::JobArgs;
use gridstitch::cluster;
use gridstitch::config::Config;
use gridstitch::dmg::{BandsProcessor, DmgAttrs, SectionCommand, SectionProcessor};
use gridstitch::job::{Job, LocalProcessor, Processor};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DmgOperation {
    /// Stitch one image, or one precomputed set of image bands
    #[value(name = "dmgImage")]
    Image,
    /// Prepare a whole section, stitch its bands, assemble the result
    #[value(name = "dmgSection")]
    Section,
}

/// The DMG flag set; unset options keep their registry defaults.
#[derive(Debug, clap::Args)]
pub struct DmgFlags {
    /// Configuration file(s), applied in the order they are specified
    #[arg(long = "config", value_delimiter = ',')]
    pub config: Vec<String>,

    /// Number of sections processed in parallel
    #[arg(long = "sections")]
    sections: Option<i64>,

    /// Number of Gauss-Seidel iterations
    #[arg(long = "iters")]
    iters: Option<i64>,

    /// Number of V-cycles
    #[arg(long = "vCycles")]
    v_cycles: Option<i64>,

    /// Value interpolation weight
    #[arg(long = "iWeight")]
    i_weight: Option<f64>,

    /// Gradient interpolation weight
    #[arg(long = "gWeight")]
    g_weight: Option<f64>,

    /// Gradient scale
    #[arg(long = "gScale")]
    g_scale: Option<f64>,

    /// DMG server address - host[:port]
    #[arg(long = "serverAddress")]
    server_address: Option<String>,

    /// DMG server port
    #[arg(long = "serverPort")]
    server_port: Option<i64>,

    #[arg(long = "verbose", action = ArgAction::SetTrue)]
    verbose: bool,

    /// Gray image flag
    #[arg(long = "gray", action = ArgAction::Set)]
    gray: Option<bool>,

    /// Deramp flag
    #[arg(long = "deramp", action = ArgAction::Set)]
    deramp: Option<bool>,

    #[arg(long = "tileWidth")]
    tile_width: Option<i64>,

    #[arg(long = "tileHeight")]
    tile_height: Option<i64>,

    /// Destination image extension
    #[arg(long = "tileExt")]
    tile_ext: Option<String>,

    #[arg(long = "clientIndex")]
    client_index: Option<i64>,

    /// Number of threads
    #[arg(long = "threads")]
    threads: Option<i64>,

    #[arg(long = "minZ")]
    min_z: Option<i64>,

    /// Max Z (inclusive)
    #[arg(long = "maxZ")]
    max_z: Option<i64>,

    /// List of image pixels
    #[arg(long = "pixelsList", value_delimiter = ',')]
    pixels_list: Vec<String>,

    /// List of image labels
    #[arg(long = "labelsList", value_delimiter = ',')]
    labels_list: Vec<String>,

    /// List of output images
    #[arg(long = "outList", value_delimiter = ',')]
    out_list: Vec<String>,

    /// Source image pixels
    #[arg(long = "pixels")]
    pixels: Option<String>,

    /// Source image labels
    #[arg(long = "labels")]
    labels: Option<String>,

    /// Output image
    #[arg(long = "out")]
    out: Option<String>,

    /// Scratch directory
    #[arg(long = "temp")]
    temp: Option<String>,

    /// Destination directory
    #[arg(long = "targetDir")]
    target_dir: Option<String>,

    /// Coordinates file
    #[arg(long = "coordFile")]
    coord_file: Option<String>,
}

impl DmgFlags {
    /// Overlays the provided options onto the DMG registry defaults.
    pub fn to_job_args(&self) -> JobArgs {
        let mut args = JobArgs::new(Arc::new(DmgAttrs::registry()));
        if !self.config.is_empty() {
            args.set_string_list("config", self.config.clone());
        }
        let ints = [
            ("sections", self.sections),
            ("iters", self.iters),
            ("vCycles", self.v_cycles),
            ("serverPort", self.server_port),
            ("tileWidth", self.tile_width),
            ("tileHeight", self.tile_height),
            ("clientIndex", self.client_index),
            ("threads", self.threads),
            ("minZ", self.min_z),
            ("maxZ", self.max_z),
        ];
        for (name, value) in ints {
            if let Some(value) = value {
                args.set_int(name, value);
            }
        }
        let floats = [
            ("iWeight", self.i_weight),
            ("gWeight", self.g_weight),
            ("gScale", self.g_scale),
        ];
        for (name, value) in floats {
            if let Some(value) = value {
                args.set_float(name, value);
            }
        }
        let strings = [
            ("serverAddress", &self.server_address),
            ("tileExt", &self.tile_ext),
            ("pixels", &self.pixels),
            ("labels", &self.labels),
            ("out", &self.out),
            ("temp", &self.temp),
            ("targetDir", &self.target_dir),
            ("coordFile", &self.coord_file),
        ];
        for (name, value) in strings {
            if let Some(value) = value {
                args.set_string(name, value);
            }
        }
        if self.verbose {
            args.set_bool("verbose", true);
        }
        if let Some(gray) = self.gray {
            args.set_bool("gray", gray);
        }
        if let Some(deramp) = self.deramp {
            args.set_bool("deramp", deramp);
        }
        if !self.pixels_list.is_empty() {
            args.set_string_list("pixelsList", self.pixels_list.clone());
        }
        if !self.labels_list.is_empty() {
            args.set_string_list("labelsList", self.labels_list.clone());
        }
        if !self.out_list.is_empty() {
            args.set_string_list("outList", self.out_list.clone());
        }
        args
    }
}

pub async fn run(
    submit: SubmitOpts,
    dmg_processor: String,
    section_processor: String,
    operation: DmgOperation,
    flags: DmgFlags,
) -> Result<(), CliError> {
    let resources = Config::load(&flags.config)?;
    let args = flags.to_job_args();

    let image_resources = resources.clone();
    let image_processor = create_processor(
        &dmg_processor,
        &submit.account_id,
        &submit.session_name,
        &resources,
        || Ok(Arc::new(LocalProcessor)),
    )
    .await?;
    let bands_processor = Arc::new(BandsProcessor::new(image_processor, image_resources));

    let result = match operation {
        DmgOperation::Image => {
            let job = Job {
                name: submit.job_name.clone(),
                executable: String::new(),
                args,
                builder: None,
            };
            bands_processor.run(job).await
        }
        DmgOperation::Section => {
            let section_proc = create_processor(
                &section_processor,
                &submit.account_id,
                &submit.session_name,
                &resources,
                || {
                    Ok(Arc::new(SectionProcessor::new(
                        bands_processor.clone(),
                        resources.clone(),
                        &dmg_processor,
                    )))
                },
            )
            .await?;
            let job = Job {
                name: submit.job_name.clone(),
                executable: resources.get_string("dmgexec"),
                args,
                builder: Some(Arc::new(SectionCommand {
                    operation: "dmgSection".into(),
                    dmg_processor: dmg_processor.clone(),
                    section_processor: "local".into(),
                    cluster_account_id: submit.account_id.clone(),
                    session_name: submit.session_name.clone(),
                    job_name: format!("{}-section", submit.job_name),
                })),
            };
            section_proc.run(job).await
        }
    };
    result?;

    if submit.destroy_session {
        if let Err(err) = cluster::close_session(&submit.session_name).await {
            warn!("Close session error: {err}");
        }
    }
    Ok(())
}
