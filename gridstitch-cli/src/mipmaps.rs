//! The mipmap pyramid service commands.

use crate::error::CliError;
use crate::processors::create_processor;
use crate::SubmitOpts;
use clap::{ArgAction, ValueEnum};
use gridstitch::args::JobArgs;
use gridstitch::cluster;
use gridstitch::config::Config;
use gridstitch::job::{Job, LocalProcessor, ParallelProcessor, Processor};
use gridstitch::mipmaps::{
    DvidUrlMap, MipmapAttrs, OrthoviewsSplitter, RetileCommand, RetileSplitter, ScaleCommand,
    ScaleSplitter, ServiceCommand,
};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum MipmapOperation {
    /// Generate scale level 0 of the target projection
    #[value(name = "retile")]
    Retile,
    /// Generate the remaining pyramid levels of the target projection
    #[value(name = "scale")]
    Scale,
    /// Retile, then scale
    #[value(name = "fullPyramid")]
    FullPyramid,
    /// Generate scale level 0 for the XZ and ZY views; assumes the XY
    /// pyramid exists
    #[value(name = "orthoviews")]
    Orthoviews,
    /// Retile and scale the XZ and ZY views; assumes the XY pyramid exists
    #[value(name = "fullOrthoviews")]
    FullOrthoviews,
    /// Generate the full pyramid for all three projections
    #[value(name = "allOrthoviews")]
    AllOrthoviews,
}

/// The mipmap flag set; unset options keep their registry defaults.
#[derive(Debug, clap::Args)]
pub struct MipmapFlags {
    /// Configuration file(s), applied in the order they are specified
    #[arg(long = "config", value_delimiter = ',')]
    pub config: Vec<String>,

    #[arg(long = "image_width")]
    image_width: Option<i64>,

    #[arg(long = "image_height")]
    image_height: Option<i64>,

    #[arg(long = "image_depth")]
    image_depth: Option<i64>,

    /// Cropped volume min X in pixel coordinates
    #[arg(long = "source_min_x")]
    source_min_x: Option<i64>,

    #[arg(long = "source_min_y")]
    source_min_y: Option<i64>,

    #[arg(long = "source_min_z")]
    source_min_z: Option<i64>,

    /// Cropped volume max X in pixel coordinates
    #[arg(long = "source_max_x")]
    source_max_x: Option<i64>,

    #[arg(long = "source_max_y")]
    source_max_y: Option<i64>,

    #[arg(long = "source_max_z")]
    source_max_z: Option<i64>,

    #[arg(long = "source_tile_width")]
    source_tile_width: Option<i64>,

    #[arg(long = "source_tile_height")]
    source_tile_height: Option<i64>,

    /// Source root url
    #[arg(long = "source_url")]
    source_url: Option<String>,

    /// Source stack format
    #[arg(long = "source_stack_format")]
    source_stack_format: Option<String>,

    /// Processed volume min X relative to the source volume
    #[arg(long = "target_min_x")]
    target_min_x: Option<i64>,

    #[arg(long = "target_min_y")]
    target_min_y: Option<i64>,

    #[arg(long = "target_min_z")]
    target_min_z: Option<i64>,

    #[arg(long = "target_max_x")]
    target_max_x: Option<i64>,

    #[arg(long = "target_max_y")]
    target_max_y: Option<i64>,

    #[arg(long = "target_max_z")]
    target_max_z: Option<i64>,

    #[arg(long = "target_tile_width")]
    target_tile_width: Option<i64>,

    #[arg(long = "target_tile_height")]
    target_tile_height: Option<i64>,

    /// Target root url, e.g. 'dvid://localdvid/<uuid>/<instance>/tile'
    #[arg(long = "target_url")]
    target_url: Option<String>,

    /// Target stack format, e.g. '{plane}/{scale}/{tile_col}/{tile_row}/{tile_layer}'
    #[arg(long = "target_stack_format")]
    target_stack_format: Option<String>,

    #[arg(long = "xy_stack_format")]
    xy_stack_format: Option<String>,

    #[arg(long = "xz_stack_format")]
    xz_stack_format: Option<String>,

    #[arg(long = "zy_stack_format")]
    zy_stack_format: Option<String>,

    #[arg(long = "source_xy_res")]
    source_xy_res: Option<f64>,

    #[arg(long = "source_z_res")]
    source_z_res: Option<f64>,

    #[arg(long = "source_scale")]
    source_scale: Option<u64>,

    /// Source background pixel
    #[arg(long = "source_bg")]
    source_bg: Option<u64>,

    /// Target orientation: xy | xz | zy
    #[arg(long = "orientation")]
    orientation: Option<String>,

    /// Target image type: gray | rgb
    #[arg(long = "image_type")]
    image_type: Option<String>,

    /// Target image format: jpg | png | tiff
    #[arg(long = "image_format")]
    image_format: Option<String>,

    #[arg(long = "image_quality")]
    image_quality: Option<f64>,

    /// Interpolation algorithm
    #[arg(long = "interpolation")]
    interpolation: Option<String>,

    #[arg(long = "process_empty_tiles", action = ArgAction::SetTrue)]
    process_empty_tiles: bool,

    #[arg(long = "src_scale_fmt")]
    src_scale_fmt: Option<String>,

    #[arg(long = "src_tile_col_fmt")]
    src_tile_col_fmt: Option<String>,

    #[arg(long = "src_tile_row_fmt")]
    src_tile_row_fmt: Option<String>,

    #[arg(long = "src_tile_layer_fmt")]
    src_tile_layer_fmt: Option<String>,

    #[arg(long = "src_x_fmt")]
    src_x_fmt: Option<String>,

    #[arg(long = "src_y_fmt")]
    src_y_fmt: Option<String>,

    #[arg(long = "src_z_fmt")]
    src_z_fmt: Option<String>,

    #[arg(long = "scale_fmt")]
    scale_fmt: Option<String>,

    #[arg(long = "tile_col_fmt")]
    tile_col_fmt: Option<String>,

    #[arg(long = "tile_row_fmt")]
    tile_row_fmt: Option<String>,

    #[arg(long = "tile_layer_fmt")]
    tile_layer_fmt: Option<String>,

    #[arg(long = "x_fmt")]
    x_fmt: Option<String>,

    #[arg(long = "y_fmt")]
    y_fmt: Option<String>,

    #[arg(long = "z_fmt")]
    z_fmt: Option<String>,
}

impl MipmapFlags {
    /// Overlays the provided options onto the mipmap registry defaults.
    pub fn to_job_args(&self) -> JobArgs {
        let mut args = JobArgs::new(Arc::new(MipmapAttrs::registry()));
        if !self.config.is_empty() {
            args.set_string_list("config", self.config.clone());
        }
        let ints = [
            ("image_width", self.image_width),
            ("image_height", self.image_height),
            ("image_depth", self.image_depth),
            ("source_min_x", self.source_min_x),
            ("source_min_y", self.source_min_y),
            ("source_min_z", self.source_min_z),
            ("source_max_x", self.source_max_x),
            ("source_max_y", self.source_max_y),
            ("source_max_z", self.source_max_z),
            ("source_tile_width", self.source_tile_width),
            ("source_tile_height", self.source_tile_height),
            ("target_min_x", self.target_min_x),
            ("target_min_y", self.target_min_y),
            ("target_min_z", self.target_min_z),
            ("target_max_x", self.target_max_x),
            ("target_max_y", self.target_max_y),
            ("target_max_z", self.target_max_z),
            ("target_tile_width", self.target_tile_width),
            ("target_tile_height", self.target_tile_height),
        ];
        for (name, value) in ints {
            if let Some(value) = value {
                args.set_int(name, value);
            }
        }
        let uints = [
            ("source_scale", self.source_scale),
            ("source_bg", self.source_bg),
        ];
        for (name, value) in uints {
            if let Some(value) = value {
                args.set_uint(name, value);
            }
        }
        let floats = [
            ("source_xy_res", self.source_xy_res),
            ("source_z_res", self.source_z_res),
            ("image_quality", self.image_quality),
        ];
        for (name, value) in floats {
            if let Some(value) = value {
                args.set_float(name, value);
            }
        }
        let strings = [
            ("source_url", &self.source_url),
            ("source_stack_format", &self.source_stack_format),
            ("target_url", &self.target_url),
            ("target_stack_format", &self.target_stack_format),
            ("xy_stack_format", &self.xy_stack_format),
            ("xz_stack_format", &self.xz_stack_format),
            ("zy_stack_format", &self.zy_stack_format),
            ("orientation", &self.orientation),
            ("image_type", &self.image_type),
            ("image_format", &self.image_format),
            ("interpolation", &self.interpolation),
            ("src_scale_fmt", &self.src_scale_fmt),
            ("src_tile_col_fmt", &self.src_tile_col_fmt),
            ("src_tile_row_fmt", &self.src_tile_row_fmt),
            ("src_tile_layer_fmt", &self.src_tile_layer_fmt),
            ("src_x_fmt", &self.src_x_fmt),
            ("src_y_fmt", &self.src_y_fmt),
            ("src_z_fmt", &self.src_z_fmt),
            ("scale_fmt", &self.scale_fmt),
            ("tile_col_fmt", &self.tile_col_fmt),
            ("tile_row_fmt", &self.tile_row_fmt),
            ("tile_layer_fmt", &self.tile_layer_fmt),
            ("x_fmt", &self.x_fmt),
            ("y_fmt", &self.y_fmt),
            ("z_fmt", &self.z_fmt),
        ];
        for (name, value) in strings {
            if let Some(value) = value {
                args.set_string(name, value);
            }
        }
        if self.process_empty_tiles {
            args.set_bool("process_empty_tiles", true);
        }
        args
    }
}

pub async fn run(
    submit: SubmitOpts,
    mipmaps_processor: String,
    operation: MipmapOperation,
    flags: MipmapFlags,
) -> Result<(), CliError> {
    let resources = Config::load(&flags.config)?;
    let args = flags.to_job_args();
    let attrs = MipmapAttrs::extract(&args)?;
    attrs.validate()?;

    let dvid_proxies = DvidUrlMap::from_config(&resources);
    let processor = create_processor(
        &mipmaps_processor,
        &submit.account_id,
        &submit.session_name,
        &resources,
        || Ok(Arc::new(LocalProcessor)),
    )
    .await?;

    let result = match operation {
        MipmapOperation::Retile => {
            run_terminal(
                "retile",
                &mipmaps_processor,
                processor,
                &submit,
                &resources,
                &dvid_proxies,
                args,
            )
            .await
        }
        MipmapOperation::Scale => {
            run_terminal(
                "scale",
                &mipmaps_processor,
                processor,
                &submit,
                &resources,
                &dvid_proxies,
                args,
            )
            .await
        }
        MipmapOperation::FullPyramid => {
            let stages = ["retile", "scale"].map(|op| Job {
                name: submit.job_name.clone(),
                executable: resources.get_string("mipmapsExec"),
                args: args.clone(),
                builder: Some(Arc::new(ServiceCommand {
                    operation: op.into(),
                    processor: mipmaps_processor.clone(),
                    cluster_account_id: submit.account_id.clone(),
                    job_name: submit.job_name.clone(),
                })),
            });
            run_pipelined(processor, stages.into_iter()).await
        }
        MipmapOperation::Orthoviews => {
            run_orthoviews(
                "retile",
                &mipmaps_processor,
                processor,
                &submit,
                &resources,
                args,
            )
            .await
        }
        MipmapOperation::FullOrthoviews => {
            run_orthoviews(
                "fullPyramid",
                &mipmaps_processor,
                processor,
                &submit,
                &resources,
                args,
            )
            .await
        }
        MipmapOperation::AllOrthoviews => {
            // The XY pyramid is generated first, then the two orthoviews.
            let xy_job_name = format!("{}_xy", submit.job_name);
            let stages = [
                Job {
                    name: xy_job_name.clone(),
                    executable: resources.get_string("mipmapsExec"),
                    args: attrs.generate_xy_args(&args),
                    builder: Some(Arc::new(ServiceCommand {
                        operation: "fullPyramid".into(),
                        processor: mipmaps_processor.clone(),
                        cluster_account_id: submit.account_id.clone(),
                        job_name: xy_job_name,
                    })),
                },
                Job {
                    name: submit.job_name.clone(),
                    executable: resources.get_string("mipmapsExec"),
                    args: args.clone(),
                    builder: Some(Arc::new(ServiceCommand {
                        operation: "fullOrthoviews".into(),
                        processor: mipmaps_processor.clone(),
                        cluster_account_id: submit.account_id.clone(),
                        job_name: submit.job_name.clone(),
                    })),
                },
            ];
            run_pipelined(processor, stages.into_iter()).await
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

/// Runs `retile` or `scale`: locally as a single JVM invocation, otherwise
/// as a parallel fan-out of service re-invocations.
async fn run_terminal(
    operation: &str,
    processor_type: &str,
    processor: Arc<dyn Processor>,
    submit: &SubmitOpts,
    resources: &Config,
    dvid_proxies: &DvidUrlMap,
    args: JobArgs,
) -> Result<(), CliError> {
    if processor_type == "local" {
        let builder: Arc<dyn gridstitch::job::CommandBuilder> = match operation {
            "retile" => Arc::new(RetileCommand::new(
                resources.clone(),
                dvid_proxies.clone(),
            )),
            _ => Arc::new(ScaleCommand::new(resources.clone(), dvid_proxies.clone())),
        };
        let job = Job {
            name: submit.job_name.clone(),
            executable: resources.get_string("jvm"),
            args,
            builder: Some(builder),
        };
        return Ok(processor.run(job).await?);
    }

    let splitter: Arc<dyn gridstitch::job::Splitter> = match operation {
        "retile" => Arc::new(RetileSplitter::new(resources.clone())),
        _ => Arc::new(ScaleSplitter::new(resources.clone())),
    };
    let fanout = ParallelProcessor::new(processor, splitter, resources.clone());
    let job = Job {
        name: format!("{}_{operation}", submit.job_name),
        executable: resources.get_string("mipmapsExec"),
        args,
        builder: None,
    };
    Ok(fanout.run(job).await?)
}

/// Runs the XZ/ZY orthoview fan-out with the given per-view operation.
async fn run_orthoviews(
    orthoview_op: &str,
    processor_type: &str,
    processor: Arc<dyn Processor>,
    submit: &SubmitOpts,
    resources: &Config,
    args: JobArgs,
) -> Result<(), CliError> {
    let splitter = OrthoviewsSplitter {
        orthoview_op: orthoview_op.into(),
        processor: processor_type.into(),
        cluster_account_id: submit.account_id.clone(),
        resources: resources.clone(),
    };
    let fanout = ParallelProcessor::new(processor, Arc::new(splitter), resources.clone());
    let job = Job {
        name: submit.job_name.clone(),
        executable: resources.get_string("mipmapsExec"),
        args,
        builder: None,
    };
    Ok(fanout.run(job).await?)
}

/// Runs stage jobs one after the other, stopping at the first failure.
async fn run_pipelined(
    processor: Arc<dyn Processor>,
    jobs: impl Iterator<Item = Job>,
) -> Result<(), CliError> {
    for job in jobs {
        processor.run(job).await?;
    }
    Ok(())
}
