//! Command-line builders for the JVM tiling/scaling tool and for mipmap
//! service re-invocations.

use super::{DvidUrlMap, MipmapAttrs};
use crate::args::{default_if_empty, push_flag, push_float, push_int, push_kv, push_uint};
use crate::config::Config;
use crate::job::{CommandBuilder, SchedulerError};

/// Applies the `{token}` substitutions of a stack format descriptor.
fn stack_format(descriptor: &str, substitutions: &[(&str, String)]) -> String {
    let mut rendered = descriptor.to_string();
    for (token, value) in substitutions {
        rendered = rendered.replace(token, value);
    }
    rendered
}

fn source_stack_format(attrs: &MipmapAttrs) -> String {
    stack_format(
        &attrs.source_stack_format,
        &[
            ("{plane}", super::Orientation::Xy.to_string()),
            (
                "{scale}",
                default_if_empty(&attrs.src_scale_fmt, "%1$d").to_string(),
            ),
            (
                "{tile_col}",
                default_if_empty(&attrs.src_tile_col_fmt, "%9$d").to_string(),
            ),
            (
                "{tile_row}",
                default_if_empty(&attrs.src_tile_row_fmt, "%8$d").to_string(),
            ),
            (
                "{tile_layer}",
                default_if_empty(&attrs.src_tile_layer_fmt, "%5$d").to_string(),
            ),
            ("{x}", default_if_empty(&attrs.src_x_fmt, "%3$d").to_string()),
            ("{y}", default_if_empty(&attrs.src_y_fmt, "%4$d").to_string()),
            ("{z}", default_if_empty(&attrs.src_z_fmt, "%5$d").to_string()),
            ("{tile_width}", attrs.source_tile_width.to_string()),
            ("{tile_height}", attrs.source_tile_height.to_string()),
        ],
    )
}

fn target_stack_format(attrs: &MipmapAttrs) -> String {
    stack_format(
        &attrs.target_stack_format,
        &[
            ("{plane}", attrs.orientation.to_string()),
            (
                "{scale}",
                default_if_empty(&attrs.target_scale_fmt, "%1$d").to_string(),
            ),
            (
                "{tile_col}",
                default_if_empty(&attrs.target_tile_col_fmt, "%9$d").to_string(),
            ),
            (
                "{tile_row}",
                default_if_empty(&attrs.target_tile_row_fmt, "%8$d").to_string(),
            ),
            (
                "{tile_layer}",
                default_if_empty(&attrs.target_tile_layer_fmt, "%5$d").to_string(),
            ),
            ("{x}", default_if_empty(&attrs.target_x_fmt, "%3$d").to_string()),
            ("{y}", default_if_empty(&attrs.target_y_fmt, "%4$d").to_string()),
            ("{z}", default_if_empty(&attrs.target_z_fmt, "%5$d").to_string()),
            ("{tile_width}", attrs.target_tile_width.to_string()),
            ("{tile_height}", attrs.target_tile_height.to_string()),
        ],
    )
}

fn make_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_matches('/'))
}

fn push_jvm_memory(argv: &mut Vec<String>, memory: &str) {
    push_kv(argv, "-Xms", memory, "");
    push_kv(argv, "-Xmx", memory, "");
}

/// Builds the JVM argv for a local retiling run.
pub struct RetileCommand {
    resources: Config,
    dvid_proxies: DvidUrlMap,
}

impl RetileCommand {
    pub fn new(resources: Config, dvid_proxies: DvidUrlMap) -> Self {
        Self {
            resources,
            dvid_proxies,
        }
    }
}

impl CommandBuilder for RetileCommand {
    fn build(&self, args: &crate::args::JobArgs) -> Result<Vec<String>, SchedulerError> {
        let attrs = MipmapAttrs::extract(args)?;
        let mut argv = Vec::new();
        push_jvm_memory(&mut argv, &self.resources.get_string("tilingMemory"));
        push_int(
            &mut argv,
            "-DtileCacheSize",
            self.resources.get_int("tilerCacheSize"),
            "=",
        );

        let source_format = source_stack_format(&attrs);
        push_kv(
            &mut argv,
            "-DsourceUrlFormat",
            &make_url(
                &self.dvid_proxies.format_root_url(&attrs.source_root_url),
                &source_format,
            ),
            "=",
        );
        push_int(&mut argv, "-DsourceWidth", attrs.total_volume.dx, "=");
        push_int(&mut argv, "-DsourceHeight", attrs.total_volume.dy, "=");
        push_int(&mut argv, "-DsourceDepth", attrs.total_volume.dz, "=");
        push_uint(&mut argv, "-DsourceScaleLevel", attrs.source_scale as u64, "=");
        push_int(&mut argv, "-DsourceTileWidth", attrs.source_tile_width, "=");
        push_int(&mut argv, "-DsourceTileHeight", attrs.source_tile_height, "=");
        push_float(&mut argv, "-DsourceResXY", attrs.source_xy_res, 3, "=");
        push_float(&mut argv, "-DsourceResZ", attrs.source_z_res, 3, "=");
        push_int(&mut argv, "-DminX", attrs.source_volume.x, "=");
        push_int(&mut argv, "-DminY", attrs.source_volume.y, "=");
        push_int(&mut argv, "-DminZ", attrs.source_volume.z, "=");
        push_int(&mut argv, "-Dwidth", attrs.source_volume.dx, "=");
        push_int(&mut argv, "-Dheight", attrs.source_volume.dy, "=");
        push_int(&mut argv, "-Ddepth", attrs.source_volume.dz, "=");

        push_kv(
            &mut argv,
            "-DexportBasePath",
            &self.dvid_proxies.format_root_url(&attrs.target_root_url),
            "=",
        );
        push_kv(&mut argv, "-DtilePattern", &target_stack_format(&attrs), "=");
        push_int(&mut argv, "-DtileWidth", attrs.target_tile_width, "=");
        push_int(&mut argv, "-DtileHeight", attrs.target_tile_height, "=");
        push_int(&mut argv, "-DexportMinX", attrs.processed_volume.x, "=");
        push_int(&mut argv, "-DexportMinY", attrs.processed_volume.y, "=");
        push_int(&mut argv, "-DexportMinZ", attrs.processed_volume.z, "=");
        push_int(&mut argv, "-DexportMaxX", attrs.processed_volume.max_x(), "=");
        push_int(&mut argv, "-DexportMaxY", attrs.processed_volume.max_y(), "=");
        push_int(&mut argv, "-DexportMaxZ", attrs.processed_volume.max_z(), "=");
        push_kv(
            &mut argv,
            "-Dorientation",
            &attrs.orientation.to_string(),
            "=",
        );

        push_kv(&mut argv, "-Dformat", &attrs.image_format, "=");
        push_float(&mut argv, "-Dquality", attrs.image_quality, 2, "=");
        push_kv(&mut argv, "-Dtype", &attrs.image_type, "=");

        push_uint(&mut argv, "-DbgValue", attrs.source_background, "=");
        push_flag(&mut argv, "-DignoreEmptyTiles", attrs.ignore_empty_tiles(), "=");
        push_kv(&mut argv, "-Dinterpolation", &attrs.interpolation, "=");

        argv.extend(["-jar".into(), self.resources.get_string("tilingJar")]);
        Ok(argv)
    }
}

/// Builds the JVM argv for a local scaling run.
pub struct ScaleCommand {
    resources: Config,
    dvid_proxies: DvidUrlMap,
}

impl ScaleCommand {
    pub fn new(resources: Config, dvid_proxies: DvidUrlMap) -> Self {
        Self {
            resources,
            dvid_proxies,
        }
    }
}

impl CommandBuilder for ScaleCommand {
    fn build(&self, args: &crate::args::JobArgs) -> Result<Vec<String>, SchedulerError> {
        let attrs = MipmapAttrs::extract(args)?;
        let mut argv = Vec::new();
        push_jvm_memory(&mut argv, &self.resources.get_string("scalingMemory"));

        push_kv(
            &mut argv,
            "-DtileFormat",
            &make_url(
                &self.dvid_proxies.format_root_url(&attrs.target_root_url),
                &target_stack_format(&attrs),
            ),
            "=",
        );
        push_int(&mut argv, "-DsourceWidth", attrs.total_volume.dx, "=");
        push_int(&mut argv, "-DsourceHeight", attrs.total_volume.dy, "=");
        push_int(&mut argv, "-DsourceDepth", attrs.total_volume.dz, "=");
        push_int(&mut argv, "-DminX", attrs.source_volume.x, "=");
        push_int(&mut argv, "-DminY", attrs.source_volume.y, "=");
        push_int(&mut argv, "-DminZ", attrs.processed_volume.z, "=");
        push_int(&mut argv, "-Dwidth", attrs.source_volume.dx, "=");
        push_int(&mut argv, "-Dheight", attrs.source_volume.dy, "=");
        push_int(&mut argv, "-DmaxZ", attrs.processed_volume.end_z(), "=");
        push_int(&mut argv, "-DtileWidth", attrs.target_tile_width, "=");
        push_int(&mut argv, "-DtileHeight", attrs.target_tile_height, "=");

        push_kv(&mut argv, "-Dformat", &attrs.image_format, "=");
        push_float(&mut argv, "-Dquality", attrs.image_quality, 2, "=");
        push_kv(&mut argv, "-Dtype", &attrs.image_type, "=");

        push_uint(&mut argv, "-DbgValue", attrs.source_background, "=");
        push_flag(&mut argv, "-DignoreEmptyTiles", attrs.ignore_empty_tiles(), "=");

        argv.extend(["-jar".into(), self.resources.get_string("scalingJar")]);
        Ok(argv)
    }
}

/// Pass-through builder re-invoking the orchestrator binary for a mipmap
/// operation. Re-emits the full flag set so the re-invoked process
/// reproduces this run's arguments.
#[derive(Debug, Clone, Default)]
pub struct ServiceCommand {
    pub operation: String,
    pub processor: String,
    pub cluster_account_id: String,
    pub job_name: String,
}

impl ServiceCommand {
    /// A builder for one of the terminal operations; anything other than
    /// `retile` or `scale` is refused.
    pub fn terminal(operation: &str, processor: &str) -> Result<Self, SchedulerError> {
        match operation {
            "retile" | "scale" => Ok(Self {
                operation: operation.into(),
                processor: processor.into(),
                ..Default::default()
            }),
            other => Err(SchedulerError::Validation(format!(
                "invalid operation {other} - only retile and scale can be re-invoked"
            ))),
        }
    }
}

impl CommandBuilder for ServiceCommand {
    fn build(&self, args: &crate::args::JobArgs) -> Result<Vec<String>, SchedulerError> {
        let attrs = MipmapAttrs::extract(args)?;
        let mut argv = vec!["-mipmapsProcessor".to_string(), self.processor.clone()];
        if !self.cluster_account_id.is_empty() {
            argv.extend(["-A".into(), self.cluster_account_id.clone()]);
        }
        if !self.job_name.is_empty() {
            argv.extend(["-jobName".into(), self.job_name.clone()]);
        }
        argv.push(self.operation.clone());

        if !attrs.configs.is_empty() {
            argv.extend(["-config".into(), attrs.configs.join(",")]);
        }

        let mut opt_int = |name: &str, value: i64| {
            if value >= 0 {
                argv.extend([name.to_string(), value.to_string()]);
            }
        };
        opt_int("-image_width", attrs.image_width);
        opt_int("-image_height", attrs.image_height);
        opt_int("-image_depth", attrs.image_depth);
        opt_int("-source_min_x", attrs.source_min_x);
        opt_int("-source_min_y", attrs.source_min_y);
        opt_int("-source_min_z", attrs.source_min_z);
        opt_int("-source_max_x", attrs.source_max_x);
        opt_int("-source_max_y", attrs.source_max_y);
        opt_int("-source_max_z", attrs.source_max_z);
        opt_int("-source_tile_width", attrs.source_tile_width);
        opt_int("-source_tile_height", attrs.source_tile_height);
        opt_int("-target_min_x", attrs.target_min_x);
        opt_int("-target_min_y", attrs.target_min_y);
        opt_int("-target_min_z", attrs.target_min_z);
        opt_int("-target_max_x", attrs.target_max_x);
        opt_int("-target_max_y", attrs.target_max_y);
        opt_int("-target_max_z", attrs.target_max_z);
        opt_int("-target_tile_width", attrs.target_tile_width);
        opt_int("-target_tile_height", attrs.target_tile_height);

        let mut opt_str = |name: &str, value: &str| {
            if !value.is_empty() {
                argv.extend([name.to_string(), value.to_string()]);
            }
        };
        opt_str("-source_url", &attrs.source_root_url);
        opt_str("-source_stack_format", &attrs.source_stack_format);
        opt_str("-target_url", &attrs.target_root_url);
        opt_str("-target_stack_format", &attrs.target_stack_format);
        opt_str("-xy_stack_format", &attrs.xy_stack_format);
        opt_str("-xz_stack_format", &attrs.xz_stack_format);
        opt_str("-zy_stack_format", &attrs.zy_stack_format);
        opt_str("-interpolation", &attrs.interpolation);
        opt_str("-image_type", &attrs.image_type);
        opt_str("-image_format", &attrs.image_format);

        argv.extend(["-source_xy_res".into(), attrs.source_xy_res.to_string()]);
        argv.extend(["-source_z_res".into(), attrs.source_z_res.to_string()]);
        argv.extend(["-source_scale".into(), attrs.source_scale.to_string()]);
        argv.extend(["-source_bg".into(), attrs.source_background.to_string()]);
        argv.extend(["-orientation".into(), attrs.orientation.to_string()]);
        argv.extend(["-image_quality".into(), attrs.image_quality.to_string()]);
        if attrs.process_empty_tiles {
            argv.push("-process_empty_tiles".into());
        }
        Ok(argv)
    }
}
