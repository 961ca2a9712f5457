//! Splitters decomposing a mipmap job into independent subjobs.

use super::{MipmapAttrs, Orientation, ServiceCommand, Volume};
use crate::config::Config;
use crate::job::{Job, SchedulerError, Splitter};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

fn per_job_setting(resources: &Config, key: &str) -> i64 {
    match resources.get_int(key) {
        0 => 1,
        value => value,
    }
}

fn set_source_volume(args: &mut crate::args::JobArgs, source: &Volume) {
    args.set_int("source_min_x", source.x);
    args.set_int("source_min_y", source.y);
    args.set_int("source_min_z", source.z);
    args.set_int("source_max_x", source.max_x());
    args.set_int("source_max_y", source.max_y());
    args.set_int("source_max_z", source.max_z());
}

fn set_target_volume(args: &mut crate::args::JobArgs, target: &Volume) {
    args.set_int("target_min_x", target.x);
    args.set_int("target_min_y", target.y);
    args.set_int("target_min_z", target.z);
    args.set_int("target_max_x", target.max_x());
    args.set_int("target_max_y", target.max_y());
    args.set_int("target_max_z", target.max_z());
}

/// Slices the processed volume along the X/Y tile grid and Z layers,
/// emitting one retile subjob per block.
///
/// Block sizes come from `xTilesPerJob`/`yTilesPerJob`/`zLayersPerJob`
/// (each defaulting to 1). Every subjob carries the parent's source volume
/// unchanged plus its own clamped target volume, so the union of the
/// emitted blocks tiles the processed volume exactly.
pub struct RetileSplitter {
    resources: Config,
}

impl RetileSplitter {
    pub fn new(resources: Config) -> Self {
        Self { resources }
    }
}

#[async_trait]
impl Splitter for RetileSplitter {
    async fn split(&self, job: &Job, subjobs: &tokio::sync::mpsc::Sender<Job>) -> Result<(), SchedulerError> {
        let x_tiles = per_job_setting(&self.resources, "xTilesPerJob");
        let y_tiles = per_job_setting(&self.resources, "yTilesPerJob");
        let z_layers = per_job_setting(&self.resources, "zLayersPerJob");

        let attrs = MipmapAttrs::extract(&job.args)?;
        let volume = attrs.processed_volume;

        let mut processed_depth = if attrs.orientation == Orientation::Xy {
            z_layers
        } else {
            z_layers * attrs.source_tile_height
        };
        if processed_depth > volume.dz {
            processed_depth = volume.dz;
        }
        let processed_width = x_tiles * attrs.source_tile_width;
        let processed_height = y_tiles * attrs.source_tile_height;

        let builder = Arc::new(ServiceCommand::terminal("retile", "local")?);
        let mut next_index = 0u64;

        let mut z = volume.z;
        while z < volume.max_z() {
            let depth = processed_depth.min(volume.max_z() - z);
            let mut y = volume.y;
            while y < volume.max_y() {
                let height = processed_height.min(volume.max_y() - y);
                let mut x = volume.x;
                while x < volume.max_x() {
                    let width = processed_width.min(volume.max_x() - x);
                    let block = Volume {
                        x,
                        y,
                        z,
                        dx: width,
                        dy: height,
                        dz: depth,
                    };
                    let mut block_args = job.args.clone();
                    set_source_volume(&mut block_args, &attrs.source_volume);
                    set_target_volume(&mut block_args, &block);

                    let subjob = Job {
                        name: format!("{}_{next_index}", job.name),
                        executable: self.resources.get_string("mipmapsExec"),
                        args: block_args,
                        builder: Some(builder.clone()),
                    };
                    debug!("Generate retiling job {} for {block}", subjob.name);
                    if subjobs.send(subjob).await.is_err() {
                        return Ok(());
                    }
                    next_index += 1;
                    x += processed_width;
                }
                y += processed_height;
            }
            z += processed_depth;
        }
        Ok(())
    }
}

/// Slices the scaled processed volume along Z only, emitting one scale
/// subjob per `zLayersPerJob` layers. The attributes are first rewritten
/// through [`MipmapAttrs::scale_args`] for the target orientation.
pub struct ScaleSplitter {
    resources: Config,
}

impl ScaleSplitter {
    pub fn new(resources: Config) -> Self {
        Self { resources }
    }
}

#[async_trait]
impl Splitter for ScaleSplitter {
    async fn split(&self, job: &Job, subjobs: &tokio::sync::mpsc::Sender<Job>) -> Result<(), SchedulerError> {
        let z_layers = per_job_setting(&self.resources, "zLayersPerJob");

        let attrs = MipmapAttrs::extract(&job.args)?;
        let scaled = attrs.scale_args();
        let volume = scaled.processed_volume;

        let builder = Arc::new(ServiceCommand::terminal("scale", "local")?);
        let mut next_index = 0u64;

        let mut z = volume.z;
        while z < volume.max_z() {
            let depth = z_layers.min(volume.max_z() - z);
            let slab = Volume {
                x: volume.x,
                y: volume.y,
                z,
                dx: volume.dx,
                dy: volume.dy,
                dz: depth,
            };
            let mut slab_args = job.args.clone();
            slab_args.set_int("image_width", scaled.total_volume.dx);
            slab_args.set_int("image_height", scaled.total_volume.dy);
            slab_args.set_int("image_depth", scaled.total_volume.dz);
            set_source_volume(&mut slab_args, &scaled.source_volume);
            set_target_volume(&mut slab_args, &slab);

            let subjob = Job {
                name: format!("{}_{next_index}", job.name),
                executable: self.resources.get_string("mipmapsExec"),
                args: slab_args,
                builder: Some(builder.clone()),
            };
            debug!("Generate scaling job {} for {slab}", subjob.name);
            if subjobs.send(subjob).await.is_err() {
                return Ok(());
            }
            next_index += 1;
            z += z_layers;
        }
        Ok(())
    }
}

/// Emits the XZ and ZY orthoview subjobs, in that order.
pub struct OrthoviewsSplitter {
    pub orthoview_op: String,
    pub processor: String,
    pub cluster_account_id: String,
    pub resources: Config,
}

impl OrthoviewsSplitter {
    fn orthoview_job(
        &self,
        job: &Job,
        plane: &str,
        args: crate::args::JobArgs,
    ) -> Result<Job, SchedulerError> {
        let name = format!("{}_{plane}", job.name);
        let builder = ServiceCommand {
            operation: self.orthoview_op.clone(),
            processor: self.processor.clone(),
            cluster_account_id: self.cluster_account_id.clone(),
            job_name: name.clone(),
        };
        Ok(Job {
            name,
            executable: self.resources.get_string("mipmapsExec"),
            args,
            builder: Some(Arc::new(builder)),
        })
    }
}

#[async_trait]
impl Splitter for OrthoviewsSplitter {
    async fn split(&self, job: &Job, subjobs: &tokio::sync::mpsc::Sender<Job>) -> Result<(), SchedulerError> {
        let attrs = MipmapAttrs::extract(&job.args)?;

        let xz = self.orthoview_job(job, "xz", attrs.generate_xz_args(&job.args))?;
        if subjobs.send(xz).await.is_err() {
            return Ok(());
        }
        let zy = self.orthoview_job(job, "zy", attrs.generate_zy_args(&job.args))?;
        let _ = subjobs.send(zy).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::JobArgs;
    use tokio::sync::mpsc;

    fn mipmap_job(configure: impl FnOnce(&mut JobArgs)) -> Job {
        let mut args = JobArgs::new(Arc::new(MipmapAttrs::registry()));
        configure(&mut args);
        Job {
            name: "mipmaps".into(),
            executable: String::new(),
            args,
            builder: None,
        }
    }

    fn retile_resources() -> Config {
        let mut cfg = Config::default();
        cfg.insert("xTilesPerJob", serde_json::json!(1));
        cfg.insert("yTilesPerJob", serde_json::json!(1));
        cfg.insert("zLayersPerJob", serde_json::json!(5));
        cfg.insert("mipmapsExec", serde_json::json!("/opt/stitch/gridstitch"));
        cfg
    }

    async fn collect(
        splitter: &dyn Splitter,
        job: &Job,
    ) -> Result<Vec<Job>, SchedulerError> {
        let (tx, mut rx) = mpsc::channel(64);
        splitter.split(job, &tx).await?;
        drop(tx);
        let mut subjobs = Vec::new();
        while let Some(subjob) = rx.recv().await {
            subjobs.push(subjob);
        }
        Ok(subjobs)
    }

    fn target_volume(job: &Job) -> (i64, i64, i64, i64, i64, i64) {
        let a = &job.args;
        (
            a.get_int("target_min_x").unwrap(),
            a.get_int("target_min_y").unwrap(),
            a.get_int("target_min_z").unwrap(),
            a.get_int("target_max_x").unwrap(),
            a.get_int("target_max_y").unwrap(),
            a.get_int("target_max_z").unwrap(),
        )
    }

    #[tokio::test]
    async fn test_retile_splitter_tiles_the_volume_exactly() {
        let job = mipmap_job(|args| {
            args.set_int("image_width", 16384);
            args.set_int("image_height", 16384);
            args.set_int("image_depth", 10);
        });
        let splitter = RetileSplitter::new(retile_resources());
        let subjobs = collect(&splitter, &job).await.unwrap();

        // 2 x-blocks, 2 y-blocks, 2 z-slabs of 8192x8192x5 each.
        assert_eq!(subjobs.len(), 8);
        assert_eq!(subjobs[0].name, "mipmaps_0");
        assert_eq!(subjobs[0].executable, "/opt/stitch/gridstitch");

        let first = target_volume(&subjobs[0]);
        assert_eq!(first, (0, 0, 0, 8192, 8192, 5));
        let last = target_volume(&subjobs[7]);
        assert_eq!(last, (8192, 8192, 5, 16384, 16384, 10));

        // The blocks partition the volume: total voxels match.
        let total: i64 = subjobs
            .iter()
            .map(|j| {
                let (x0, y0, z0, x1, y1, z1) = target_volume(j);
                (x1 - x0) * (y1 - y0) * (z1 - z0)
            })
            .sum();
        assert_eq!(total, 16384_i64 * 16384 * 10);

        // Every subjob keeps the parent's source volume.
        for subjob in &subjobs {
            assert_eq!(subjob.args.get_int("source_min_x").unwrap(), 0);
            assert_eq!(subjob.args.get_int("source_max_x").unwrap(), 16384);
            assert_eq!(subjob.args.get_int("source_max_z").unwrap(), 10);
        }
    }

    #[tokio::test]
    async fn test_retile_splitter_clamps_depth_to_the_volume() {
        let job = mipmap_job(|args| {
            args.set_int("image_width", 8192);
            args.set_int("image_height", 8192);
            args.set_int("image_depth", 3);
        });
        let mut resources = retile_resources();
        resources.insert("zLayersPerJob", serde_json::json!(100));
        let splitter = RetileSplitter::new(resources);
        let subjobs = collect(&splitter, &job).await.unwrap();

        assert_eq!(subjobs.len(), 1);
        assert_eq!(target_volume(&subjobs[0]), (0, 0, 0, 8192, 8192, 3));
    }

    #[tokio::test]
    async fn test_retile_splitter_xz_depth_spans_tile_rows() {
        let job = mipmap_job(|args| {
            args.set_int("image_width", 8192);
            args.set_int("image_height", 8192);
            args.set_int("image_depth", 8192);
            args.set_string("orientation", "xz");
        });
        let mut resources = retile_resources();
        resources.insert("zLayersPerJob", serde_json::json!(1));
        let splitter = RetileSplitter::new(resources);
        let subjobs = collect(&splitter, &job).await.unwrap();

        // Depth per job is one tile height (8192), covering the volume in
        // one slab.
        assert_eq!(subjobs.len(), 1);
    }

    #[tokio::test]
    async fn test_scale_splitter_slices_z_only() {
        let job = mipmap_job(|args| {
            args.set_int("image_width", 4096);
            args.set_int("image_height", 4096);
            args.set_int("image_depth", 7);
            args.set_uint("source_scale", 1);
        });
        let mut resources = retile_resources();
        resources.insert("zLayersPerJob", serde_json::json!(3));
        let splitter = ScaleSplitter::new(resources);
        let subjobs = collect(&splitter, &job).await.unwrap();

        // Depth 7 in slabs of 3: 3 + 3 + 1.
        assert_eq!(subjobs.len(), 3);
        // XY scaling halves X/Y but keeps Z.
        assert_eq!(subjobs[0].args.get_int("image_width").unwrap(), 2048);
        assert_eq!(subjobs[0].args.get_int("image_depth").unwrap(), 7);
        assert_eq!(target_volume(&subjobs[0]).5, 3);
        assert_eq!(target_volume(&subjobs[2]).2, 6);
        assert_eq!(target_volume(&subjobs[2]).5, 7);
    }

    #[tokio::test]
    async fn test_orthoviews_splitter_emits_xz_then_zy() {
        let job = mipmap_job(|args| {
            args.set_int("image_width", 4096);
            args.set_int("image_height", 4096);
            args.set_int("image_depth", 7);
            args.set_string("xz_stack_format", "{plane}/xz");
            args.set_string("zy_stack_format", "{plane}/zy");
        });
        let splitter = OrthoviewsSplitter {
            orthoview_op: "fullPyramid".into(),
            processor: "local".into(),
            cluster_account_id: String::new(),
            resources: retile_resources(),
        };
        let subjobs = collect(&splitter, &job).await.unwrap();

        assert_eq!(subjobs.len(), 2);
        assert_eq!(subjobs[0].name, "mipmaps_xz");
        assert_eq!(subjobs[0].args.get_string("orientation").unwrap(), "xz");
        assert_eq!(subjobs[1].name, "mipmaps_zy");
        assert_eq!(subjobs[1].args.get_string("orientation").unwrap(), "zy");
    }
}
