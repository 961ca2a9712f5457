//! DMG argument registry, extraction and validation.

use crate::args::{ArgError, ArgRegistry, JobArgs};
use crate::job::SchedulerError;

/// The DMG client/server attribute set.
#[derive(Debug, Clone, Default)]
pub struct DmgAttrs {
    pub configs: Vec<String>,
    pub server_address: String,
    pub server_port: i64,
    pub sections: i64,
    pub iterations: i64,
    pub v_cycles: i64,
    pub i_weight: f64,
    pub g_weight: f64,
    pub g_scale: f64,
    pub threads: i64,
    pub verbose: bool,
    pub gray: bool,
    pub deramp: bool,
    pub tile_ext: String,
    pub tile_width: i64,
    pub tile_height: i64,
    pub client_index: i64,
    pub min_z: i64,
    pub max_z: i64,
    pub pixels_list: Vec<String>,
    pub labels_list: Vec<String>,
    pub out_list: Vec<String>,
    pub pixels: String,
    pub labels: String,
    pub out: String,
    pub scratch_dir: String,
    pub target_dir: String,
    pub coord_file: String,
}

impl DmgAttrs {
    /// Declares the DMG flag set with its defaults.
    pub fn registry() -> ArgRegistry {
        let mut r = ArgRegistry::new();
        r.declare_list("config");
        r.declare_int("sections", 1);
        r.declare_int("iters", 5);
        r.declare_int("vCycles", 1);
        r.declare_float("iWeight", 0.0);
        r.declare_float("gWeight", 1.0);
        r.declare_float("gScale", 1.0);
        r.declare_string("serverAddress", "");
        r.declare_int("serverPort", 0);
        r.declare_bool("verbose", false);
        r.declare_bool("gray", true);
        r.declare_bool("deramp", true);
        r.declare_int("tileWidth", 8192);
        r.declare_int("tileHeight", 8192);
        r.declare_string("tileExt", "png");
        r.declare_int("clientIndex", 0);
        r.declare_int("threads", 1);
        r.declare_int("minZ", 0);
        r.declare_int("maxZ", 0);
        r.declare_list("pixelsList");
        r.declare_list("labelsList");
        r.declare_list("outList");
        r.declare_string("pixels", "");
        r.declare_string("labels", "");
        r.declare_string("out", "");
        r.declare_string("temp", "/var/tmp");
        r.declare_string("targetDir", "");
        r.declare_string("coordFile", "offset.json");
        r
    }

    /// Reads the full attribute set out of a job's arguments.
    pub fn extract(args: &JobArgs) -> Result<Self, ArgError> {
        Ok(Self {
            configs: args.get_string_list("config")?,
            server_address: args.get_string("serverAddress")?,
            server_port: args.get_int("serverPort")?,
            sections: args.get_int("sections")?,
            iterations: args.get_int("iters")?,
            v_cycles: args.get_int("vCycles")?,
            i_weight: args.get_float("iWeight")?,
            g_weight: args.get_float("gWeight")?,
            g_scale: args.get_float("gScale")?,
            threads: args.get_int("threads")?,
            verbose: args.get_bool("verbose")?,
            gray: args.get_bool("gray")?,
            deramp: args.get_bool("deramp")?,
            tile_ext: args.get_string("tileExt")?,
            tile_width: args.get_int("tileWidth")?,
            tile_height: args.get_int("tileHeight")?,
            client_index: args.get_int("clientIndex")?,
            min_z: args.get_int("minZ")?,
            max_z: args.get_int("maxZ")?,
            pixels_list: args.get_string_list("pixelsList")?,
            labels_list: args.get_string_list("labelsList")?,
            out_list: args.get_string_list("outList")?,
            pixels: args.get_string("pixels")?,
            labels: args.get_string("labels")?,
            out: args.get_string("out")?,
            scratch_dir: args.get_string("temp")?,
            target_dir: args.get_string("targetDir")?,
            coord_file: args.get_string("coordFile")?,
        })
    }

    /// Checks the semantic constraints before any job is submitted.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        let invalid = |message: String| Err(SchedulerError::Validation(message));
        let n_images = self.pixels_list.len();
        if self.labels_list.len() != n_images {
            return invalid("pixelsList and labelsList must have the same length".into());
        }
        if self.out_list.len() != n_images {
            return invalid("pixelsList and outList must have the same length".into());
        }
        if n_images == 0 {
            if self.pixels.is_empty() {
                return invalid("no source pixels has been defined".into());
            }
            if self.labels.is_empty() {
                return invalid("no source labels has been defined".into());
            }
            if self.out.is_empty() {
                return invalid("no output image has been defined".into());
            }
            if self.sections > 1 {
                return invalid(
                    "the number of sections must be equal to the number of source images".into(),
                );
            }
            return Ok(());
        }
        if self.sections <= 0 {
            return invalid(format!("invalid number of sections {}", self.sections));
        }
        if n_images as i64 != self.sections {
            return invalid(
                "the number of sections must be equal to the number of source images".into(),
            );
        }
        for i in 0..n_images {
            if self.pixels_list[i].is_empty() {
                return invalid(format!("pixels image not defined at index {i}"));
            }
            if self.labels_list[i].is_empty() {
                return invalid(format!("labels image not defined at index {i}"));
            }
            if self.out_list[i].is_empty() {
                return invalid(format!("output image not defined at index {i}"));
            }
        }
        Ok(())
    }
}
