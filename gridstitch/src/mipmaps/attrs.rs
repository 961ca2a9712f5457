//! Mipmap attributes and the working-volume model.

use crate::args::{ArgRegistry, JobArgs};
use crate::job::SchedulerError;
use std::str::FromStr;

/// Plane orientation of a tile stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Xy,
    Xz,
    Zy,
}

impl Orientation {
    /// The orientation component used in DVID tile paths, which spells the
    /// ZY plane `yz`.
    pub fn format_dvid(&self) -> &'static str {
        match self {
            Orientation::Xy => "xy",
            Orientation::Xz => "xz",
            Orientation::Zy => "yz",
        }
    }
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Orientation::Xy => "xy",
            Orientation::Xz => "xz",
            Orientation::Zy => "zy",
        };
        f.write_str(name)
    }
}

impl FromStr for Orientation {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "xy" | "yx" => Ok(Orientation::Xy),
            "xz" | "zx" => Ok(Orientation::Xz),
            "zy" | "yz" => Ok(Orientation::Zy),
            other => Err(format!(
                "invalid orientation value: {other} - valid values are: xy, xz, zy"
            )),
        }
    }
}

/// An axis-aligned half-open 3D box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Volume {
    pub x: i64,
    pub y: i64,
    pub z: i64,
    pub dx: i64,
    pub dy: i64,
    pub dz: i64,
}

impl Volume {
    pub fn max_x(&self) -> i64 {
        self.x + self.dx
    }

    pub fn max_y(&self) -> i64 {
        self.y + self.dy
    }

    pub fn max_z(&self) -> i64 {
        self.z + self.dz
    }

    /// Closed upper bound of the volume's Z, never negative.
    pub fn end_z(&self) -> i64 {
        (self.z + self.dz - 1).max(0)
    }

    pub fn set_max_x(&mut self, max_x: i64) {
        self.dx = max_x - self.x;
    }

    pub fn set_max_y(&mut self, max_y: i64) {
        self.dy = max_y - self.y;
    }

    pub fn set_max_z(&mut self, max_z: i64) {
        self.dz = max_z - self.z;
    }

    /// Right-shifts every coordinate by the per-axis power of two.
    pub fn scale(&self, x_factor: u32, y_factor: u32, z_factor: u32) -> Volume {
        Volume {
            x: self.x >> x_factor,
            y: self.y >> y_factor,
            z: self.z >> z_factor,
            dx: self.dx >> x_factor,
            dy: self.dy >> y_factor,
            dz: self.dz >> z_factor,
        }
    }
}

impl std::fmt::Display for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {}, {}) ({}, {}, {})",
            self.x, self.y, self.z, self.dx, self.dy, self.dz
        )
    }
}

fn scale_dim(value: i64, factor: f64, round: fn(f64) -> f64) -> i64 {
    round(value as f64 * factor) as i64
}

/// The mipmap attribute set, with the derived working volumes.
#[derive(Debug, Clone, Default)]
pub struct MipmapAttrs {
    pub configs: Vec<String>,

    pub image_width: i64,
    pub image_height: i64,
    pub image_depth: i64,

    pub source_min_x: i64,
    pub source_min_y: i64,
    pub source_min_z: i64,
    pub source_max_x: i64,
    pub source_max_y: i64,
    pub source_max_z: i64,
    pub source_tile_width: i64,
    pub source_tile_height: i64,
    pub source_root_url: String,
    pub source_stack_format: String,

    pub target_min_x: i64,
    pub target_min_y: i64,
    pub target_min_z: i64,
    pub target_max_x: i64,
    pub target_max_y: i64,
    pub target_max_z: i64,
    pub target_tile_width: i64,
    pub target_tile_height: i64,
    pub target_root_url: String,
    pub target_stack_format: String,

    pub xy_stack_format: String,
    pub xz_stack_format: String,
    pub zy_stack_format: String,

    pub source_xy_res: f64,
    pub source_z_res: f64,
    pub source_scale: u32,
    pub source_background: u64,

    pub orientation: Orientation,
    pub image_type: String,
    pub image_format: String,
    pub image_quality: f64,

    pub interpolation: String,
    pub process_empty_tiles: bool,

    pub src_scale_fmt: String,
    pub src_tile_col_fmt: String,
    pub src_tile_row_fmt: String,
    pub src_tile_layer_fmt: String,
    pub src_x_fmt: String,
    pub src_y_fmt: String,
    pub src_z_fmt: String,
    pub target_scale_fmt: String,
    pub target_tile_col_fmt: String,
    pub target_tile_row_fmt: String,
    pub target_tile_layer_fmt: String,
    pub target_x_fmt: String,
    pub target_y_fmt: String,
    pub target_z_fmt: String,

    pub total_volume: Volume,
    pub source_volume: Volume,
    pub processed_volume: Volume,
}

impl MipmapAttrs {
    /// Declares the mipmap flag set with its defaults.
    pub fn registry() -> ArgRegistry {
        let mut r = ArgRegistry::new();
        r.declare_list("config");
        r.declare_int("image_width", -1);
        r.declare_int("image_height", -1);
        r.declare_int("image_depth", -1);
        r.declare_int("source_min_x", 0);
        r.declare_int("source_min_y", 0);
        r.declare_int("source_min_z", 0);
        r.declare_int("source_max_x", -1);
        r.declare_int("source_max_y", -1);
        r.declare_int("source_max_z", -1);
        r.declare_int("source_tile_width", 8192);
        r.declare_int("source_tile_height", 8192);
        r.declare_string("source_url", "");
        r.declare_string("source_stack_format", "");
        r.declare_int("target_min_x", 0);
        r.declare_int("target_min_y", 0);
        r.declare_int("target_min_z", 0);
        r.declare_int("target_max_x", -1);
        r.declare_int("target_max_y", -1);
        r.declare_int("target_max_z", -1);
        r.declare_int("target_tile_width", 1024);
        r.declare_int("target_tile_height", 1024);
        r.declare_string("target_url", "");
        r.declare_string("target_stack_format", "");
        r.declare_string("xy_stack_format", "");
        r.declare_string("xz_stack_format", "");
        r.declare_string("zy_stack_format", "");
        r.declare_float("source_xy_res", 1.0);
        r.declare_float("source_z_res", 1.0);
        r.declare_uint("source_scale", 0);
        r.declare_uint("source_bg", 0);
        r.declare_string("orientation", "xy");
        r.declare_string("image_type", "gray");
        r.declare_string("image_format", "jpg");
        r.declare_float("image_quality", 1.0);
        r.declare_string("interpolation", "");
        r.declare_bool("process_empty_tiles", false);
        r.declare_string("src_scale_fmt", "");
        r.declare_string("src_tile_col_fmt", "");
        r.declare_string("src_tile_row_fmt", "");
        r.declare_string("src_tile_layer_fmt", "");
        r.declare_string("src_x_fmt", "");
        r.declare_string("src_y_fmt", "");
        r.declare_string("src_z_fmt", "");
        r.declare_string("scale_fmt", "");
        r.declare_string("tile_col_fmt", "");
        r.declare_string("tile_row_fmt", "");
        r.declare_string("tile_layer_fmt", "");
        r.declare_string("x_fmt", "");
        r.declare_string("y_fmt", "");
        r.declare_string("z_fmt", "");
        r
    }

    /// Reads the attribute set out of a job's arguments and derives the
    /// total, source and processed working volumes.
    pub fn extract(args: &JobArgs) -> Result<Self, SchedulerError> {
        let orientation = args
            .get_string("orientation")?
            .parse::<Orientation>()
            .map_err(SchedulerError::Validation)?;
        let mut attrs = Self {
            configs: args.get_string_list("config")?,
            image_width: args.get_int("image_width")?,
            image_height: args.get_int("image_height")?,
            image_depth: args.get_int("image_depth")?,
            source_min_x: args.get_int("source_min_x")?,
            source_min_y: args.get_int("source_min_y")?,
            source_min_z: args.get_int("source_min_z")?,
            source_max_x: args.get_int("source_max_x")?,
            source_max_y: args.get_int("source_max_y")?,
            source_max_z: args.get_int("source_max_z")?,
            source_tile_width: args.get_int("source_tile_width")?,
            source_tile_height: args.get_int("source_tile_height")?,
            source_root_url: args.get_string("source_url")?,
            source_stack_format: args.get_string("source_stack_format")?,
            target_min_x: args.get_int("target_min_x")?,
            target_min_y: args.get_int("target_min_y")?,
            target_min_z: args.get_int("target_min_z")?,
            target_max_x: args.get_int("target_max_x")?,
            target_max_y: args.get_int("target_max_y")?,
            target_max_z: args.get_int("target_max_z")?,
            target_tile_width: args.get_int("target_tile_width")?,
            target_tile_height: args.get_int("target_tile_height")?,
            target_root_url: args.get_string("target_url")?,
            target_stack_format: args.get_string("target_stack_format")?,
            xy_stack_format: args.get_string("xy_stack_format")?,
            xz_stack_format: args.get_string("xz_stack_format")?,
            zy_stack_format: args.get_string("zy_stack_format")?,
            source_xy_res: args.get_float("source_xy_res")?,
            source_z_res: args.get_float("source_z_res")?,
            source_scale: args.get_uint("source_scale")? as u32,
            source_background: args.get_uint("source_bg")?,
            orientation,
            image_type: args.get_string("image_type")?,
            image_format: args.get_string("image_format")?,
            image_quality: args.get_float("image_quality")?,
            interpolation: args.get_string("interpolation")?,
            process_empty_tiles: args.get_bool("process_empty_tiles")?,
            src_scale_fmt: args.get_string("src_scale_fmt")?,
            src_tile_col_fmt: args.get_string("src_tile_col_fmt")?,
            src_tile_row_fmt: args.get_string("src_tile_row_fmt")?,
            src_tile_layer_fmt: args.get_string("src_tile_layer_fmt")?,
            src_x_fmt: args.get_string("src_x_fmt")?,
            src_y_fmt: args.get_string("src_y_fmt")?,
            src_z_fmt: args.get_string("src_z_fmt")?,
            target_scale_fmt: args.get_string("scale_fmt")?,
            target_tile_col_fmt: args.get_string("tile_col_fmt")?,
            target_tile_row_fmt: args.get_string("tile_row_fmt")?,
            target_tile_layer_fmt: args.get_string("tile_layer_fmt")?,
            target_x_fmt: args.get_string("x_fmt")?,
            target_y_fmt: args.get_string("y_fmt")?,
            target_z_fmt: args.get_string("z_fmt")?,
            ..Default::default()
        };
        attrs.update_total_volume();
        attrs.update_source_volume();
        attrs.update_processed_volume();
        Ok(attrs)
    }

    /// Whether empty source tiles are skipped during tiling.
    pub fn ignore_empty_tiles(&self) -> bool {
        !self.process_empty_tiles
    }

    /// The whole image volume, anchored at the origin.
    fn update_total_volume(&mut self) {
        fn set_dim(total: i64, cropped: i64, set: impl FnOnce(i64)) {
            if total > 0 {
                set(total);
            } else if cropped > 0 {
                set(cropped);
            }
        }
        self.total_volume = Volume::default();
        let v = &mut self.total_volume;
        set_dim(self.image_width, self.source_max_x, |max| v.set_max_x(max));
        set_dim(self.image_height, self.source_max_y, |max| v.set_max_y(max));
        set_dim(self.image_depth, self.source_max_z, |max| v.set_max_z(max));
    }

    /// The cropped source volume in absolute pixel coordinates.
    fn update_source_volume(&mut self) {
        fn set_dim(image: i64, source: i64, set: impl FnOnce(i64)) {
            if source > 0 {
                set(source);
            } else if image > 0 {
                set(image);
            }
        }
        self.source_volume = Volume {
            x: self.source_min_x,
            y: self.source_min_y,
            z: self.source_min_z,
            ..Default::default()
        };
        let v = &mut self.source_volume;
        set_dim(self.image_width, self.source_max_x, |max| v.set_max_x(max));
        set_dim(self.image_height, self.source_max_y, |max| v.set_max_y(max));
        set_dim(self.image_depth, self.source_max_z, |max| v.set_max_z(max));
    }

    /// The processed volume, relative to the source volume origin and
    /// clamped to the source extents.
    fn update_processed_volume(&mut self) {
        fn set_dim(limit: i64, processed: i64, set: impl FnOnce(i64)) {
            if processed > 0 && processed < limit {
                set(processed);
            } else {
                set(limit);
            }
        }
        self.processed_volume = Volume {
            x: self.target_min_x,
            y: self.target_min_y,
            z: self.target_min_z,
            ..Default::default()
        };
        let v = &mut self.processed_volume;
        set_dim(self.source_volume.dx, self.target_max_x, |max| {
            v.set_max_x(max)
        });
        set_dim(self.source_volume.dy, self.target_max_y, |max| {
            v.set_max_y(max)
        });
        set_dim(self.source_volume.dz, self.target_max_z, |max| {
            v.set_max_z(max)
        });
    }

    /// Checks that every axis has a usable extent.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.image_width <= 0 && self.source_max_x <= 0 {
            return Err(SchedulerError::Validation(format!(
                "invalid image width: imageWidth={}, maxX={}",
                self.image_width, self.source_max_x
            )));
        }
        if self.image_height <= 0 && self.source_max_y <= 0 {
            return Err(SchedulerError::Validation(format!(
                "invalid image height: imageHeight={}, maxY={}",
                self.image_height, self.source_max_y
            )));
        }
        if self.image_depth <= 0 && self.source_max_z <= 0 {
            return Err(SchedulerError::Validation(format!(
                "invalid image depth: imageDepth={}, maxZ={}",
                self.image_depth, self.source_max_z
            )));
        }
        Ok(())
    }

    /// Anisotropy correction applied to the Z axis when reslicing.
    fn scale_z_factor(&self) -> f64 {
        if self.source_xy_res <= 0.0 || self.source_z_res <= 0.0 {
            1.0
        } else {
            self.source_z_res / self.source_xy_res
        }
    }

    /// Rewrites the attributes for the scaling stage: dimensions and
    /// volumes are shifted down by `source_scale`, and for the reoriented
    /// planes the axes are swapped with the Z extent corrected by the
    /// resolution factor. Origins round down, extents round up.
    pub fn scale_args(&self) -> MipmapAttrs {
        let mut scaled = self.clone();
        let z_factor = self.scale_z_factor();
        let s = self.source_scale;
        match self.orientation {
            // XY mipmaps are generated without any Z scaling.
            Orientation::Xy => {
                scaled.image_width = self.image_width >> s;
                scaled.image_height = self.image_height >> s;
                scaled.image_depth = self.image_depth;
                scaled.source_volume = self.source_volume.scale(s, s, 0);
                scaled.processed_volume = self.processed_volume.scale(s, s, 0);
            }
            Orientation::Xz => {
                scaled.image_width = self.image_width >> s;
                scaled.image_height = scale_dim(self.image_depth, z_factor, f64::ceil) >> s;
                scaled.image_depth = self.image_height >> s;
                scaled.source_volume = Volume {
                    x: self.source_volume.x,
                    y: scale_dim(self.source_volume.z, z_factor, f64::floor),
                    z: self.source_volume.y,
                    dx: self.source_volume.dx,
                    dy: scale_dim(self.source_volume.dz, z_factor, f64::ceil),
                    dz: self.source_volume.dy,
                }
                .scale(s, s, s);
                scaled.processed_volume = Volume {
                    x: self.processed_volume.x,
                    y: scale_dim(self.processed_volume.z, z_factor, f64::floor),
                    z: self.processed_volume.y,
                    dx: self.processed_volume.dx,
                    dy: scale_dim(self.processed_volume.dz, z_factor, f64::ceil),
                    dz: self.processed_volume.dy,
                }
                .scale(s, s, s);
            }
            Orientation::Zy => {
                scaled.image_width = scale_dim(self.image_depth, z_factor, f64::ceil) >> s;
                scaled.image_height = self.image_height >> s;
                scaled.image_depth = self.image_width >> s;
                scaled.source_volume = Volume {
                    x: scale_dim(self.source_volume.z, z_factor, f64::floor),
                    y: self.source_volume.y,
                    z: self.source_volume.x,
                    dx: scale_dim(self.source_volume.dz, z_factor, f64::ceil),
                    dy: self.source_volume.dy,
                    dz: self.source_volume.dx,
                }
                .scale(s, s, s);
                scaled.processed_volume = Volume {
                    x: scale_dim(self.processed_volume.z, z_factor, f64::floor),
                    y: self.processed_volume.y,
                    z: self.processed_volume.x,
                    dx: scale_dim(self.processed_volume.dz, z_factor, f64::ceil),
                    dy: self.processed_volume.dy,
                    dz: self.processed_volume.dx,
                }
                .scale(s, s, s);
            }
        }
        scaled
    }

    /// Argument set for the native XY projection.
    pub fn generate_xy_args(&self, args: &JobArgs) -> JobArgs {
        self.orientation_args(args, Orientation::Xy, &self.xy_stack_format)
    }

    /// Argument set for the XZ projection.
    pub fn generate_xz_args(&self, args: &JobArgs) -> JobArgs {
        self.orientation_args(args, Orientation::Xz, &self.xz_stack_format)
    }

    /// Argument set for the ZY projection.
    pub fn generate_zy_args(&self, args: &JobArgs) -> JobArgs {
        self.orientation_args(args, Orientation::Zy, &self.zy_stack_format)
    }

    fn orientation_args(
        &self,
        args: &JobArgs,
        orientation: Orientation,
        stack_format: &str,
    ) -> JobArgs {
        let mut generated = args.clone();
        generated.set_string("orientation", &orientation.to_string());
        if !stack_format.is_empty() {
            generated.set_string("target_stack_format", stack_format);
        }
        generated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn args() -> JobArgs {
        JobArgs::new(Arc::new(MipmapAttrs::registry()))
    }

    #[test]
    fn test_orientation_parse_and_format() {
        assert_eq!("xy".parse::<Orientation>().unwrap(), Orientation::Xy);
        assert_eq!("ZX".parse::<Orientation>().unwrap(), Orientation::Xz);
        assert_eq!("yz".parse::<Orientation>().unwrap(), Orientation::Zy);
        assert!("diagonal".parse::<Orientation>().is_err());

        assert_eq!(Orientation::Zy.to_string(), "zy");
        assert_eq!(Orientation::Zy.format_dvid(), "yz");
    }

    #[test]
    fn test_volume_accessors() {
        let v = Volume {
            x: 10,
            y: 20,
            z: 0,
            dx: 100,
            dy: 50,
            dz: 8,
        };
        assert_eq!(v.max_x(), 110);
        assert_eq!(v.max_y(), 70);
        assert_eq!(v.max_z(), 8);
        assert_eq!(v.end_z(), 7);
        assert_eq!(Volume::default().end_z(), 0);
    }

    #[test]
    fn test_volume_scale_shifts_coordinates() {
        let v = Volume {
            x: 4096,
            y: 8192,
            z: 6,
            dx: 16384,
            dy: 16384,
            dz: 10,
        };
        let scaled = v.scale(2, 2, 0);
        assert_eq!(scaled.x, 1024);
        assert_eq!(scaled.dy, 4096);
        assert_eq!(scaled.z, 6);
        assert_eq!(scaled.dz, 10);
    }

    #[test]
    fn test_extract_derives_volumes_from_image_dimensions() {
        let mut a = args();
        a.set_int("image_width", 16384);
        a.set_int("image_height", 16384);
        a.set_int("image_depth", 10);
        let attrs = MipmapAttrs::extract(&a).unwrap();

        let expected = Volume {
            x: 0,
            y: 0,
            z: 0,
            dx: 16384,
            dy: 16384,
            dz: 10,
        };
        assert_eq!(attrs.total_volume, expected);
        assert_eq!(attrs.source_volume, expected);
        assert_eq!(attrs.processed_volume, expected);
        attrs.validate().unwrap();
    }

    #[test]
    fn test_processed_volume_is_clamped_to_source_extents() {
        let mut a = args();
        a.set_int("image_width", 1000);
        a.set_int("image_height", 1000);
        a.set_int("image_depth", 10);
        a.set_int("target_max_z", 500);
        let attrs = MipmapAttrs::extract(&a).unwrap();
        // The requested depth exceeds the source depth.
        assert_eq!(attrs.processed_volume.dz, 10);
    }

    #[test]
    fn test_validate_rejects_missing_extent() {
        let mut a = args();
        a.set_int("image_width", 1000);
        a.set_int("image_height", 1000);
        let err = MipmapAttrs::extract(&a).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("invalid image depth"));
    }

    #[test]
    fn test_scale_args_xy_keeps_depth() {
        let mut a = args();
        a.set_int("image_width", 16384);
        a.set_int("image_height", 8192);
        a.set_int("image_depth", 10);
        a.set_uint("source_scale", 2);
        let attrs = MipmapAttrs::extract(&a).unwrap();
        let scaled = attrs.scale_args();

        assert_eq!(scaled.image_width, 4096);
        assert_eq!(scaled.image_height, 2048);
        assert_eq!(scaled.image_depth, 10);
        assert_eq!(scaled.source_volume.dx, 4096);
        assert_eq!(scaled.source_volume.dz, 10);
    }

    #[test]
    fn test_scale_args_xz_swaps_axes_with_z_factor() {
        let mut a = args();
        a.set_int("image_width", 1000);
        a.set_int("image_height", 800);
        a.set_int("image_depth", 7);
        a.set_string("orientation", "xz");
        a.set_float("source_xy_res", 4.0);
        a.set_float("source_z_res", 40.0);
        let attrs = MipmapAttrs::extract(&a).unwrap();
        let scaled = attrs.scale_args();

        // Depth 7 at z-factor 10 becomes a height of 70 (ceil), while the
        // old height becomes the depth.
        assert_eq!(scaled.image_height, 70);
        assert_eq!(scaled.image_depth, 800);
        assert_eq!(scaled.source_volume.dy, 70);
        assert_eq!(scaled.source_volume.dz, 800);
    }

    #[test]
    fn test_scale_args_rounding_discipline() {
        let mut a = args();
        a.set_int("image_width", 100);
        a.set_int("image_height", 100);
        a.set_int("image_depth", 10);
        a.set_int("source_min_z", 3);
        a.set_int("source_max_z", 10);
        a.set_string("orientation", "zy");
        a.set_float("source_xy_res", 4.0);
        a.set_float("source_z_res", 10.0);
        let attrs = MipmapAttrs::extract(&a).unwrap();
        let scaled = attrs.scale_args();

        // Origin 3 * 2.5 = 7.5 floors to 7; extent 7 * 2.5 = 17.5 ceils
        // to 18.
        assert_eq!(scaled.source_volume.x, 7);
        assert_eq!(scaled.source_volume.dx, 18);
    }

    #[test]
    fn test_orientation_arg_generators() {
        let mut a = args();
        a.set_string("xz_stack_format", "{plane}/{scale}/{tile_col}");
        let attrs = MipmapAttrs::extract(&a).unwrap();

        let xz = attrs.generate_xz_args(&a);
        assert_eq!(xz.get_string("orientation").unwrap(), "xz");
        assert_eq!(
            xz.get_string("target_stack_format").unwrap(),
            "{plane}/{scale}/{tile_col}"
        );

        // No zy format configured: the target format is left alone.
        let zy = attrs.generate_zy_args(&a);
        assert_eq!(zy.get_string("orientation").unwrap(), "zy");
        assert_eq!(zy.get_string("target_stack_format").unwrap(), "");
    }
}
