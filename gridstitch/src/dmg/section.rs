//! Whole-section preparation and finalization.
//!
//! A section run stitches a full Z section whose pixels and labels arrive
//! as one iGrid each. The preparer crops both grids to a band-aligned
//! window, splits them into `nSections` vertical bands, writes the band
//! files, and persists the pre-crop geometry as a [`CoordInfo`] JSON record.
//! After the per-band clients have produced their result grids, the
//! finalizer merges them side by side, embeds the merged grid back into the
//! original canvas, and renames the produced tile files to their final
//! `<base>.<col>.<row>.<ext>` names.

use super::{DmgAttrs, SectionCommand};
use crate::args::JobArgs;
use crate::config::Config;
use crate::igrid::{read_igrid, write_igrid, TileGrid};
use crate::job::{Job, JobMonitor, Processor, SchedulerError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const CROP_PIXELS_EXT: &str = ".crop.pixels";
const CROP_LABELS_EXT: &str = ".crop.labels";
const CROPPED_RESULT_EXT: &str = ".croppedResult";
const GRID_EXT: &str = ".iGrid";

/// Pre-crop geometry of a section, persisted between prepare and finalize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordInfo {
    #[serde(rename = "pixels_in")]
    pub input_pixels: String,
    #[serde(rename = "labels_in")]
    pub input_labels: String,
    #[serde(rename = "offset_x_tiles")]
    pub min_col: i32,
    #[serde(rename = "max_x_tiles")]
    pub max_col: i32,
    #[serde(rename = "original_x_tiles")]
    pub ncols: i32,
    #[serde(rename = "offset_y_tiles")]
    pub min_row: i32,
    #[serde(rename = "max_y_tiles")]
    pub max_row: i32,
    #[serde(rename = "original_y_tiles")]
    pub nrows: i32,
    #[serde(rename = "tile_size_x")]
    pub tile_width: i64,
    #[serde(rename = "tile_size_y")]
    pub tile_height: i64,
}

/// Widens `[min_col, max_col)` to a multiple of `sections`, extending to
/// the right unless that passes `ncols`, in which case the window shifts
/// left with `min_col` clamped at 0.
fn widen_window(min_col: i32, max_col: i32, ncols: i32, sections: i32) -> (i32, i32) {
    let width = max_col - min_col;
    let rem = width % sections;
    let width = if rem == 0 {
        width
    } else {
        width + sections - rem
    };
    if min_col + width <= ncols {
        (min_col, min_col + width)
    } else {
        let min_col = (ncols - width).max(0);
        (min_col, min_col + width)
    }
}

fn grid_base_name(path: &str) -> String {
    let base = Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    base.strip_suffix(GRID_EXT).unwrap_or(&base).to_string()
}

/// Prepares section jobs and assembles their final results.
pub struct SectionHelper;

impl SectionHelper {
    /// Crops and splits the section grids, persists the [`CoordInfo`], and
    /// returns the arguments for the per-band processing job: `pixelsList`,
    /// `labelsList` and `outList` populated, the singletons cleared.
    pub fn prepare_section_job_args(
        args: &JobArgs,
        resources: &Config,
    ) -> Result<JobArgs, SchedulerError> {
        let attrs = DmgAttrs::extract(args)?;

        create_target_dir(&attrs.target_dir)?;

        let pixels_grid = read_igrid(Path::new(&attrs.pixels))?;
        let labels_grid = read_igrid(Path::new(&attrs.labels))?;
        validate_section_grids(&pixels_grid, &labels_grid)?;

        let sections = attrs.sections as i32;
        let (p_min_col, p_min_row, p_max_col, p_max_row) = pixels_grid.bounds();
        let (min_col, max_col) = widen_window(p_min_col, p_max_col, pixels_grid.ncols(), sections);
        info!(
            "Image grid bounds are: ({}, {}), ({}, {})",
            min_col, p_min_row, max_col, p_max_row
        );
        let coord_info = CoordInfo {
            input_pixels: attrs.pixels.clone(),
            input_labels: attrs.labels.clone(),
            min_col,
            max_col,
            ncols: pixels_grid.ncols(),
            min_row: p_min_row,
            max_row: p_max_row,
            nrows: pixels_grid.nrows(),
            tile_width: attrs.tile_width,
            tile_height: attrs.tile_height,
        };

        let empty_pixels = resources.get_string("emptyPixelsTile");
        let empty_labels = resources.get_string("emptyLabelsTile");
        let target_dir = Path::new(&attrs.target_dir);
        let pixels_name = grid_base_name(&attrs.pixels);
        let labels_name = grid_base_name(&attrs.labels);

        let window = (min_col, p_min_row, max_col, p_max_row);
        let pixels_list = write_bands(
            &pixels_grid,
            window,
            sections,
            target_dir,
            &pixels_name,
            CROP_PIXELS_EXT,
            &empty_pixels,
        )?;
        let labels_list = write_bands(
            &labels_grid,
            window,
            sections,
            target_dir,
            &labels_name,
            CROP_LABELS_EXT,
            &empty_labels,
        )?;
        let out_list: Vec<String> = (0..sections)
            .map(|band| {
                target_dir
                    .join(format!("{pixels_name}{CROPPED_RESULT_EXT}.{band}{GRID_EXT}"))
                    .display()
                    .to_string()
            })
            .collect();

        let coord_path = target_dir.join(&attrs.coord_file);
        let coord_json = serde_json::to_string(&coord_info)
            .map_err(|err| SchedulerError::Validation(format!("error encoding {coord_info:?}: {err}")))?;
        std::fs::write(&coord_path, coord_json)?;

        let mut section_args = args.clone();
        section_args.set_string("pixels", "");
        section_args.set_string("labels", "");
        section_args.set_string("out", "");
        section_args.set_string_list("pixelsList", pixels_list);
        section_args.set_string_list("labelsList", labels_list);
        section_args.set_string_list("outList", out_list);
        Ok(section_args)
    }

    /// Merges the per-band result grids, embeds them into the original
    /// canvas, renames the produced tiles and writes the final grid.
    /// Individual rename failures are logged and skipped so partial results
    /// are preserved.
    pub fn create_section_job_results(
        args: &JobArgs,
        resources: &Config,
    ) -> Result<(), SchedulerError> {
        let attrs = DmgAttrs::extract(args)?;
        let target_dir = Path::new(&attrs.target_dir);

        let coord_path = target_dir.join(&attrs.coord_file);
        let coord_info = read_coord_file(&coord_path)?;

        let mut band_grids = Vec::with_capacity(attrs.out_list.len());
        for band_file in &attrs.out_list {
            band_grids.push(read_igrid(Path::new(band_file))?);
        }
        let merged = TileGrid::merge(&band_grids);
        let mut final_grid = merged.uncrop(
            coord_info.min_col,
            coord_info.min_row,
            coord_info.ncols,
            coord_info.nrows,
        );

        let base_name = grid_base_name(&coord_info.input_pixels);
        rename_result_tiles(&mut final_grid, target_dir, &base_name);

        let final_path = target_dir.join(format!("{base_name}.final{GRID_EXT}"));
        let empty_pixels = resources.get_string("emptyPixelsTile");
        write_igrid(&final_path, &final_grid, &empty_pixels)?;
        Ok(())
    }
}

fn create_target_dir(target_dir: &str) -> Result<(), SchedulerError> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o775)
        .create(target_dir)?;
    Ok(())
}

fn validate_section_grids(pixels: &TileGrid, labels: &TileGrid) -> Result<(), SchedulerError> {
    if pixels.ncols() != labels.ncols() || pixels.nrows() != labels.nrows() {
        return Err(SchedulerError::Validation(format!(
            "pixels and labels have different dimensions: ({}, {}) vs ({}, {})",
            pixels.ncols(),
            pixels.nrows(),
            labels.ncols(),
            labels.nrows()
        )));
    }
    if pixels.bounds() != labels.bounds() {
        return Err(SchedulerError::Validation(format!(
            "pixels and labels have different boundaries: {:?} vs {:?}",
            pixels.bounds(),
            labels.bounds()
        )));
    }
    if pixels.tile_count() != labels.tile_count() {
        return Err(SchedulerError::Validation(format!(
            "the number of non empty pixel and label tiles must be equal: {} vs {}",
            pixels.tile_count(),
            labels.tile_count()
        )));
    }
    Ok(())
}

fn write_bands(
    grid: &TileGrid,
    window: (i32, i32, i32, i32),
    sections: i32,
    target_dir: &Path,
    base_name: &str,
    crop_ext: &str,
    empty_tile: &str,
) -> Result<Vec<String>, SchedulerError> {
    let (min_col, min_row, max_col, max_row) = window;
    let cropped = grid.crop(min_col, min_row, max_col, max_row);
    write_igrid(
        &target_dir.join(format!("{base_name}{crop_ext}{GRID_EXT}")),
        &cropped,
        empty_tile,
    )?;

    let mut band_files = Vec::with_capacity(sections as usize);
    for (band, band_grid) in cropped.split(sections).iter().enumerate() {
        let band_path = target_dir.join(format!("{base_name}{crop_ext}.{band}{GRID_EXT}"));
        write_igrid(&band_path, band_grid, empty_tile)?;
        band_files.push(band_path.display().to_string());
    }
    Ok(band_files)
}

fn read_coord_file(path: &Path) -> Result<CoordInfo, SchedulerError> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|err| {
        SchedulerError::Validation(format!(
            "error reading coordinates from {} as JSON: {err}",
            path.display()
        ))
    })
}

fn rename_result_tiles(grid: &mut TileGrid, result_dir: &Path, base_name: &str) {
    let tiles: Vec<_> = grid
        .tiles()
        .map(|(coord, name)| (coord, name.to_string()))
        .collect();
    for (coord, old_name) in tiles {
        let ext = Path::new(&old_name)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let new_path: PathBuf =
            result_dir.join(format!("{base_name}.{}.{}{ext}", coord.col, coord.row));
        if let Err(err) = std::fs::rename(&old_name, &new_path) {
            warn!(
                "error trying to rename {} -> {}: {err}",
                old_name,
                new_path.display()
            );
        }
        grid.set_tile(coord.col, coord.row, &new_path.display().to_string());
    }
}

/// Processor for whole-section jobs: prepare, delegate to the image
/// processor, then finalize once the bands have terminated.
pub struct SectionProcessor {
    image_processor: Arc<dyn Processor>,
    resources: Config,
    dmg_processor: String,
}

impl SectionProcessor {
    pub fn new(
        image_processor: Arc<dyn Processor>,
        resources: Config,
        dmg_processor: &str,
    ) -> Self {
        Self {
            image_processor,
            resources,
            dmg_processor: dmg_processor.to_string(),
        }
    }
}

#[async_trait]
impl Processor for SectionProcessor {
    async fn start(&self, job: Job) -> Result<Box<dyn JobMonitor>, SchedulerError> {
        let section_args = SectionHelper::prepare_section_job_args(&job.args, &self.resources)?;
        let section_job = Job {
            name: job.name.clone(),
            executable: job.executable.clone(),
            args: section_args.clone(),
            builder: Some(Arc::new(SectionCommand {
                operation: "dmgImage".into(),
                dmg_processor: self.dmg_processor.clone(),
                section_processor: "local".into(),
                ..Default::default()
            })),
        };
        let inner = self.image_processor.start(section_job).await?;
        Ok(Box::new(SectionMonitor {
            inner,
            section_args,
            resources: self.resources.clone(),
        }))
    }
}

/// Monitor that finalizes the section after the band jobs complete.
struct SectionMonitor {
    inner: Box<dyn JobMonitor>,
    section_args: JobArgs,
    resources: Config,
}

#[async_trait]
impl JobMonitor for SectionMonitor {
    async fn wait(&mut self) -> Result<(), SchedulerError> {
        self.inner.wait().await?;
        SectionHelper::create_section_job_results(&self.section_args, &self.resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widen_window_extends_right() {
        // Width 11 grows to 12 and there is room on the right.
        assert_eq!(widen_window(9, 20, 22, 4), (9, 21));
    }

    #[test]
    fn test_widen_window_keeps_exact_multiples() {
        assert_eq!(widen_window(4, 12, 20, 4), (4, 12));
    }

    #[test]
    fn test_widen_window_shifts_left_at_the_edge() {
        // Width 11 grows to 12 but extending right would pass ncols=20.
        assert_eq!(widen_window(9, 20, 20, 4), (8, 20));
    }

    #[test]
    fn test_widen_window_clamps_at_zero() {
        // The widened window is larger than the whole grid.
        assert_eq!(widen_window(1, 4, 4, 5), (0, 5));
    }

    #[test]
    fn test_grid_base_name() {
        assert_eq!(grid_base_name("/data/sections/1200.0.iGrid"), "1200.0");
        assert_eq!(grid_base_name("plain"), "plain");
    }

    #[test]
    fn test_coord_info_round_trip() {
        let info = CoordInfo {
            input_pixels: "/data/p.iGrid".into(),
            input_labels: "/data/l.iGrid".into(),
            min_col: 9,
            max_col: 21,
            ncols: 22,
            min_row: 2,
            max_row: 12,
            nrows: 12,
            tile_width: 8192,
            tile_height: 8192,
        };
        let json = serde_json::to_string(&info).unwrap();
        // The wire field names are fixed.
        assert!(json.contains("\"pixels_in\""));
        assert!(json.contains("\"offset_x_tiles\":9"));
        assert!(json.contains("\"original_x_tiles\":22"));
        assert!(json.contains("\"tile_size_x\":8192"));

        let reread: CoordInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(reread, info);
    }

    #[test]
    fn test_validate_section_grids_dimension_mismatch() {
        let pixels = TileGrid::new(4, 4);
        let labels = TileGrid::new(4, 5);
        let err = validate_section_grids(&pixels, &labels).unwrap_err();
        assert!(err.to_string().contains("different dimensions"));
    }
}
