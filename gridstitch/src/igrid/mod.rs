//! Sparse tile-grid model (the `.iGrid` format).
//!
//! An iGrid file indexes one section of a tiled volume: a header giving the
//! nominal grid dimensions followed by one tile name per cell in row-major
//! order.
//!
//! ```text
//! Columns: 3
//! Rows: 2
//! /tiles/0.0.png
//! /tiles/empty.png
//! /tiles/2.0.png
//! ...
//! ```
//!
//! A tile whose name contains the substring `empty` marks an absent cell; it
//! still advances the row-major cursor but is not stored in the sparse map.
//! The content bounding box is computed while reading: the smallest and
//! largest populated coordinates, half-open on the max side. A fully empty
//! grid has the bounding box `(-1, -1, -1, -1)`.
//!
//! Grids are immutable after read from the pipeline's point of view: the
//! geometric operations ([`TileGrid::crop`], [`TileGrid::uncrop`],
//! [`TileGrid::split`], [`TileGrid::merge`]) all return fresh grids and
//! preserve tile identity up to coordinate translation.

mod io;

pub use io::{read_igrid, write_igrid};

use std::collections::HashMap;
use thiserror::Error;

/// Marker substring identifying an absent cell.
const EMPTY_TILE_MARKER: &str = "empty";

/// Errors raised while reading or writing iGrid files.
#[derive(Debug, Error)]
pub enum GridError {
    #[error("I/O error on {file}: {source}")]
    Io {
        file: String,
        source: std::io::Error,
    },

    #[error("unexpected end of file reading {expected} from {file}")]
    UnexpectedEof { expected: &'static str, file: String },

    #[error("missing {expected} header in {file}: '{line}'")]
    MissingHeader {
        expected: &'static str,
        file: String,
        line: String,
    },

    #[error("error converting {header} value '{value}' from {file} to an int")]
    NonIntegerDimension {
        header: &'static str,
        file: String,
        value: String,
    },

    #[error("invalid {header} value {value} in {file}")]
    InvalidDimension {
        header: &'static str,
        file: String,
        value: i32,
    },
}

/// Coordinates of one cell in a tile grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub col: i32,
    pub row: i32,
}

/// A sparse 2D tile map with nominal dimensions and a content bounding box.
#[derive(Debug, Clone, PartialEq)]
pub struct TileGrid {
    ncols: i32,
    nrows: i32,
    min_col: i32,
    min_row: i32,
    max_col: i32,
    max_row: i32,
    tiles: HashMap<TileCoord, String>,
}

impl TileGrid {
    /// Creates an empty grid with the given nominal dimensions.
    pub fn new(ncols: i32, nrows: i32) -> Self {
        Self {
            ncols,
            nrows,
            min_col: -1,
            min_row: -1,
            max_col: -1,
            max_row: -1,
            tiles: HashMap::new(),
        }
    }

    pub fn ncols(&self) -> i32 {
        self.ncols
    }

    pub fn nrows(&self) -> i32 {
        self.nrows
    }

    /// Content bounding box as `(min_col, min_row, max_col, max_row)`,
    /// half-open on the max side; `(-1, -1, -1, -1)` when the grid is empty.
    pub fn bounds(&self) -> (i32, i32, i32, i32) {
        (self.min_col, self.min_row, self.max_col, self.max_row)
    }

    /// Number of populated cells.
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// The tile name at `(col, row)`, or `None` for an empty cell.
    pub fn tile(&self, col: i32, row: i32) -> Option<&str> {
        self.tiles.get(&TileCoord { col, row }).map(String::as_str)
    }

    /// Returns the populated cells and their tile names.
    pub fn tiles(&self) -> impl Iterator<Item = (TileCoord, &str)> {
        self.tiles.iter().map(|(coord, name)| (*coord, name.as_str()))
    }

    /// Returns true when the tile name marks an absent cell.
    pub fn is_empty_tile(name: &str) -> bool {
        name.contains(EMPTY_TILE_MARKER)
    }

    /// Places a tile, extending the bounding box. Names marking an empty
    /// cell are ignored.
    pub fn set_tile(&mut self, col: i32, row: i32, name: &str) {
        let trimmed = name.trim();
        if trimmed.is_empty() || Self::is_empty_tile(trimmed) {
            return;
        }
        self.tiles
            .insert(TileCoord { col, row }, trimmed.to_string());
        if self.min_col < 0 {
            self.min_col = col;
            self.min_row = row;
            self.max_col = col + 1;
            self.max_row = row + 1;
            return;
        }
        self.min_col = self.min_col.min(col);
        self.min_row = self.min_row.min(row);
        self.max_col = self.max_col.max(col + 1);
        self.max_row = self.max_row.max(row + 1);
    }

    /// Extracts the window `[min_col, max_col) x [min_row, max_row)`,
    /// translating tiles so the window origin becomes `(0, 0)`. Cells
    /// outside the window are dropped.
    pub fn crop(&self, min_col: i32, min_row: i32, max_col: i32, max_row: i32) -> TileGrid {
        let mut cropped = TileGrid::new(max_col - min_col, max_row - min_row);
        for (coord, name) in &self.tiles {
            if coord.col >= min_col
                && coord.col < max_col
                && coord.row >= min_row
                && coord.row < max_row
            {
                cropped.set_tile(coord.col - min_col, coord.row - min_row, name);
            }
        }
        cropped
    }

    /// Embeds this grid into a `(ncols, nrows)` canvas with its origin at
    /// `(min_col, min_row)`. The inverse of [`TileGrid::crop`] over the same
    /// window.
    pub fn uncrop(&self, min_col: i32, min_row: i32, ncols: i32, nrows: i32) -> TileGrid {
        let mut embedded = TileGrid::new(ncols, nrows);
        for (coord, name) in &self.tiles {
            embedded.set_tile(coord.col + min_col, coord.row + min_row, name);
        }
        embedded
    }

    /// Splits the grid into `n` vertical bands of width `ncols / n`
    /// (integer division), each covering the full height. Band `i` receives
    /// columns `[i*w, (i+1)*w)`.
    pub fn split(&self, n: i32) -> Vec<TileGrid> {
        let band_width = self.ncols / n;
        (0..n)
            .map(|band| {
                self.crop(
                    band * band_width,
                    0,
                    (band + 1) * band_width,
                    self.nrows,
                )
            })
            .collect()
    }

    /// Concatenates grids left to right: each grid is placed to the right of
    /// the previous one, the result height being the maximum of the parts.
    pub fn merge(sections: &[TileGrid]) -> TileGrid {
        let ncols = sections.iter().map(|g| g.ncols).sum();
        let nrows = sections.iter().map(|g| g.nrows).max().unwrap_or(0);
        let mut merged = TileGrid::new(ncols, nrows);
        let mut offset = 0;
        for section in sections {
            for (coord, name) in &section.tiles {
                merged.set_tile(coord.col + offset, coord.row, name);
            }
            offset += section.ncols;
        }
        merged
    }
}
