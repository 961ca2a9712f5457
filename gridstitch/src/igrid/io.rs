//! Line-oriented iGrid reading and writing.

use super::{GridError, TileGrid};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use tracing::info;

/// Reads a tile grid from a file.
pub fn read_igrid(path: &Path) -> Result<TileGrid, GridError> {
    info!("Read iGrid {}", path.display());
    let file = std::fs::File::open(path).map_err(|source| GridError::Io {
        file: path.display().to_string(),
        source,
    })?;
    read_from(BufReader::new(file), &path.display().to_string())
}

/// Writes a tile grid to a file, materializing absent cells with the given
/// placeholder name.
pub fn write_igrid(path: &Path, grid: &TileGrid, empty_tile_name: &str) -> Result<(), GridError> {
    info!("Write iGrid {}", path.display());
    let mut file = std::fs::File::create(path).map_err(|source| GridError::Io {
        file: path.display().to_string(),
        source,
    })?;
    write_to(&mut file, grid, empty_tile_name, &path.display().to_string())
}

/// Reads a tile grid from any buffered reader; `name` labels errors.
pub(super) fn read_from(reader: impl BufRead, name: &str) -> Result<TileGrid, GridError> {
    let mut lines = reader.lines();

    let ncols = read_dimension(&mut lines, "Columns:", name)?;
    let nrows = read_dimension(&mut lines, "Rows:", name)?;
    let mut grid = TileGrid::new(ncols, nrows);

    let mut col = 0;
    let mut row = 0;
    for line in lines {
        let line = line.map_err(|source| GridError::Io {
            file: name.to_string(),
            source,
        })?;
        grid.set_tile(col, row, &line);
        col += 1;
        if col >= ncols {
            col = 0;
            row += 1;
        }
        if row >= nrows {
            break;
        }
    }
    Ok(grid)
}

fn read_dimension(
    lines: &mut std::io::Lines<impl BufRead>,
    header: &'static str,
    name: &str,
) -> Result<i32, GridError> {
    let line = match lines.next() {
        Some(Ok(line)) => line,
        Some(Err(source)) => {
            return Err(GridError::Io {
                file: name.to_string(),
                source,
            })
        }
        None => {
            return Err(GridError::UnexpectedEof {
                expected: header,
                file: name.to_string(),
            })
        }
    };
    let value = line
        .strip_prefix(header)
        .ok_or_else(|| GridError::MissingHeader {
            expected: header,
            file: name.to_string(),
            line: line.clone(),
        })?
        .trim();
    let dim: i32 = value
        .parse()
        .map_err(|_| GridError::NonIntegerDimension {
            header,
            file: name.to_string(),
            value: value.to_string(),
        })?;
    if dim <= 0 {
        return Err(GridError::InvalidDimension {
            header,
            file: name.to_string(),
            value: dim,
        });
    }
    Ok(dim)
}

/// Writes a tile grid to any writer; `name` labels errors.
pub(super) fn write_to(
    writer: &mut impl Write,
    grid: &TileGrid,
    empty_tile_name: &str,
    name: &str,
) -> Result<(), GridError> {
    let io_err = |source| GridError::Io {
        file: name.to_string(),
        source,
    };
    writeln!(writer, "Columns: {}", grid.ncols()).map_err(io_err)?;
    writeln!(writer, "Rows: {}", grid.nrows()).map_err(io_err)?;
    for row in 0..grid.nrows() {
        for col in 0..grid.ncols() {
            let tile = grid.tile(col, row).unwrap_or(empty_tile_name);
            writeln!(writer, "{tile}").map_err(io_err)?;
        }
    }
    Ok(())
}
