//! Loaders for per-petal coadd spectral files.
//!
//! This module provides:
//! - The [`CoaddReader`] trait, the seam through which spectral files enter
//!   the pipeline (per-band wavelength grids, per-band flux matrices, and a
//!   typed fibermap table)
//! - [`CsvCoaddReader`], a reader for the CSV interchange format described
//!   below
//!
//! # CSV interchange format
//!
//! One file per petal, header row first. Spectral arrays are packed into a
//! single cell as semicolon-separated floats:
//!
//! ```text
//! ROW,TARGETID,COADD_FIBERSTATUS,DESI_TARGET,B,R,Z
//! wave,,,,3600.0;3600.8,5760.0;5760.8,9100.0;9100.8
//! target,39627745,0,2,0.91;1.02,1.13;1.08,0.77;0.81
//! ```
//!
//! Exactly one `wave` row carries the per-band wavelength grids shared by
//! every target in the file; each `target` row carries one fiber's metadata
//! and per-band flux. `TILEID` and `PETAL_LOC` columns are optional and
//! override the directory-derived keys when present.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use csv::ReaderBuilder;
use thiserror::Error;

/// Spectrograph arms, in the fixed concatenation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Band {
    B,
    R,
    Z,
}

impl Band {
    /// All bands in concatenation order. `wave_brz` and `flux_brz` are built
    /// by walking this array; it must never be reordered.
    pub const ORDER: [Band; 3] = [Band::B, Band::R, Band::Z];

    /// Lowercase band key as used in survey file layouts.
    pub fn key(self) -> &'static str {
        match self {
            Band::B => "b",
            Band::R => "r",
            Band::Z => "z",
        }
    }

    /// Column name for this band in the CSV interchange format.
    pub fn column(self) -> &'static str {
        match self {
            Band::B => "B",
            Band::R => "R",
            Band::Z => "Z",
        }
    }
}

/// One value per spectrograph arm.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerBand<T> {
    pub b: T,
    pub r: T,
    pub z: T,
}

impl<T> PerBand<T> {
    pub fn get(&self, band: Band) -> &T {
        match band {
            Band::B => &self.b,
            Band::R => &self.r,
            Band::Z => &self.z,
        }
    }

    pub fn get_mut(&mut self, band: Band) -> &mut T {
        match band {
            Band::B => &mut self.b,
            Band::R => &mut self.r,
            Band::Z => &mut self.z,
        }
    }

    /// Iterate bands in concatenation order.
    pub fn iter(&self) -> impl Iterator<Item = (Band, &T)> {
        Band::ORDER.iter().map(move |&band| (band, self.get(band)))
    }
}

/// Typed per-target metadata table, one entry per fiber in the file.
///
/// The three required columns are validated at load time; optional columns
/// are `None` per row when absent from the source file.
#[derive(Debug, Clone, Default)]
pub struct Fibermap {
    pub target_id: Vec<i64>,
    pub fiber_status: Vec<i32>,
    pub target_bits: Vec<u64>,
    pub tile_id: Vec<Option<i64>>,
    pub petal_loc: Vec<Option<u8>>,
}

impl Fibermap {
    pub fn len(&self) -> usize {
        self.target_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target_id.is_empty()
    }
}

/// Contents of one coadd file: shared wavelength grids, per-target flux
/// matrices (rows aligned with the fibermap), and the fibermap itself.
#[derive(Debug, Clone)]
pub struct CoaddSpectra {
    pub wave: PerBand<Vec<f64>>,
    pub flux: PerBand<Vec<Vec<f32>>>,
    pub fibermap: Fibermap,
}

impl CoaddSpectra {
    pub fn num_targets(&self) -> usize {
        self.fibermap.len()
    }
}

/// Errors that can occur while loading a coadd file.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("missing required columns: {0}")]
    MissingColumns(String),

    #[error("no target rows in file: {0}")]
    EmptyFile(PathBuf),

    #[error("no wavelength row in file: {0}")]
    MissingWave(PathBuf),

    #[error("parse error: {0}")]
    Parse(String),
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Reader seam for per-petal spectral files.
///
/// Production surveys store coadds in formats read by external tooling;
/// implementations of this trait adapt such a source to the pipeline.
pub trait CoaddReader {
    fn read(&self, path: &Path) -> Result<CoaddSpectra>;
}

/// Reader for the CSV interchange format (see module docs).
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvCoaddReader;

/// Required columns of the interchange format.
const REQUIRED_COLUMNS: [&str; 7] = [
    "ROW",
    "TARGETID",
    "COADD_FIBERSTATUS",
    "DESI_TARGET",
    "B",
    "R",
    "Z",
];

impl CoaddReader for CsvCoaddReader {
    fn read(&self, path: &Path) -> Result<CoaddSpectra> {
        let mut reader = ReaderBuilder::new().from_path(path)?;

        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
        let columns = ColumnIndex::resolve(&headers)?;

        let mut wave: Option<PerBand<Vec<f64>>> = None;
        let mut flux: PerBand<Vec<Vec<f32>>> = PerBand::default();
        let mut fibermap = Fibermap::default();

        for (row_no, result) in reader.records().enumerate() {
            let record = result?;
            let kind = record.get(columns.row).unwrap_or("").trim();

            match kind {
                "wave" => {
                    if wave.is_some() {
                        return Err(LoaderError::Parse(format!(
                            "duplicate wave row at line {} in {}",
                            row_no + 2,
                            path.display()
                        )));
                    }
                    let mut grids = PerBand::default();
                    for band in Band::ORDER {
                        let cell = record.get(columns.band(band)).unwrap_or("");
                        *grids.get_mut(band) =
                            parse_packed_floats::<f64>(cell, row_no, band.column())?;
                    }
                    wave = Some(grids);
                }
                "target" => {
                    fibermap.target_id.push(parse_cell(
                        record.get(columns.target_id),
                        row_no,
                        "TARGETID",
                    )?);
                    fibermap.fiber_status.push(parse_cell(
                        record.get(columns.fiber_status),
                        row_no,
                        "COADD_FIBERSTATUS",
                    )?);
                    fibermap.target_bits.push(parse_cell(
                        record.get(columns.target_bits),
                        row_no,
                        "DESI_TARGET",
                    )?);
                    fibermap
                        .tile_id
                        .push(parse_optional_cell(
                            columns.tile_id.and_then(|i| record.get(i)),
                        )?);
                    fibermap
                        .petal_loc
                        .push(parse_optional_cell(
                            columns.petal_loc.and_then(|i| record.get(i)),
                        )?);

                    for band in Band::ORDER {
                        let cell = record.get(columns.band(band)).unwrap_or("");
                        flux.get_mut(band)
                            .push(parse_packed_floats::<f32>(cell, row_no, band.column())?);
                    }
                }
                other => {
                    return Err(LoaderError::Parse(format!(
                        "unknown row kind '{}' at line {} in {}",
                        other,
                        row_no + 2,
                        path.display()
                    )));
                }
            }
        }

        let wave = wave.ok_or_else(|| LoaderError::MissingWave(path.to_path_buf()))?;
        if fibermap.is_empty() {
            return Err(LoaderError::EmptyFile(path.to_path_buf()));
        }

        Ok(CoaddSpectra {
            wave,
            flux,
            fibermap,
        })
    }
}

/// Resolved header positions for one file.
struct ColumnIndex {
    row: usize,
    target_id: usize,
    fiber_status: usize,
    target_bits: usize,
    b: usize,
    r: usize,
    z: usize,
    tile_id: Option<usize>,
    petal_loc: Option<usize>,
}

impl ColumnIndex {
    fn resolve(headers: &[String]) -> Result<Self> {
        let find = |name: &str| headers.iter().position(|h| h == name);

        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|name| find(name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(LoaderError::MissingColumns(missing.join(", ")));
        }

        Ok(Self {
            row: find("ROW").unwrap(),
            target_id: find("TARGETID").unwrap(),
            fiber_status: find("COADD_FIBERSTATUS").unwrap(),
            target_bits: find("DESI_TARGET").unwrap(),
            b: find("B").unwrap(),
            r: find("R").unwrap(),
            z: find("Z").unwrap(),
            tile_id: find("TILEID"),
            petal_loc: find("PETAL_LOC"),
        })
    }

    fn band(&self, band: Band) -> usize {
        match band {
            Band::B => self.b,
            Band::R => self.r,
            Band::Z => self.z,
        }
    }
}

fn parse_packed_floats<T: FromStr>(cell: &str, row: usize, col: &str) -> Result<Vec<T>> {
    if cell.trim().is_empty() {
        return Ok(Vec::new());
    }
    cell.split(';')
        .enumerate()
        .map(|(j, tok)| {
            tok.trim().parse::<T>().map_err(|_| {
                LoaderError::Parse(format!("row {row}, {col}[{j}]: '{tok}' is not a number"))
            })
        })
        .collect()
}

fn parse_cell<T: FromStr>(cell: Option<&str>, row: usize, col: &str) -> Result<T> {
    let raw = cell.unwrap_or("").trim();
    raw.parse::<T>()
        .map_err(|_| LoaderError::Parse(format!("row {row}, {col}: '{raw}' is not valid")))
}

fn parse_optional_cell<T: FromStr>(cell: Option<&str>) -> Result<Option<T>> {
    match cell.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| LoaderError::Parse(format!("'{raw}' is not valid"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_coadd(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        write!(file, "{}", body).unwrap();
        path
    }

    const BASIC: &str = "\
ROW,TARGETID,COADD_FIBERSTATUS,DESI_TARGET,B,R,Z
wave,,,,3600.0;3600.8,5760.0;5760.8,9100.0;9100.8
target,101,0,2,0.1;0.2,0.3;0.4,0.5;0.6
target,102,1,4,1.1;1.2,1.3;1.4,1.5;1.6
";

    #[test]
    fn test_read_basic_coadd() {
        let dir = TempDir::new().unwrap();
        let path = write_coadd(dir.path(), "coadd-0.csv", BASIC);

        let sp = CsvCoaddReader.read(&path).unwrap();

        assert_eq!(sp.num_targets(), 2);
        assert_eq!(sp.fibermap.target_id, vec![101, 102]);
        assert_eq!(sp.fibermap.fiber_status, vec![0, 1]);
        assert_eq!(sp.fibermap.target_bits, vec![2, 4]);
        assert_eq!(sp.wave.b, vec![3600.0, 3600.8]);
        assert_eq!(sp.wave.z, vec![9100.0, 9100.8]);
        assert_eq!(sp.flux.b[0], vec![0.1, 0.2]);
        assert_eq!(sp.flux.z[1], vec![1.5, 1.6]);
        // Optional columns absent: all None
        assert!(sp.fibermap.tile_id.iter().all(|t| t.is_none()));
        assert!(sp.fibermap.petal_loc.iter().all(|p| p.is_none()));
    }

    #[test]
    fn test_read_optional_columns() {
        let dir = TempDir::new().unwrap();
        let body = "\
ROW,TARGETID,COADD_FIBERSTATUS,DESI_TARGET,TILEID,PETAL_LOC,B,R,Z
wave,,,,,,3600.0,5760.0,9100.0
target,101,0,2,80605,3,0.1,0.3,0.5
";
        let path = write_coadd(dir.path(), "coadd-3.csv", body);

        let sp = CsvCoaddReader.read(&path).unwrap();

        assert_eq!(sp.fibermap.tile_id, vec![Some(80605)]);
        assert_eq!(sp.fibermap.petal_loc, vec![Some(3)]);
    }

    #[test]
    fn test_read_missing_columns() {
        let dir = TempDir::new().unwrap();
        let body = "\
ROW,TARGETID,B,R,Z
wave,,3600.0,5760.0,9100.0
target,101,0.1,0.3,0.5
";
        let path = write_coadd(dir.path(), "coadd-0.csv", body);

        let err = CsvCoaddReader.read(&path).unwrap_err();
        match err {
            LoaderError::MissingColumns(cols) => {
                assert!(cols.contains("COADD_FIBERSTATUS"));
                assert!(cols.contains("DESI_TARGET"));
            }
            other => panic!("expected MissingColumns, got {other:?}"),
        }
    }

    #[test]
    fn test_read_no_wave_row() {
        let dir = TempDir::new().unwrap();
        let body = "\
ROW,TARGETID,COADD_FIBERSTATUS,DESI_TARGET,B,R,Z
target,101,0,2,0.1,0.3,0.5
";
        let path = write_coadd(dir.path(), "coadd-0.csv", body);

        assert!(matches!(
            CsvCoaddReader.read(&path),
            Err(LoaderError::MissingWave(_))
        ));
    }

    #[test]
    fn test_read_no_targets() {
        let dir = TempDir::new().unwrap();
        let body = "\
ROW,TARGETID,COADD_FIBERSTATUS,DESI_TARGET,B,R,Z
wave,,,,3600.0,5760.0,9100.0
";
        let path = write_coadd(dir.path(), "coadd-0.csv", body);

        assert!(matches!(
            CsvCoaddReader.read(&path),
            Err(LoaderError::EmptyFile(_))
        ));
    }

    #[test]
    fn test_read_bad_flux_value() {
        let dir = TempDir::new().unwrap();
        let body = "\
ROW,TARGETID,COADD_FIBERSTATUS,DESI_TARGET,B,R,Z
wave,,,,3600.0,5760.0,9100.0
target,101,0,2,not-a-number,0.3,0.5
";
        let path = write_coadd(dir.path(), "coadd-0.csv", body);

        assert!(matches!(
            CsvCoaddReader.read(&path),
            Err(LoaderError::Parse(_))
        ));
    }

    #[test]
    fn test_band_order_fixed() {
        let bands: Vec<&str> = Band::ORDER.iter().map(|b| b.key()).collect();
        assert_eq!(bands, vec!["b", "r", "z"]);
    }
}
