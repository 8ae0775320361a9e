//! Dataset writers for CSV and Parquet outputs.
//!
//! Two shapes are supported:
//! - Flat tabular: a target-level CSV and a wavelength-level CSV, joinable
//!   on (tile, night, petal). Spectral arrays are packed as
//!   semicolon-separated floats in one cell.
//! - Hierarchical: a single Parquet file with rows sorted night, tile,
//!   petal and list-typed flux/wave columns under compressed column storage.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    ArrayRef, Float32Builder, Float64Builder, Int32Array, Int64Array, ListBuilder, StringArray,
    UInt64Array, UInt8Array,
};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use thiserror::Error;

use super::dataset::{Dataset, TargetRecord, UnitWave};
use crate::config::CompressionCodec;

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    /// Arrow array or batch construction error.
    #[error("arrow error for '{path}': {source}")]
    Arrow {
        path: String,
        #[source]
        source: arrow::error::ArrowError,
    },

    /// Parquet encoding error.
    #[error("parquet error for '{path}': {source}")]
    Parquet {
        path: String,
        #[source]
        source: parquet::errors::ParquetError,
    },

    /// A target record references an observation unit with no wavelength row.
    #[error("no wavelength grids for unit night={night} tile={tile} petal={petal}")]
    MissingUnitWave {
        night: String,
        tile: String,
        petal: u8,
    },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Pack a float slice into one CSV cell as semicolon-separated values.
fn pack_floats<T: Display>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(";")
}

fn csv_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    ensure_parent_dirs(path)?;
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(csv::Writer::from_writer(BufWriter::new(file)))
}

/// Write the target-level table: one row per surviving target.
pub fn write_target_csv(path: &Path, targets: &[TargetRecord]) -> Result<()> {
    let mut writer = csv_writer(path)?;
    let path_str = path.display().to_string();
    let wrap = |e: csv::Error| WriteError::Csv {
        path: path_str.clone(),
        source: e,
    };

    writer
        .write_record([
            "TARGETID",
            "TILEID",
            "NIGHT",
            "PETAL_LOC",
            "COADD_FIBERSTATUS",
            "DESI_TARGET",
            "TARGET_CLASSES",
            "FLUX_B",
            "FLUX_R",
            "FLUX_Z",
            "FLUX_BRZ",
        ])
        .map_err(wrap)?;

    for t in targets {
        writer
            .write_record(&[
                t.target_id.to_string(),
                t.tile_id.clone(),
                t.night.clone(),
                t.petal.to_string(),
                t.fiber_status.to_string(),
                t.target_bits.to_string(),
                t.categories.clone(),
                pack_floats(&t.flux_b),
                pack_floats(&t.flux_r),
                pack_floats(&t.flux_z),
                pack_floats(&t.flux_brz),
            ])
            .map_err(wrap)?;
    }

    writer.flush().map_err(|e| WriteError::Csv {
        path: path_str,
        source: e.into(),
    })?;
    Ok(())
}

/// Write the wavelength-level table: one row per observation unit.
pub fn write_wave_csv(path: &Path, waves: &[UnitWave]) -> Result<()> {
    let mut writer = csv_writer(path)?;
    let path_str = path.display().to_string();
    let wrap = |e: csv::Error| WriteError::Csv {
        path: path_str.clone(),
        source: e,
    };

    writer
        .write_record([
            "TILEID", "NIGHT", "PETAL_LOC", "WAVE_B", "WAVE_R", "WAVE_Z", "WAVE_BRZ",
        ])
        .map_err(wrap)?;

    for w in waves {
        writer
            .write_record(&[
                w.tile_id.clone(),
                w.night.clone(),
                w.petal.to_string(),
                pack_floats(&w.wave_b),
                pack_floats(&w.wave_r),
                pack_floats(&w.wave_z),
                pack_floats(&w.wave_brz),
            ])
            .map_err(wrap)?;
    }

    writer.flush().map_err(|e| WriteError::Csv {
        path: path_str,
        source: e.into(),
    })?;
    Ok(())
}

fn f32_list(rows: impl Iterator<Item = Vec<f32>>) -> ArrayRef {
    let mut builder = ListBuilder::new(Float32Builder::new());
    for row in rows {
        builder.values().append_slice(&row);
        builder.append(true);
    }
    Arc::new(builder.finish())
}

fn f64_list(rows: impl Iterator<Item = Vec<f64>>) -> ArrayRef {
    let mut builder = ListBuilder::new(Float64Builder::new());
    for row in rows {
        builder.values().append_slice(&row);
        builder.append(true);
    }
    Arc::new(builder.finish())
}

impl CompressionCodec {
    fn to_parquet(self) -> Compression {
        match self {
            CompressionCodec::Zstd => Compression::ZSTD(ZstdLevel::default()),
            CompressionCodec::Snappy => Compression::SNAPPY,
            CompressionCodec::None => Compression::UNCOMPRESSED,
        }
    }
}

/// Write the whole dataset as one Parquet file.
///
/// Rows are sorted night, tile, petal so the unit grouping is contiguous in
/// the file; each row carries its unit's wavelength grids alongside the
/// target's flux arrays.
pub fn write_parquet(path: &Path, dataset: &Dataset, codec: CompressionCodec) -> Result<()> {
    ensure_parent_dirs(path)?;
    let path_str = path.display().to_string();

    let waves: BTreeMap<(&str, &str, u8), &UnitWave> = dataset
        .waves
        .iter()
        .map(|w| (w.unit_key(), w))
        .collect();

    // Stable sort by unit key keeps file order within a unit.
    let mut order: Vec<&TargetRecord> = dataset.targets.iter().collect();
    order.sort_by(|a, b| {
        (&a.night, &a.tile_id, a.petal).cmp(&(&b.night, &b.tile_id, b.petal))
    });

    let mut unit_waves = Vec::with_capacity(order.len());
    for t in &order {
        let wave = waves
            .get(&(t.night.as_str(), t.tile_id.as_str(), t.petal))
            .ok_or_else(|| WriteError::MissingUnitWave {
                night: t.night.clone(),
                tile: t.tile_id.clone(),
                petal: t.petal,
            })?;
        unit_waves.push(*wave);
    }

    let night: ArrayRef = Arc::new(StringArray::from(
        order.iter().map(|t| t.night.clone()).collect::<Vec<_>>(),
    ));
    let tile: ArrayRef = Arc::new(StringArray::from(
        order.iter().map(|t| t.tile_id.clone()).collect::<Vec<_>>(),
    ));
    let petal: ArrayRef = Arc::new(UInt8Array::from(
        order.iter().map(|t| t.petal).collect::<Vec<_>>(),
    ));
    let target_id: ArrayRef = Arc::new(Int64Array::from(
        order.iter().map(|t| t.target_id).collect::<Vec<_>>(),
    ));
    let fiber_status: ArrayRef = Arc::new(Int32Array::from(
        order.iter().map(|t| t.fiber_status).collect::<Vec<_>>(),
    ));
    let target_bits: ArrayRef = Arc::new(UInt64Array::from(
        order.iter().map(|t| t.target_bits).collect::<Vec<_>>(),
    ));
    let categories: ArrayRef = Arc::new(StringArray::from(
        order.iter().map(|t| t.categories.clone()).collect::<Vec<_>>(),
    ));

    let columns: Vec<(&str, ArrayRef)> = vec![
        ("NIGHT", night),
        ("TILEID", tile),
        ("PETAL_LOC", petal),
        ("TARGETID", target_id),
        ("COADD_FIBERSTATUS", fiber_status),
        ("DESI_TARGET", target_bits),
        ("TARGET_CLASSES", categories),
        ("FLUX_B", f32_list(order.iter().map(|t| t.flux_b.clone()))),
        ("FLUX_R", f32_list(order.iter().map(|t| t.flux_r.clone()))),
        ("FLUX_Z", f32_list(order.iter().map(|t| t.flux_z.clone()))),
        (
            "FLUX_BRZ",
            f32_list(order.iter().map(|t| t.flux_brz.clone())),
        ),
        (
            "WAVE_B",
            f64_list(unit_waves.iter().map(|w| w.wave_b.clone())),
        ),
        (
            "WAVE_R",
            f64_list(unit_waves.iter().map(|w| w.wave_r.clone())),
        ),
        (
            "WAVE_Z",
            f64_list(unit_waves.iter().map(|w| w.wave_z.clone())),
        ),
        (
            "WAVE_BRZ",
            f64_list(unit_waves.iter().map(|w| w.wave_brz.clone())),
        ),
    ];

    let batch = RecordBatch::try_from_iter(columns).map_err(|e| WriteError::Arrow {
        path: path_str.clone(),
        source: e,
    })?;

    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path_str.clone(),
        source: e,
    })?;
    let props = WriterProperties::builder()
        .set_compression(codec.to_parquet())
        .build();

    let mut writer =
        ArrowWriter::try_new(file, batch.schema(), Some(props)).map_err(|e| {
            WriteError::Parquet {
                path: path_str.clone(),
                source: e,
            }
        })?;
    writer.write(&batch).map_err(|e| WriteError::Parquet {
        path: path_str.clone(),
        source: e,
    })?;
    writer.close().map_err(|e| WriteError::Parquet {
        path: path_str,
        source: e,
    })?;

    Ok(())
}
