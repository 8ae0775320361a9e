//! Band alignment and concatenation.
//!
//! Coadd files carry three spectrograph arms per target. This module joins
//! them into single `brz` vectors: one shared wavelength vector per file and
//! one flux vector per target, always in b, r, z order.

use thiserror::Error;

use super::loaders::{Band, PerBand};

/// Shape violations between the band arrays of one file.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("band {band} has {rows} target rows, expected {expected}")]
    RowCountMismatch {
        band: &'static str,
        rows: usize,
        expected: usize,
    },

    #[error("band {band} row {row} has {bins} flux bins, wavelength grid has {expected}")]
    BinCountMismatch {
        band: &'static str,
        row: usize,
        bins: usize,
        expected: usize,
    },
}

/// Check that all three flux matrices describe the same target set and that
/// every flux row matches its band's wavelength grid.
///
/// Returns the common target row count. Row counts are compared against band
/// b, so the reported mismatch names the offending band.
pub fn validate_shapes(
    wave: &PerBand<Vec<f64>>,
    flux: &PerBand<Vec<Vec<f32>>>,
) -> Result<usize, TransformError> {
    let expected_rows = flux.b.len();

    for (band, rows) in flux.iter() {
        if rows.len() != expected_rows {
            return Err(TransformError::RowCountMismatch {
                band: band.column(),
                rows: rows.len(),
                expected: expected_rows,
            });
        }

        let expected_bins = wave.get(band).len();
        for (row, bins) in rows.iter().enumerate() {
            if bins.len() != expected_bins {
                return Err(TransformError::BinCountMismatch {
                    band: band.column(),
                    row,
                    bins: bins.len(),
                    expected: expected_bins,
                });
            }
        }
    }

    Ok(expected_rows)
}

/// Concatenate the per-band wavelength grids in b, r, z order.
pub fn concat_wave(wave: &PerBand<Vec<f64>>) -> Vec<f64> {
    let mut out = Vec::with_capacity(wave.b.len() + wave.r.len() + wave.z.len());
    for band in Band::ORDER {
        out.extend_from_slice(wave.get(band));
    }
    out
}

/// Concatenate one target's flux rows in b, r, z order.
///
/// Callers must have validated shapes first; `row` indexes into each band's
/// flux matrix.
pub fn concat_flux_row(flux: &PerBand<Vec<Vec<f32>>>, row: usize) -> Vec<f32> {
    let total = flux.b[row].len() + flux.r[row].len() + flux.z[row].len();
    let mut out = Vec::with_capacity(total);
    for band in Band::ORDER {
        out.extend_from_slice(&flux.get(band)[row]);
    }
    out
}

/// Validate shapes and concatenate every target's flux rows.
pub fn concat_flux(
    wave: &PerBand<Vec<f64>>,
    flux: &PerBand<Vec<Vec<f32>>>,
) -> Result<Vec<Vec<f32>>, TransformError> {
    let rows = validate_shapes(wave, flux)?;
    Ok((0..rows).map(|row| concat_flux_row(flux, row)).collect())
}
