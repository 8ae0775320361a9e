//! Observation-unit discovery in the survey directory tree.
//!
//! The expected layout is `root/{tile_id}/{night}/coadd-{petal}.*`: one
//! directory per tile, one subdirectory per observation night, and one coadd
//! file per petal. All nights under a tile are enumerated; a tile without
//! any night subdirectory is reported to the caller rather than dropped.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use thiserror::Error;

/// Errors that can occur while walking the survey tree.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("data root not found: {0}")]
    RootNotFound(PathBuf),

    #[error("failed to read directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One tile/night folder expected to contain per-petal coadd files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileNight {
    pub tile_id: String,
    pub night: String,
    pub dir: PathBuf,
}

/// Result of scanning the survey root.
#[derive(Debug, Clone, Default)]
pub struct SurveyScan {
    /// Tile/night folders in sorted (tile, night) order.
    pub tile_nights: Vec<TileNight>,
    /// Tiles with no night subdirectory; a data error the caller must report.
    pub empty_tiles: Vec<String>,
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    let entries = fs::read_dir(dir).map_err(|e| DiscoveryError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Walk the survey root and enumerate every tile/night folder.
///
/// Enumeration is sorted so repeated runs over the same tree visit files in
/// the same order.
pub fn scan_tiles(root: &Path) -> Result<SurveyScan, DiscoveryError> {
    if !root.is_dir() {
        return Err(DiscoveryError::RootNotFound(root.to_path_buf()));
    }

    let mut scan = SurveyScan::default();

    for tile_dir in sorted_subdirs(root)? {
        let tile_id = dir_name(&tile_dir);
        let nights = sorted_subdirs(&tile_dir)?;

        if nights.is_empty() {
            scan.empty_tiles.push(tile_id);
            continue;
        }

        for night_dir in nights {
            scan.tile_nights.push(TileNight {
                tile_id: tile_id.clone(),
                night: dir_name(&night_dir),
                dir: night_dir,
            });
        }
    }

    Ok(scan)
}

/// Find per-petal coadd files in a tile/night folder, sorted by name.
pub fn find_coadd_files(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(prefix))
                    .unwrap_or(false)
        })
        .collect();

    files.sort();
    files
}

/// Extract the petal index from a coadd filename, e.g. `coadd-5.fits` -> 5.
pub fn petal_from_filename(path: &Path) -> Option<u8> {
    let petal_pattern = Regex::new(r"[-_](\d+)$").unwrap();
    let stem = path.file_stem().and_then(|s| s.to_str())?;

    petal_pattern
        .captures(stem)
        .and_then(|captures| captures.get(1))
        .and_then(|m| m.as_str().parse::<u8>().ok())
}
