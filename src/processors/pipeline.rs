//! Pipeline orchestration: from survey tree to accumulated dataset.
//!
//! Each coadd file moves through read, filter, classify and concatenate
//! stages; any stage can demote the file to a skip with a recorded reason.
//! A skip aborts only that file. Files are processed sequentially by
//! default; with `jobs > 1` the per-file stages run on a rayon pool and the
//! results are merged into the dataset and run log in discovery order.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use log::{debug, error, info, warn};
use rayon::prelude::*;

use crate::config::PipelineConfig;
use crate::core::dataset::{Dataset, TargetRecord, UnitWave};
use crate::core::loaders::{CoaddReader, LoaderError};
use crate::core::transforms;
use crate::processors::classification::CategoryRegistry;
use crate::processors::discovery;
use crate::processors::selection;

/// Why a file or observation unit was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Tile directory with no night subdirectories.
    NoNights,
    /// Tile/night folder with no coadd files.
    NoCoaddFiles,
    /// Coadd filename without a parseable petal index.
    UnrecognizedName,
    /// Auxiliary table lacks required columns.
    MissingColumns(String),
    /// Reader failed on the file.
    ReadFailed(String),
    /// No target passed the eligibility filter.
    NoSurvivors,
    /// Band arrays within the file disagree on shape.
    ShapeMismatch(String),
}

impl SkipReason {
    /// Stable key for grouping skip counts in summaries.
    pub fn key(&self) -> &'static str {
        match self {
            SkipReason::NoNights => "no-nights",
            SkipReason::NoCoaddFiles => "no-coadd-files",
            SkipReason::UnrecognizedName => "unrecognized-name",
            SkipReason::MissingColumns(_) => "missing-columns",
            SkipReason::ReadFailed(_) => "read-failed",
            SkipReason::NoSurvivors => "no-survivors",
            SkipReason::ShapeMismatch(_) => "shape-mismatch",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoNights => write!(f, "no night subdirectories"),
            SkipReason::NoCoaddFiles => write!(f, "no coadd files in folder"),
            SkipReason::UnrecognizedName => {
                write!(f, "cannot parse petal index from filename")
            }
            SkipReason::MissingColumns(cols) => {
                write!(f, "missing required columns: {cols}")
            }
            SkipReason::ReadFailed(msg) => write!(f, "reader failure: {msg}"),
            SkipReason::NoSurvivors => write!(f, "no targets pass the eligibility filter"),
            SkipReason::ShapeMismatch(msg) => write!(f, "band shape mismatch: {msg}"),
        }
    }
}

/// One skipped file or unit with its reason.
#[derive(Debug, Clone)]
pub struct SkippedUnit {
    pub location: String,
    pub reason: SkipReason,
}

/// Counters and skip trail for one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub tiles: usize,
    pub units: usize,
    pub files_found: usize,
    pub files_processed: usize,
    pub targets_written: usize,
    pub skipped: Vec<SkippedUnit>,
    pub elapsed_s: f64,
}

impl RunSummary {
    /// Skip counts grouped by reason, in first-seen order.
    pub fn skip_counts(&self) -> Vec<(&'static str, usize)> {
        let mut counts: Vec<(&'static str, usize)> = Vec::new();
        for skip in &self.skipped {
            let key = skip.reason.key();
            match counts.iter_mut().find(|(k, _)| *k == key) {
                Some((_, n)) => *n += 1,
                None => counts.push((key, 1)),
            }
        }
        counts
    }
}

/// Append-only run log: one CSV row per successfully processed file.
///
/// The header is written once at creation; the log is owned by the run and
/// flushed after every append so a partial run leaves a readable trail.
pub struct RunLog {
    writer: csv::Writer<fs::File>,
}

impl RunLog {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating log directory {}", parent.display()))?;
            }
        }
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("creating run log {}", path.display()))?;
        writer
            .write_record(["tile", "night", "petal", "targets", "elapsed_s"])
            .context("writing run log header")?;
        writer.flush().context("flushing run log")?;
        Ok(Self { writer })
    }

    pub fn append(
        &mut self,
        tile: &str,
        night: &str,
        petal: u8,
        targets: usize,
        elapsed_s: f64,
    ) -> anyhow::Result<()> {
        self.writer
            .write_record(&[
                tile.to_string(),
                night.to_string(),
                petal.to_string(),
                targets.to_string(),
                format!("{elapsed_s:.3}"),
            ])
            .context("appending to run log")?;
        self.writer.flush().context("flushing run log")?;
        Ok(())
    }
}

/// One fully processed coadd file, ready to merge into the dataset.
struct ProcessedFile {
    petal: u8,
    wave: UnitWave,
    targets: Vec<TargetRecord>,
    elapsed_s: f64,
}

fn process_file<R: CoaddReader>(
    reader: &R,
    tile: &str,
    night: &str,
    path: &Path,
    registry: &CategoryRegistry,
    good_status: i32,
) -> Result<ProcessedFile, SkipReason> {
    let start = Instant::now();

    let petal = discovery::petal_from_filename(path).ok_or(SkipReason::UnrecognizedName)?;

    let spectra = reader.read(path).map_err(|e| match e {
        LoaderError::MissingColumns(cols) => SkipReason::MissingColumns(cols),
        other => SkipReason::ReadFailed(other.to_string()),
    })?;

    transforms::validate_shapes(&spectra.wave, &spectra.flux)
        .map_err(|e| SkipReason::ShapeMismatch(e.to_string()))?;
    if spectra.flux.b.len() != spectra.fibermap.len() {
        return Err(SkipReason::ShapeMismatch(format!(
            "fibermap has {} rows, flux has {}",
            spectra.fibermap.len(),
            spectra.flux.b.len()
        )));
    }

    let mask = selection::keep_mask(&spectra.fibermap, good_status);
    let keep = selection::surviving_indices(&mask);
    if keep.is_empty() {
        return Err(SkipReason::NoSurvivors);
    }

    let wave = UnitWave {
        tile_id: tile.to_string(),
        night: night.to_string(),
        petal,
        wave_b: spectra.wave.b.clone(),
        wave_r: spectra.wave.r.clone(),
        wave_z: spectra.wave.z.clone(),
        wave_brz: transforms::concat_wave(&spectra.wave),
    };

    let fm = &spectra.fibermap;
    let mut targets = Vec::with_capacity(keep.len());
    for &idx in &keep {
        // The fibermap's own keys are a cross-check only; grouping keys come
        // from the observation unit.
        if let Some(fm_tile) = fm.tile_id[idx] {
            if fm_tile.to_string() != tile {
                debug!(
                    "{}: fibermap TILEID {} disagrees with directory tile {}",
                    path.display(),
                    fm_tile,
                    tile
                );
            }
        }
        if let Some(fm_petal) = fm.petal_loc[idx] {
            if fm_petal != petal {
                debug!(
                    "{}: fibermap PETAL_LOC {} disagrees with filename petal {}",
                    path.display(),
                    fm_petal,
                    petal
                );
            }
        }

        let bits = fm.target_bits[idx];
        targets.push(TargetRecord {
            target_id: fm.target_id[idx],
            tile_id: tile.to_string(),
            night: night.to_string(),
            petal,
            fiber_status: fm.fiber_status[idx],
            target_bits: bits,
            categories: registry.label(bits),
            flux_b: spectra.flux.b[idx].clone(),
            flux_r: spectra.flux.r[idx].clone(),
            flux_z: spectra.flux.z[idx].clone(),
            flux_brz: transforms::concat_flux_row(&spectra.flux, idx),
        });
    }

    Ok(ProcessedFile {
        petal,
        wave,
        targets,
        elapsed_s: start.elapsed().as_secs_f64(),
    })
}

/// Run the full pipeline over a survey tree.
///
/// Per-file failures become skip entries in the summary; only registry and
/// run-log failures (and an unreadable root) abort the run.
pub fn run<R: CoaddReader + Sync>(
    reader: &R,
    root: &Path,
    registry: &CategoryRegistry,
    config: &PipelineConfig,
    run_log: &mut RunLog,
) -> anyhow::Result<(Dataset, RunSummary)> {
    let run_start = Instant::now();

    let scan = discovery::scan_tiles(root).context("scanning survey tree")?;

    let mut summary = RunSummary::default();
    let mut tile_ids: Vec<&str> = scan
        .tile_nights
        .iter()
        .map(|tn| tn.tile_id.as_str())
        .collect();
    tile_ids.dedup();
    summary.tiles = tile_ids.len() + scan.empty_tiles.len();
    summary.units = scan.tile_nights.len();

    for tile in &scan.empty_tiles {
        error!("tile {tile} has no night subdirectories");
        summary.skipped.push(SkippedUnit {
            location: tile.clone(),
            reason: SkipReason::NoNights,
        });
    }

    let mut work: Vec<(String, String, PathBuf)> = Vec::new();
    for tn in &scan.tile_nights {
        let files = discovery::find_coadd_files(&tn.dir, &config.survey.coadd_prefix);
        if files.is_empty() {
            warn!("no coadd files in {}", tn.dir.display());
            summary.skipped.push(SkippedUnit {
                location: tn.dir.display().to_string(),
                reason: SkipReason::NoCoaddFiles,
            });
            continue;
        }
        for file in files {
            work.push((tn.tile_id.clone(), tn.night.clone(), file));
        }
    }
    summary.files_found = work.len();

    let good_status = config.survey.good_fiber_status;
    let jobs = config.processing.jobs.max(1);

    let outcomes: Vec<Result<ProcessedFile, SkipReason>> = if jobs > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build()
            .context("building worker pool")?;
        pool.install(|| {
            work.par_iter()
                .map(|(tile, night, path)| {
                    process_file(reader, tile, night, path, registry, good_status)
                })
                .collect()
        })
    } else {
        work.iter()
            .map(|(tile, night, path)| {
                process_file(reader, tile, night, path, registry, good_status)
            })
            .collect()
    };

    // Merge step: the dataset and the run log are appended to by this thread
    // only, in discovery order.
    let mut dataset = Dataset::new();
    for ((tile, night, path), outcome) in work.iter().zip(outcomes) {
        match outcome {
            Ok(done) => {
                let count = done.targets.len();
                info!(
                    "processed tile {} night {} petal {}: {} targets in {:.2}s",
                    tile, night, done.petal, count, done.elapsed_s
                );
                run_log.append(tile, night, done.petal, count, done.elapsed_s)?;
                summary.files_processed += 1;
                summary.targets_written += count;
                dataset.append_unit(done.wave, done.targets);
            }
            Err(reason) => {
                match reason {
                    SkipReason::NoSurvivors => {
                        debug!("skipping {}: {}", path.display(), reason)
                    }
                    _ => warn!("skipping {}: {}", path.display(), reason),
                }
                summary.skipped.push(SkippedUnit {
                    location: path.display().to_string(),
                    reason,
                });
            }
        }
    }

    summary.elapsed_s = run_start.elapsed().as_secs_f64();
    Ok((dataset, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loaders::CsvCoaddReader;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn abc_registry() -> CategoryRegistry {
        CategoryRegistry::from_entries(vec![
            ("A".to_string(), 1),
            ("B".to_string(), 2),
            ("C".to_string(), 4),
        ])
        .unwrap()
    }

    fn write_file(path: &Path, body: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut file = File::create(path).unwrap();
        write!(file, "{}", body).unwrap();
    }

    /// Three targets, statuses [0, 0, 1], bits [2, 0, 4]: only the first
    /// survives the filter.
    const SCENARIO: &str = "\
ROW,TARGETID,COADD_FIBERSTATUS,DESI_TARGET,B,R,Z
wave,,,,3600.0;3600.8,5760.0,9100.0
target,11,0,2,0.1;0.2,0.3,0.5
target,12,0,0,1.1;1.2,1.3,1.5
target,13,1,4,2.1;2.2,2.3,2.5
";

    fn run_over(root: &Path, log: &Path, jobs: usize) -> (Dataset, RunSummary) {
        let mut config = PipelineConfig::default();
        config.processing.jobs = jobs;
        let mut run_log = RunLog::create(log).unwrap();
        run(
            &CsvCoaddReader,
            root,
            &abc_registry(),
            &config,
            &mut run_log,
        )
        .unwrap()
    }

    #[test]
    fn test_pipeline_filter_scenario() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("data");
        write_file(&root.join("100/20230101/coadd-5.csv"), SCENARIO);

        let log = temp_dir.path().join("run-log.csv");
        let (dataset, summary) = run_over(&root, &log, 1);

        assert_eq!(summary.files_found, 1);
        assert_eq!(summary.files_processed, 1);
        assert_eq!(dataset.num_targets(), 1);

        let record = &dataset.targets[0];
        assert_eq!(record.target_id, 11);
        assert_eq!(record.tile_id, "100");
        assert_eq!(record.night, "20230101");
        assert_eq!(record.petal, 5);
        assert_eq!(record.categories, "B");
        assert_eq!(record.flux_brz, vec![0.1, 0.2, 0.3, 0.5]);

        // Alignment invariant: flux_brz matches the unit's wave_brz length.
        assert_eq!(record.flux_brz.len(), dataset.waves[0].wave_brz.len());

        // Run log: header + one row.
        let log_content = fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = log_content.lines().collect();
        assert_eq!(lines[0], "tile,night,petal,targets,elapsed_s");
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("100,20230101,5,1,"));
    }

    #[test]
    fn test_pipeline_skips_empty_folder() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("data");
        write_file(&root.join("100/20230101/coadd-0.csv"), SCENARIO);
        fs::create_dir_all(root.join("200/20230202")).unwrap();

        let log = temp_dir.path().join("run-log.csv");
        let (dataset, summary) = run_over(&root, &log, 1);

        assert_eq!(summary.files_processed, 1);
        assert_eq!(summary.skip_counts(), vec![("no-coadd-files", 1)]);
        // No rows for the empty tile.
        assert!(dataset.targets.iter().all(|t| t.tile_id == "100"));
    }

    #[test]
    fn test_pipeline_reports_tile_without_nights() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("data");
        write_file(&root.join("100/20230101/coadd-0.csv"), SCENARIO);
        fs::create_dir_all(root.join("999")).unwrap();

        let log = temp_dir.path().join("run-log.csv");
        let (_, summary) = run_over(&root, &log, 1);

        assert_eq!(summary.tiles, 2);
        assert!(summary
            .skipped
            .iter()
            .any(|s| s.reason == SkipReason::NoNights && s.location == "999"));
    }

    #[test]
    fn test_pipeline_skips_shape_mismatch_entirely() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("data");
        // Second target carries no B or Z samples: ragged band arrays.
        let bad = "\
ROW,TARGETID,COADD_FIBERSTATUS,DESI_TARGET,B,R,Z
wave,,,,3600.0,5760.0,9100.0
target,11,0,2,0.1,0.3,0.5
target,12,0,2,,1.3,
";
        write_file(&root.join("100/20230101/coadd-0.csv"), bad);

        let log = temp_dir.path().join("run-log.csv");
        let (dataset, summary) = run_over(&root, &log, 1);

        assert_eq!(dataset.num_targets(), 0);
        assert_eq!(summary.files_processed, 0);
        assert_eq!(summary.skip_counts(), vec![("shape-mismatch", 1)]);
    }

    #[test]
    fn test_pipeline_skips_missing_columns() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("data");
        let bad = "\
ROW,TARGETID,B,R,Z
wave,,3600.0,5760.0,9100.0
target,11,0.1,0.3,0.5
";
        write_file(&root.join("100/20230101/coadd-0.csv"), bad);
        write_file(&root.join("200/20230202/coadd-1.csv"), SCENARIO);

        let log = temp_dir.path().join("run-log.csv");
        let (dataset, summary) = run_over(&root, &log, 1);

        // The bad file is skipped; the run continues to the next file.
        assert_eq!(summary.files_processed, 1);
        assert_eq!(summary.skip_counts(), vec![("missing-columns", 1)]);
        assert_eq!(dataset.num_targets(), 1);
        assert_eq!(dataset.targets[0].tile_id, "200");
    }

    #[test]
    fn test_pipeline_no_survivors_is_a_quiet_skip() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("data");
        let nothing_passes = "\
ROW,TARGETID,COADD_FIBERSTATUS,DESI_TARGET,B,R,Z
wave,,,,3600.0,5760.0,9100.0
target,11,1,2,0.1,0.3,0.5
target,12,0,0,1.1,1.3,1.5
";
        write_file(&root.join("100/20230101/coadd-0.csv"), nothing_passes);

        let log = temp_dir.path().join("run-log.csv");
        let (dataset, summary) = run_over(&root, &log, 1);

        assert_eq!(dataset.num_targets(), 0);
        assert_eq!(summary.skip_counts(), vec![("no-survivors", 1)]);
    }

    #[test]
    fn test_pipeline_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("data");
        write_file(&root.join("100/20230101/coadd-0.csv"), SCENARIO);
        write_file(&root.join("100/20230101/coadd-3.csv"), SCENARIO);
        write_file(&root.join("200/20230105/coadd-1.csv"), SCENARIO);

        let (first, _) = run_over(&root, &temp_dir.path().join("log1.csv"), 1);
        let (second, _) = run_over(&root, &temp_dir.path().join("log2.csv"), 1);

        assert_eq!(first, second);
    }

    #[test]
    fn test_pipeline_parallel_matches_sequential() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("data");
        write_file(&root.join("100/20230101/coadd-0.csv"), SCENARIO);
        write_file(&root.join("100/20230101/coadd-7.csv"), SCENARIO);
        write_file(&root.join("300/20230301/coadd-2.csv"), SCENARIO);

        let (sequential, _) = run_over(&root, &temp_dir.path().join("log1.csv"), 1);
        let (parallel, _) = run_over(&root, &temp_dir.path().join("log2.csv"), 4);

        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_pipeline_missing_root_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let mut run_log = RunLog::create(&temp_dir.path().join("log.csv")).unwrap();

        let result = run(
            &CsvCoaddReader,
            &temp_dir.path().join("nope"),
            &abc_registry(),
            &PipelineConfig::default(),
            &mut run_log,
        );

        assert!(result.is_err());
    }
}
