//! Command-line interface for the spectra pipeline.

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::{CompressionCodec, OutputFormat, PipelineConfig};
use crate::core::loaders::CsvCoaddReader;
use crate::core::writers;
use crate::processors::classification::CategoryRegistry;
use crate::processors::discovery;
use crate::processors::pipeline::{self, RunLog};

#[derive(Parser)]
#[command(name = "spectra-pipeline")]
#[command(about = "Spectroscopic survey coadd dataset builder", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and write the output dataset
    Build {
        /// Root of the survey tree (root/{tile}/{night}/coadd-*.csv)
        data_path: PathBuf,
        /// Output directory for dataset files and the run log
        output_dir: PathBuf,
        /// Output dataset shape
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
        /// YAML category registry overriding the built-in table
        #[arg(long)]
        registry: Option<PathBuf>,
        /// Run log path (defaults inside the output directory)
        #[arg(long)]
        log: Option<PathBuf>,
        /// Worker threads for per-file processing
        #[arg(short, long)]
        jobs: Option<usize>,
        /// Parquet column compression
        #[arg(long, value_enum)]
        compression: Option<CompressionCodec>,
    },

    /// List the observation units a build would process
    Scan {
        /// Root of the survey tree
        data_path: PathBuf,
    },

    /// Print the category registry in use
    Categories {
        /// YAML category registry overriding the built-in table
        #[arg(long)]
        registry: Option<PathBuf>,
    },
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.len() > 39 {
            format!("{}...", &value[..36])
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // Load config
    let config = match &cli.config {
        Some(path) => match PipelineConfig::from_yaml(path) {
            Ok(cfg) => {
                info!("Loaded config from: {}", path.display());
                cfg
            }
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}, using defaults",
                    path.display(),
                    e
                );
                PipelineConfig::default()
            }
        },
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Build {
            data_path,
            output_dir,
            format,
            registry,
            log,
            jobs,
            compression,
        } => {
            cmd_build(
                &data_path, &output_dir, format, registry, log, jobs, compression, config,
            );
        }
        Commands::Scan { data_path } => {
            cmd_scan(&data_path, &config);
        }
        Commands::Categories { registry } => {
            cmd_categories(registry, &config);
        }
    }
}

/// Resolve the category registry; its failure is fatal for the run.
fn load_registry(
    cli_path: Option<PathBuf>,
    config: &PipelineConfig,
) -> CategoryRegistry {
    let path = cli_path.or_else(|| config.survey.registry.clone());
    match path {
        Some(path) => match CategoryRegistry::from_yaml(&path) {
            Ok(registry) => {
                info!("Loaded category registry from: {}", path.display());
                registry
            }
            Err(e) => {
                error!("Failed to load category registry {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => CategoryRegistry::survey_default(),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_build(
    data_path: &Path,
    output_dir: &Path,
    format: Option<OutputFormat>,
    registry_path: Option<PathBuf>,
    log_path: Option<PathBuf>,
    jobs: Option<usize>,
    compression: Option<CompressionCodec>,
    mut config: PipelineConfig,
) {
    let start = Instant::now();

    // CLI overrides on top of the config file
    if let Some(format) = format {
        config.output.format = format;
    }
    if let Some(jobs) = jobs {
        config.processing.jobs = jobs;
    }
    if let Some(codec) = compression {
        config.output.compression = codec;
    }

    let registry = load_registry(registry_path, &config);

    let run_log_path =
        log_path.unwrap_or_else(|| output_dir.join(&config.output.log_file));
    let mut run_log = match RunLog::create(&run_log_path) {
        Ok(log) => log,
        Err(e) => {
            error!("Failed to create run log: {e:#}");
            std::process::exit(1);
        }
    };

    println!("Building dataset...");
    println!("Data root: {}", data_path.display());
    println!("Output directory: {}", output_dir.display());

    let spinner = create_spinner("Processing coadd files...");

    let result = pipeline::run(&CsvCoaddReader, data_path, &registry, &config, &mut run_log);

    spinner.finish_and_clear();

    let (dataset, summary) = match result {
        Ok(pair) => pair,
        Err(e) => {
            error!("Build failed: {e:#}");
            std::process::exit(1);
        }
    };

    let output_files = match config.output.format {
        OutputFormat::Csv => {
            let flux_path = output_dir.join(&config.output.flux_file);
            let wave_path = output_dir.join(&config.output.wave_file);
            let written = writers::write_target_csv(&flux_path, &dataset.targets)
                .and_then(|_| writers::write_wave_csv(&wave_path, &dataset.waves));
            if let Err(e) = written {
                error!("Failed to write dataset: {e}");
                std::process::exit(1);
            }
            format!("{}, {}", flux_path.display(), wave_path.display())
        }
        OutputFormat::Parquet => {
            let dataset_path = output_dir.join(&config.output.dataset_file);
            if let Err(e) =
                writers::write_parquet(&dataset_path, &dataset, config.output.compression)
            {
                error!("Failed to write dataset: {e}");
                std::process::exit(1);
            }
            dataset_path.display().to_string()
        }
    };

    let skips = if summary.skipped.is_empty() {
        "none".to_string()
    } else {
        summary
            .skip_counts()
            .iter()
            .map(|(key, n)| format!("{key}={n}"))
            .collect::<Vec<_>>()
            .join(", ")
    };

    print_summary(
        "Build Complete",
        &[
            ("Data root", data_path.display().to_string()),
            ("Output files", output_files),
            ("Run log", run_log_path.display().to_string()),
            ("Tiles", summary.tiles.to_string()),
            ("Tile/night units", summary.units.to_string()),
            ("Files found", summary.files_found.to_string()),
            ("Files processed", summary.files_processed.to_string()),
            ("Targets written", summary.targets_written.to_string()),
            ("Skipped", skips),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
}

fn cmd_scan(data_path: &Path, config: &PipelineConfig) {
    let start = Instant::now();

    let spinner = create_spinner("Scanning survey tree...");

    let scan = match discovery::scan_tiles(data_path) {
        Ok(scan) => scan,
        Err(e) => {
            spinner.finish_and_clear();
            error!("Scan failed: {e}");
            std::process::exit(1);
        }
    };

    spinner.finish_and_clear();

    let mut total_files = 0;
    for tn in &scan.tile_nights {
        let files = discovery::find_coadd_files(&tn.dir, &config.survey.coadd_prefix);
        println!(
            "tile {} night {}: {} coadd file(s)",
            tn.tile_id,
            tn.night,
            files.len()
        );
        total_files += files.len();
    }
    for tile in &scan.empty_tiles {
        warn!("tile {tile} has no night subdirectories");
    }

    print_summary(
        "Scan Complete",
        &[
            ("Data root", data_path.display().to_string()),
            ("Tile/night units", scan.tile_nights.len().to_string()),
            ("Empty tiles", scan.empty_tiles.len().to_string()),
            ("Coadd files", total_files.to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
}

fn cmd_categories(registry_path: Option<PathBuf>, config: &PipelineConfig) {
    let registry = load_registry(registry_path, config);

    println!("{:<16} {:>20} {:>8}", "NAME", "BIT", "LOG2");
    for (name, bit) in registry.iter() {
        println!("{:<16} {:>20} {:>8}", name, bit, bit.trailing_zeros());
    }
    println!();
    println!("{} categories", registry.len());
}
