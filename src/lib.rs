//! Spectroscopic survey coadd processing pipeline.
//!
//! This crate turns a directory tree of per-petal coadd spectral files into
//! a single structured dataset:
//! - Enumerating tile/night observation units and their coadd files
//! - Filtering targets by fiber status and classification bitmask
//! - Decoding classification bitfields into category labels
//! - Concatenating the b, r, z band arrays into unified spectra
//! - Writing flat CSV tables or a grouped Parquet dataset
//!
//! # Example
//!
//! ```no_run
//! use spectra_pipeline::core::loaders::CsvCoaddReader;
//! use spectra_pipeline::processors::classification::CategoryRegistry;
//! use spectra_pipeline::processors::pipeline::{run, RunLog};
//! use spectra_pipeline::PipelineConfig;
//! use std::path::Path;
//!
//! let registry = CategoryRegistry::survey_default();
//! let config = PipelineConfig::default();
//! let mut log = RunLog::create(Path::new("run-log.csv")).unwrap();
//! let (dataset, summary) =
//!     run(&CsvCoaddReader, Path::new("data"), &registry, &config, &mut log).unwrap();
//! println!("{} targets from {} files", dataset.num_targets(), summary.files_processed);
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;

pub use config::{CompressionCodec, OutputFormat, PipelineConfig};
pub use core::dataset::Dataset;
pub use core::loaders::{CoaddReader, CoaddSpectra, CsvCoaddReader};
pub use processors::classification::CategoryRegistry;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
