//! Configuration types for the spectra pipeline.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Output dataset shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Two flat CSV tables (target-level and wavelength-level).
    #[default]
    Csv,
    /// One Parquet file grouped night/tile/petal with list-typed arrays.
    Parquet,
}

/// Column compression for Parquet output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CompressionCodec {
    #[default]
    Zstd,
    Snappy,
    None,
}

/// Configuration for the survey directory layout and eligibility rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyConfig {
    /// Filename prefix identifying per-petal coadd files
    #[serde(default = "default_coadd_prefix")]
    pub coadd_prefix: String,

    /// Fiber status value marking a usable fiber
    #[serde(default)]
    pub good_fiber_status: i32,

    /// Optional YAML file overriding the built-in category registry
    #[serde(default)]
    pub registry: Option<PathBuf>,
}

fn default_coadd_prefix() -> String {
    "coadd-".to_string()
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            coadd_prefix: default_coadd_prefix(),
            good_fiber_status: 0,
            registry: None,
        }
    }
}

/// Configuration for output files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,

    /// Target-level CSV filename (csv format)
    #[serde(default = "default_flux_file")]
    pub flux_file: String,

    /// Wavelength-level CSV filename (csv format)
    #[serde(default = "default_wave_file")]
    pub wave_file: String,

    /// Dataset filename (parquet format)
    #[serde(default = "default_dataset_file")]
    pub dataset_file: String,

    /// Run log filename
    #[serde(default = "default_log_file")]
    pub log_file: String,

    #[serde(default)]
    pub compression: CompressionCodec,
}

fn default_flux_file() -> String {
    "dataset-flux.csv".to_string()
}

fn default_wave_file() -> String {
    "dataset-wave.csv".to_string()
}

fn default_dataset_file() -> String {
    "dataset.parquet".to_string()
}

fn default_log_file() -> String {
    "run-log.csv".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            flux_file: default_flux_file(),
            wave_file: default_wave_file(),
            dataset_file: default_dataset_file(),
            log_file: default_log_file(),
            compression: CompressionCodec::default(),
        }
    }
}

/// Configuration for pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Worker threads for per-file processing (1 = sequential)
    #[serde(default = "default_jobs")]
    pub jobs: usize,
}

fn default_jobs() -> usize {
    1
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
        }
    }
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub survey: SurveyConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub processing: ProcessingConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_survey_config() {
        let config = SurveyConfig::default();
        assert_eq!(config.coadd_prefix, "coadd-");
        assert_eq!(config.good_fiber_status, 0);
        assert!(config.registry.is_none());
    }

    #[test]
    fn test_default_pipeline_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.output.format, OutputFormat::Csv);
        assert_eq!(config.output.compression, CompressionCodec::Zstd);
        assert_eq!(config.processing.jobs, 1);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = "output:\n  format: parquet\n";
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.output.format, OutputFormat::Parquet);
        assert_eq!(config.output.dataset_file, "dataset.parquet");
        assert_eq!(config.survey.coadd_prefix, "coadd-");
    }
}
