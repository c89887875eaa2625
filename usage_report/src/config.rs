use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use usage_data::{slurm::DEFAULT_LOG_FILE_PATTERN, BusyThreshold, Delimiter, GpuKey, TableFormat};

/// Environment variable holding the anonymization key. Read once, in `main`.
pub const ANON_SECRET_VAR: &str = "ANON_SECRET";

const DEFAULT_INPUT_DIR: &str = "output";
const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_DELIMITER: &str = "whitespace";
const DEFAULT_SKIP_AFTER_HEADER: i64 = 1;
const DEFAULT_GPU_KEY: &str = "any";

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// `{date}` is replaced by the report date (`YYYY-MM-DD`)
    pub log_file_pattern: String,
    /// `whitespace` or a single character
    pub delimiter: String,
    pub skip_after_header: usize,
    pub gpu_key: GpuKey,
    /// GPU-hours a node or user has to exceed to count as busy
    pub busy_threshold: BusyThreshold,
}

impl Settings {
    pub fn new(config_file: &Path) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("input_dir", DEFAULT_INPUT_DIR)?
            .set_default("output_dir", DEFAULT_OUTPUT_DIR)?
            .set_default("log_file_pattern", DEFAULT_LOG_FILE_PATTERN)?
            .set_default("delimiter", DEFAULT_DELIMITER)?
            .set_default("skip_after_header", DEFAULT_SKIP_AFTER_HEADER)?
            .set_default("gpu_key", DEFAULT_GPU_KEY)?
            .set_default("busy_threshold", *BusyThreshold::ANALYTICS)?
            .add_source(File::from(config_file).required(false))
            .add_source(Environment::with_prefix("app"))
            .build()?;

        builder.try_deserialize()
    }

    pub fn table_format(&self) -> Result<TableFormat> {
        let delimiter: Delimiter = self
            .delimiter
            .parse()
            .map_err(|e| anyhow::anyhow!("{e:#}"))
            .context("parsing `delimiter` setting")?;
        Ok(TableFormat {
            delimiter,
            skip_after_header: self.skip_after_header,
        })
    }
}
