use std::path::PathBuf;

use chrono::NaiveDate;
use clap::Parser;

/// Daily usage summary from a Slurm accounting dump.
#[derive(Debug, Clone, PartialEq, Parser)]
pub struct Args {
    /// Day to report on (`YYYY-MM-DD`), defaults to today
    #[arg(long)]
    pub date: Option<NaiveDate>,
    /// Read this file instead of the dated one in `input_dir`
    #[arg(long)]
    pub input: Option<PathBuf>,
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
    /// GPU-hours above which a node/user is reported as busy (overrides `busy_threshold`)
    #[arg(long)]
    pub busy_threshold: Option<f64>,
    /// Config file, extension optional
    #[arg(long, default_value = "config/report")]
    pub config: PathBuf,
}
