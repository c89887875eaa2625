use std::{fs, io::Write, path::PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::Parser;
use itertools::Itertools as _;
use log::{debug, error, info, warn, LevelFilter};

mod cli;
mod config;
mod output;
mod render;

use cli::Args;
use config::{Settings, ANON_SECRET_VAR};
use output::RunReport;
use render::PlotFiles;
use usage_data::{
    busy_nodes, busy_users,
    slurm::{format_date, log_file_name},
    summarize,
    summary::gpu_hours_per_node,
    Anonymizer, BusyThreshold, RawTable,
};

fn main() -> Result<()> {
    init_logger();
    let args = Args::parse();
    run(&args, std::env::var(ANON_SECRET_VAR).ok())
}

/// Whole report for one day. Fails only without a usable secret, without the input file, or when
/// an artifact can't be written.
fn run(args: &Args, secret: Option<String>) -> Result<()> {
    let settings = read_config(args)?;
    debug!("{settings:?}");
    let anonymizer = build_anonymizer(secret)?;

    let date = args.date.unwrap_or_else(|| Local::now().date_naive());
    let input = input_path(args, &settings, date);
    if !input.is_file() {
        error!("Log file {input:?} not found.");
        bail!("no accounting data for {}", format_date(date));
    }

    let format = settings.table_format()?;
    info!("Reading {input:?}");
    let raw = RawTable::read(&input, &format).map_err(|e| anyhow!("{e:#}"))?;
    if raw.rejected() > 0 {
        warn!("{} malformed line(s) skipped", raw.rejected());
    }
    let table = raw.normalize(&anonymizer, settings.gpu_key);
    info!("{} job(s) normalized", table.len());

    let summary = summarize(&table);
    output::print_summary(&mut std::io::stdout().lock(), date, &summary)?;

    let threshold = args.busy_threshold.map(BusyThreshold).unwrap_or(settings.busy_threshold);
    let nodes = busy_nodes(&table, threshold);
    let users = busy_users(&table, threshold);
    info!("Busy nodes (> {threshold} GPU hours): {}", nodes.iter().join(", "));
    info!("Busy users (> {threshold} GPU hours): {}", users.iter().join(", "));

    let output_dir = args.output_dir.clone().unwrap_or(settings.output_dir);
    fs::create_dir_all(&output_dir).with_context(|| format!("creating {output_dir:?}"))?;

    let user_ids = table.user_ids();
    output::write_user_mapping(&output_dir, &user_ids)?;
    output::write_normalized(&output_dir, date, &table)?;
    let per_node = gpu_hours_per_node(&table);
    output::write_summary_json(
        &output_dir,
        date,
        &RunReport {
            date: format_date(date),
            summary: &summary,
            busy_threshold: threshold,
            busy_nodes: &nodes,
            busy_users: &users,
            gpu_hours_per_node: &per_node,
        },
    )?;

    let mut plots = PlotFiles::new(&output_dir);
    render::render_all(&mut plots, &table, &user_ids);
    info!("{} plot(s) written", plots.written().len());

    Ok(())
}

fn init_logger() {
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, LevelFilter::Info)
        .parse_default_env()
        .init();
}

fn read_config(args: &Args) -> Result<Settings> {
    info!("Loading config");
    Settings::new(&args.config)
        .map_err(anyhow::Error::new)
        .context("parsing config file")
}

/// The secret itself is never logged or stored.
fn build_anonymizer(secret: Option<String>) -> Result<Anonymizer> {
    let Some(secret) = secret else {
        error!("`{ANON_SECRET_VAR}` is not set.");
        bail!("no anonymization secret");
    };
    Anonymizer::from_secret(secret).with_context(|| format!("`{ANON_SECRET_VAR}` is not a usable key"))
}

fn input_path(args: &Args, settings: &Settings, date: NaiveDate) -> PathBuf {
    args.input
        .clone()
        .unwrap_or_else(|| settings.input_dir.join(log_file_name(&settings.log_file_pattern, date)))
}

#[allow(non_snake_case)]
#[cfg(test)]
mod test {
    use std::{ffi::OsStr, path::Path};

    use super::*;

    #[test]
    fn input_path__dated_or_override() -> Result<()> {
        let settings = Settings::new(Path::new("does/not/exist.toml"))?;
        let date = NaiveDate::from_ymd_opt(2025, 3, 17).unwrap_or_default();

        let args = Args::try_parse_from(["usage_report", "--date", "2025-03-17"])?;
        assert_eq!(args.date, Some(date));
        assert_eq!(input_path(&args, &settings, date), PathBuf::from("output/slurm_job_data_2025-03-17.txt"));

        let args = Args::try_parse_from(["usage_report", "--input", "dump.txt", "--busy-threshold", "100"])?;
        assert_eq!(input_path(&args, &settings, date), PathBuf::from("dump.txt"));
        assert_eq!(args.busy_threshold, Some(100.0));
        Ok(())
    }

    const SECRET: &str = "test_secret_key";

    fn args(input: &Path, output_dir: &Path) -> Result<Args> {
        Ok(Args::try_parse_from([
            OsStr::new("usage_report"),
            OsStr::new("--config"),
            OsStr::new("does/not/exist"),
            OsStr::new("--date"),
            OsStr::new("2025-03-17"),
            OsStr::new("--input"),
            input.as_os_str(),
            OsStr::new("--output-dir"),
            output_dir.as_os_str(),
        ])?)
    }

    #[test]
    fn run__missing_input_fails() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let args = args(&dir.path().join("slurm_job_data_2025-03-17.txt"), dir.path())?;
        assert!(run(&args, Some(SECRET.into())).is_err());
        assert!(!dir.path().join("summary_2025-03-17.json").exists());
        Ok(())
    }

    #[test]
    fn run__missing_or_empty_secret_fails() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("input.txt");
        fs::write(&input, "JobID User CPUTime\n----- ---- -------\n1 alice 01:00:00\n")?;
        let args = args(&input, dir.path())?;
        assert!(run(&args, None).is_err());
        assert!(run(&args, Some(String::new())).is_err());
        assert!(run(&args, Some("  ".into())).is_err());
        assert!(!dir.path().join(output::USER_MAPPING_FILE).exists());
        Ok(())
    }

    #[test]
    fn run__header_only_input_writes_zero_summary() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("input.txt");
        fs::write(&input, "JobID User CPUTime\n----- ---- -------\n")?;
        run(&args(&input, dir.path())?, Some(SECRET.into()))?;

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("summary_2025-03-17.json"))?)?;
        assert_eq!(json["summary"]["total_cpu_hours"], 0.0);
        assert_eq!(json["summary"]["avg_max_rss_gb"], 0.0);
        assert_eq!(json["busy_nodes"].as_array().map(Vec::len), Some(0));
        assert!(dir.path().join("normalized_2025-03-17.csv").is_file());
        assert!(!dir.path().join("plot_1.svg").exists());
        Ok(())
    }

    #[test]
    fn run__writes_artifacts() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("input.txt");
        fs::write(
            &input,
            "User       JobID      CPUTime    ReqMem     MaxRSS     AllocTRES\n\
             ---------- ---------- ---------- ---------- ---------- ------------------\n\
             alice      1          10:00:00   16G        8192M      cpu=8,gres/gpu=1\n\
             bob        2          01:00:00   4000M      512K       cpu=1\n",
        )?;
        run(&args(&input, dir.path())?, Some(SECRET.into()))?;

        assert_eq!(
            fs::read_to_string(dir.path().join(output::USER_MAPPING_FILE))?,
            "Username,UserID\nalice,0\nbob,1\n"
        );
        let normalized = fs::read_to_string(dir.path().join("normalized_2025-03-17.csv"))?;
        assert!(!normalized.contains("alice"));
        assert!(dir.path().join("plot_1.svg").is_file());
        Ok(())
    }

    #[test]
    fn Args__rejects_bad_date() {
        assert!(Args::try_parse_from(["usage_report", "--date", "17.03.2025"]).is_err());
    }
}
