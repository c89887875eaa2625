use std::{
    collections::{BTreeMap, BTreeSet},
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context as _, Result};
use chrono::NaiveDate;
use log::info;
use serde::Serialize;
use usage_data::{slurm::format_date, AnonToken, BusyThreshold, JobTable, Summary, UserIdMap};

pub const USER_MAPPING_FILE: &str = "user_mapping.csv";

pub fn normalized_file_name(date: NaiveDate) -> String {
    format!("normalized_{}.csv", format_date(date))
}

pub fn summary_file_name(date: NaiveDate) -> String {
    format!("summary_{}.json", format_date(date))
}

/// Contents of `summary_<date>.json`.
#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub date: String,
    pub summary: &'a Summary,
    pub busy_threshold: BusyThreshold,
    pub busy_nodes: &'a BTreeSet<AnonToken>,
    pub busy_users: &'a BTreeSet<AnonToken>,
    pub gpu_hours_per_node: &'a BTreeMap<AnonToken, f64>,
}

pub fn print_summary(out: &mut impl Write, date: NaiveDate, summary: &Summary) -> Result<()> {
    writeln!(out, "Daily Summary for {}:", format_date(date))?;
    write!(out, "{summary}")?;
    Ok(())
}

/// The mapping names real users, so only the owner may read it.
pub fn write_user_mapping(dir: &Path, user_ids: &UserIdMap) -> Result<PathBuf> {
    let path = dir.join(USER_MAPPING_FILE);
    let file = private_file(&path).with_context(|| format!("creating {path:?}"))?;
    user_ids
        .write_csv(BufWriter::new(file))
        .map_err(|e| anyhow!("{e:#}"))
        .with_context(|| format!("writing {path:?}"))?;
    info!("User mapping saved to {path:?}");
    Ok(path)
}

#[cfg(unix)]
fn private_file(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::{OpenOptionsExt as _, PermissionsExt as _};

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode only applies on creation
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn private_file(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create(true).truncate(true).open(path)
}

pub fn write_normalized(dir: &Path, date: NaiveDate, table: &JobTable) -> Result<PathBuf> {
    let path = dir.join(normalized_file_name(date));
    let mut csv = csv::Writer::from_path(&path).with_context(|| format!("creating {path:?}"))?;
    for job in table.jobs() {
        csv.serialize(job.row())
            .with_context(|| format!("writing job {} to {path:?}", job.raw.job_id))?;
    }
    csv.flush().with_context(|| format!("flushing {path:?}"))?;
    info!("Normalized data saved to {path:?}");
    Ok(path)
}

pub fn write_summary_json(dir: &Path, date: NaiveDate, report: &RunReport<'_>) -> Result<PathBuf> {
    let path = dir.join(summary_file_name(date));
    let mut writer = BufWriter::new(File::create(&path).with_context(|| format!("creating {path:?}"))?);
    serde_json::to_writer_pretty(&mut writer, report).with_context(|| format!("writing {path:?}"))?;
    writer.flush()?;
    info!("Summary saved to {path:?}");
    Ok(path)
}
