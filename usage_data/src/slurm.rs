use chrono::NaiveDate;

/// Name of the daily sacct dump, `{date}` gets replaced by the run date.
pub const DEFAULT_LOG_FILE_PATTERN: &str = "slurm_job_data_{date}.txt";

const DATE_FMT: &str = "%Y-%m-%d";

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FMT).to_string()
}

/// `log_file_name("slurm_job_data_{date}.txt", 2025-03-17)` → `slurm_job_data_2025-03-17.txt`
pub fn log_file_name(pattern: &str, date: NaiveDate) -> String {
    pattern.replace("{date}", &format_date(date))
}
