//! Run-level summary and per-entity grouping over a [`JobTable`].

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use derive_more::derive::{Deref, Display, Into};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::{anonymize::AnonToken, job::Column, job::NormalizedJob, table::JobTable};

const SECONDS_PER_HOUR: f64 = 3600.0;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Summary {
    pub total_cpu_hours: f64,
    pub total_gpu_hours: f64,
    pub avg_requested_memory_gb: f64,
    pub avg_max_rss_gb: f64,
}

impl Summary {
    pub fn metrics(&self) -> [(&'static str, f64); 4] {
        [
            ("Total CPU Hours", self.total_cpu_hours),
            ("Total GPU Hours", self.total_gpu_hours),
            ("Average Requested Memory (GB)", self.avg_requested_memory_gb),
            ("Average Max RSS Memory Usage (GB)", self.avg_max_rss_gb),
        ]
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (metric, value) in self.metrics() {
            writeln!(f, "  {metric}: {value:.2}")?;
        }
        Ok(())
    }
}

/// Sum of GPU-hours (or CPU-hours) above which a user or node counts as busy. Strictly above.
///
/// Historically two values were in use for the same question, so callers always pass one
/// explicitly. [`BusyThreshold::ANALYTICS`] and [`BusyThreshold::DASHBOARD`] are those two.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Deref, Into, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusyThreshold(pub f64);

impl BusyThreshold {
    /// GPU allocation tracker: more than one GPU-hour
    pub const ANALYTICS: BusyThreshold = BusyThreshold(1.0);
    /// dashboard's "busiest nodes" section: more than 100 GPU-hours
    pub const DASHBOARD: BusyThreshold = BusyThreshold(100.0);
}

/// Totals and averages over every job in the table.
///
/// Averages include jobs whose memory could not be parsed (as 0). An empty table gives all zeros.
/// A metric whose column is missing entirely is 0 as well, with a warning.
pub fn summarize(table: &JobTable) -> Summary {
    let jobs = table.jobs();
    let has_time = table.has_column(Column::CpuTime) || table.has_column(Column::Elapsed);

    let total_cpu_hours = if table.has_column(Column::CpuTime) {
        jobs.iter().map(|job| job.cpu_time_seconds).sum::<f64>() / SECONDS_PER_HOUR
    } else {
        warn_missing("Total CPU Hours", Column::CpuTime.header());
        0.0
    };

    let total_gpu_hours = match (has_time, table.has_column(Column::AllocTres)) {
        (true, true) => jobs.iter().map(|job| job.gpu_hours).sum::<f64>(),
        (_, false) => {
            warn_missing("Total GPU Hours", Column::AllocTres.header());
            0.0
        }
        (false, true) => {
            warn_missing("Total GPU Hours", "CPUTime/Elapsed");
            0.0
        }
    };

    let avg_requested_memory_gb = if table.has_column(Column::ReqMem) {
        mean(jobs.iter().map(|job| job.requested_memory_gb))
    } else {
        warn_missing("Average Requested Memory", Column::ReqMem.header());
        0.0
    };

    let avg_max_rss_gb = if table.has_column(Column::MaxRss) {
        mean(jobs.iter().map(|job| job.max_rss_gb))
    } else {
        warn_missing("Average Max RSS", Column::MaxRss.header());
        0.0
    };

    Summary {
        total_cpu_hours,
        total_gpu_hours,
        avg_requested_memory_gb,
        avg_max_rss_gb,
    }
}

fn warn_missing(metric: &str, column: &str) {
    warn!("no `{column}` column in input, reporting {metric} as 0");
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Sums `metric` per distinct `key`.
pub fn group_sum<'a, K: Ord>(
    jobs: impl IntoIterator<Item = &'a NormalizedJob>,
    key: impl Fn(&'a NormalizedJob) -> K,
    metric: impl Fn(&NormalizedJob) -> f64,
) -> BTreeMap<K, f64> {
    let mut groups = BTreeMap::new();
    for job in jobs {
        *groups.entry(key(job)).or_insert(0.0) += metric(job);
    }
    groups
}

/// Keys whose summed `metric` is strictly above `threshold`.
pub fn group_busy<'a, K: Ord>(
    jobs: impl IntoIterator<Item = &'a NormalizedJob>,
    key: impl Fn(&'a NormalizedJob) -> K,
    metric: impl Fn(&NormalizedJob) -> f64,
    threshold: BusyThreshold,
) -> BTreeSet<K> {
    group_sum(jobs, key, metric)
        .into_iter()
        .filter(|(_, sum)| *sum > *threshold)
        .map(|(key, _)| key)
        .collect()
}

/// GPU-hours per node token.
pub fn gpu_hours_per_node(table: &JobTable) -> BTreeMap<AnonToken, f64> {
    group_sum(table.jobs(), |job| job.node_token.clone(), |job| job.gpu_hours)
}

pub fn busy_nodes(table: &JobTable, threshold: BusyThreshold) -> BTreeSet<AnonToken> {
    group_busy(table.jobs(), |job| job.node_token.clone(), |job| job.gpu_hours, threshold)
}

pub fn busy_users(table: &JobTable, threshold: BusyThreshold) -> BTreeSet<AnonToken> {
    group_busy(table.jobs(), |job| job.user_token.clone(), |job| job.gpu_hours, threshold)
}
