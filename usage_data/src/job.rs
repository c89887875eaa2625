use std::fmt::Display;

use serde::Serialize;

use crate::anonymize::AnonToken;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// sacct fields we know about, named as in sacct's header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Column {
    JobId,
    User,
    NodeList,
    AllocTres,
    Elapsed,
    CpuTime,
    ReqMem,
    MaxRss,
    Start,
    End,
}

impl Column {
    pub const ALL: [Column; 10] = [
        Column::JobId,
        Column::User,
        Column::NodeList,
        Column::AllocTres,
        Column::Elapsed,
        Column::CpuTime,
        Column::ReqMem,
        Column::MaxRss,
        Column::Start,
        Column::End,
    ];

    pub fn header(self) -> &'static str {
        match self {
            Column::JobId => "JobID",
            Column::User => "User",
            Column::NodeList => "NodeList",
            Column::AllocTres => "AllocTRES",
            Column::Elapsed => "Elapsed",
            Column::CpuTime => "CPUTime",
            Column::ReqMem => "ReqMem",
            Column::MaxRss => "MaxRSS",
            Column::Start => "Start",
            Column::End => "End",
        }
    }

    /// case-insensitive, since `sacct --format` echoes whatever case it was given
    pub fn from_header(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|column| column.header().eq_ignore_ascii_case(name))
    }
}

impl Display for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.header())
    }
}

/// One accounting line as read, all fields verbatim (trimmed). Columns missing from the input are
/// empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawJob {
    pub job_id: String,
    pub user: String,
    pub node_list: String,
    pub alloc_tres: String,
    pub elapsed: String,
    pub cpu_time: String,
    pub req_mem: String,
    pub max_rss: String,
    pub start: String,
    pub end: String,
}

impl RawJob {
    pub fn field(&self, column: Column) -> &str {
        match column {
            Column::JobId => &self.job_id,
            Column::User => &self.user,
            Column::NodeList => &self.node_list,
            Column::AllocTres => &self.alloc_tres,
            Column::Elapsed => &self.elapsed,
            Column::CpuTime => &self.cpu_time,
            Column::ReqMem => &self.req_mem,
            Column::MaxRss => &self.max_rss,
            Column::Start => &self.start,
            Column::End => &self.end,
        }
    }

    pub(crate) fn field_mut(&mut self, column: Column) -> &mut String {
        match column {
            Column::JobId => &mut self.job_id,
            Column::User => &mut self.user,
            Column::NodeList => &mut self.node_list,
            Column::AllocTres => &mut self.alloc_tres,
            Column::Elapsed => &mut self.elapsed,
            Column::CpuTime => &mut self.cpu_time,
            Column::ReqMem => &mut self.req_mem,
            Column::MaxRss => &mut self.max_rss,
            Column::Start => &mut self.start,
            Column::End => &mut self.end,
        }
    }
}

/// A [`RawJob`] plus everything derived from it. Every number is finite and non-negative;
/// whatever could not be parsed is 0.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedJob {
    pub raw: RawJob,
    pub cpu_time_seconds: f64,
    pub elapsed_seconds: f64,
    pub requested_memory_gb: f64,
    pub max_rss_gb: f64,
    pub gpu_count: u32,
    pub gpu_hours: f64,
    pub user_token: AnonToken,
    pub node_token: AnonToken,
}

impl NormalizedJob {
    pub fn cpu_hours(&self) -> f64 {
        self.cpu_time_seconds / SECONDS_PER_HOUR
    }

    pub fn row(&self) -> NormalizedRow<'_> {
        NormalizedRow {
            job_id: &self.raw.job_id,
            user_token: &self.user_token,
            node_token: &self.node_token,
            start: &self.raw.start,
            end: &self.raw.end,
            cpu_time_seconds: self.cpu_time_seconds,
            elapsed_seconds: self.elapsed_seconds,
            requested_memory_gb: self.requested_memory_gb,
            max_rss_gb: self.max_rss_gb,
            gpu_count: self.gpu_count,
            gpu_hours: self.gpu_hours,
        }
    }
}

/// Export shape of a [`NormalizedJob`]. Carries tokens only, never the user or node name.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedRow<'a> {
    pub job_id: &'a str,
    pub user_token: &'a AnonToken,
    pub node_token: &'a AnonToken,
    pub start: &'a str,
    pub end: &'a str,
    pub cpu_time_seconds: f64,
    pub elapsed_seconds: f64,
    pub requested_memory_gb: f64,
    pub max_rss_gb: f64,
    pub gpu_count: u32,
    pub gpu_hours: f64,
}
