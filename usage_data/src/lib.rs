//! Normalization and aggregation of Slurm accounting records.
//!
//! `sacct` text → [`table::RawTable`] → [`table::JobTable`] (numbers and tokens) →
//! [`summary::Summary`] and busy sets. Nothing in here reads the process environment; secrets and
//! thresholds are passed in by the caller.

pub mod anonymize;
pub mod identity;
pub mod job;
pub mod misc {
    pub mod parsing;
}
pub mod slurm;
pub mod summary;
pub mod table;

pub use anonymize::{AnonSecret, AnonToken, Anonymizer, AnonymizerError};
pub use identity::{UserId, UserIdMap};
pub use job::{Column, NormalizedJob, NormalizedRow, RawJob};
pub use misc::parsing::GpuKey;
pub use summary::{busy_nodes, busy_users, group_busy, group_sum, summarize, BusyThreshold, Summary};
pub use table::{Delimiter, JobTable, RawTable, TableFormat};
