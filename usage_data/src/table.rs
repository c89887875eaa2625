use std::{
    borrow::Cow,
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt::Display,
    path::Path,
    str::FromStr,
};

use color_eyre::{
    eyre::{bail, Context as _},
    Result,
};
use itertools::Itertools as _;
use log::{debug, warn};

use crate::{
    anonymize::{AnonToken, Anonymizer},
    identity::UserIdMap,
    job::{Column, NormalizedJob, RawJob},
    misc::parsing::{gpu_count, gpu_hours, DurationParseError, Elapsed, GpuKey, Memory, MemoryParseError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    /// Runs of whitespace, as in sacct's fixed-width output.
    ///
    /// An empty field can't be told apart from the gap between two fields, so later fields would
    /// shift left. When the line right after the header is sacct's `-----` ruler,
    /// [`RawTable::parse`] cuts records at the ruler's columns instead and blank fields stay put.
    Whitespace,
    Char(char),
}

impl Delimiter {
    fn split<'a>(&self, line: &'a str) -> Vec<&'a str> {
        match self {
            Delimiter::Whitespace => line.split_whitespace().collect(),
            Delimiter::Char(c) => line.split(*c).collect(),
        }
    }
}

impl FromStr for Delimiter {
    type Err = color_eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("whitespace") || s == " " {
            return Ok(Delimiter::Whitespace);
        }
        match s.chars().collect_vec().as_slice() {
            &[c] => Ok(Delimiter::Char(c)),
            _ => bail!("invalid delimiter `{s}` (expected `whitespace` or a single character)"),
        }
    }
}

impl Display for Delimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Delimiter::Whitespace => f.write_str("whitespace"),
            Delimiter::Char(c) => write!(f, "{c}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableFormat {
    pub delimiter: Delimiter,
    /// lines right after the header that are not records (sacct's `-----` line)
    pub skip_after_header: usize,
}

impl TableFormat {
    /// plain `sacct` output: whitespace separated, header followed by a dashes line
    pub fn sacct_fixed() -> Self {
        Self {
            delimiter: Delimiter::Whitespace,
            skip_after_header: 1,
        }
    }

    /// `sacct -P` output: `|` separated, no dashes line
    pub fn parsable() -> Self {
        Self {
            delimiter: Delimiter::Char('|'),
            skip_after_header: 0,
        }
    }
}

impl Default for TableFormat {
    fn default() -> Self {
        Self::sacct_fixed()
    }
}

/// Accounting records as read, before any field is interpreted.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    columns: BTreeSet<Column>,
    jobs: Vec<RawJob>,
    rejected: usize,
}

impl RawTable {
    /// First non-blank line is the header, then `format.skip_after_header` lines get dropped, every
    /// other non-blank line is a record.
    ///
    /// Lines with fewer fields than the header get empty strings for the rest. Lines with more
    /// (non-empty) fields can't be lined up with the header and are dropped, see [`RawTable::rejected`].
    pub fn parse(input: impl AsRef<str>, format: &TableFormat) -> Self {
        let input = input.as_ref();
        let mut lines = input
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty());

        let Some((_, header)) = lines.next() else {
            warn!("input is empty, no header line found");
            return Self::default();
        };
        let header_fields = format.delimiter.split(header);
        let skipped = lines.by_ref().take(format.skip_after_header).collect_vec();
        let ruler = match format.delimiter {
            Delimiter::Whitespace => skipped
                .first()
                .and_then(|(_, line)| Ruler::parse(line))
                .filter(|ruler| {
                    let fits = ruler.0.len() == header_fields.len();
                    if !fits {
                        warn!("`-----` line does not match the header, splitting on whitespace instead");
                    }
                    fits
                }),
            Delimiter::Char(_) => None,
        };
        let header = header_fields.into_iter().map(Column::from_header).collect_vec();
        let columns: BTreeSet<Column> = header.iter().flatten().copied().collect();
        debug!("columns: {}", columns.iter().join(", "));

        let mut jobs = Vec::new();
        let mut rejected = 0;
        for (line_idx, line) in lines {
            let fields = match &ruler {
                Some(ruler) => ruler.split(line),
                None => format.delimiter.split(line),
            };
            if fields.iter().skip(header.len()).any(|field| !field.trim().is_empty()) {
                warn!(
                    "line {}: {} fields, but header has {}, dropping it",
                    line_idx + 1,
                    fields.len(),
                    header.len()
                );
                rejected += 1;
                continue;
            }

            let mut job = RawJob::default();
            for (column, field) in header.iter().zip(fields) {
                if let Some(column) = column {
                    *job.field_mut(*column) = field.trim().to_owned();
                }
            }
            jobs.push(job);
        }

        Self {
            columns,
            jobs,
            rejected,
        }
    }

    /// Invalid UTF-8 (e.g. Latin-1 user names) is replaced, not an error.
    pub fn read(path: impl AsRef<Path>, format: &TableFormat) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).wrap_err_with(|| format!("reading {path:?}"))?;
        let input = String::from_utf8_lossy(&bytes);
        if let Cow::Owned(_) = input {
            warn!("{path:?} is not valid UTF-8, invalid bytes replaced with U+FFFD");
        }
        Ok(Self::parse(input, format))
    }

    pub fn has_column(&self, column: Column) -> bool {
        self.columns.contains(&column)
    }

    pub fn jobs(&self) -> &[RawJob] {
        &self.jobs
    }

    /// number of lines dropped because they had more fields than the header
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// Interprets every field. Never fails: unparseable values become 0 and are reported once per
    /// column with a warning.
    ///
    /// Without an `Elapsed` column, elapsed time is taken from `CPUTime`. CPU time never falls back
    /// to `Elapsed`, wall time is not CPU time.
    pub fn normalize(&self, anonymizer: &Anonymizer, gpu_key: GpuKey) -> JobTable {
        let elapsed_column = self.time_column(Column::Elapsed, Column::CpuTime);

        let mut issues = ParseIssues::default();
        let mut tokens = TokenCache::new(anonymizer);
        let jobs = self
            .jobs
            .iter()
            .map(|raw| {
                let elapsed_seconds = issues.seconds(elapsed_column, raw.field(elapsed_column));
                let cpu_time_seconds = issues.seconds(Column::CpuTime, &raw.cpu_time);
                let gpu_count = gpu_count(&raw.alloc_tres, gpu_key);

                NormalizedJob {
                    cpu_time_seconds,
                    elapsed_seconds,
                    requested_memory_gb: issues.memory(Column::ReqMem, &raw.req_mem, Memory::parse_requested),
                    max_rss_gb: issues.memory(Column::MaxRss, &raw.max_rss, Memory::parse),
                    gpu_count,
                    gpu_hours: gpu_hours(gpu_count, elapsed_seconds),
                    user_token: tokens.get(&raw.user),
                    node_token: tokens.get(&raw.node_list),
                    raw: raw.clone(),
                }
            })
            .collect();
        issues.report();

        JobTable {
            columns: self.columns.clone(),
            jobs,
        }
    }

    fn time_column(&self, preferred: Column, fallback: Column) -> Column {
        if !self.has_column(preferred) && self.has_column(fallback) {
            debug!("no `{preferred}` column, using `{fallback}` instead");
            return fallback;
        }
        preferred
    }
}

/// Column starts (in characters) of sacct's `----- ------` line. A field runs up to where the next
/// column starts, the last one to the end of the line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Ruler(Vec<usize>);

impl Ruler {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end();
        if !line.contains('-') || !line.chars().all(|c| c == '-' || c == ' ') {
            return None;
        }
        let chars = line.chars().collect_vec();
        let starts = (0..chars.len())
            .filter(|&idx| chars[idx] == '-' && (idx == 0 || chars[idx - 1] == ' '))
            .collect();
        Some(Self(starts))
    }

    fn split<'a>(&self, line: &'a str) -> Vec<&'a str> {
        let byte_at = |column: usize| line.char_indices().nth(column).map_or(line.len(), |(idx, _)| idx);
        // a leading ruler gap belongs to the first column
        let starts = std::iter::once(0).chain(self.0.iter().skip(1).copied());
        let ends = self.0.iter().skip(1).map(|&start| byte_at(start)).chain(std::iter::once(line.len()));
        starts
            .map(byte_at)
            .zip(ends)
            .map(|(from, to)| line.get(from..to).unwrap_or_default().trim())
            .collect()
    }
}

/// Counts unparseable (not just empty) values per column.
#[derive(Debug, Default)]
struct ParseIssues(BTreeMap<Column, usize>);

impl ParseIssues {
    fn seconds(&mut self, column: Column, value: &str) -> f64 {
        match Elapsed::parse(value) {
            Ok(elapsed) => elapsed.as_seconds(),
            Err(DurationParseError::Empty | DurationParseError::Unknown) => 0.0,
            Err(e) => {
                debug!("{column}: {e:#}");
                *self.0.entry(column).or_default() += 1;
                0.0
            }
        }
    }

    fn memory(&mut self, column: Column, value: &str, parse: fn(&str) -> Result<Memory, MemoryParseError>) -> f64 {
        match parse(value) {
            Ok(memory) => memory.as_gib(),
            Err(MemoryParseError::Empty) => 0.0,
            Err(e) => {
                debug!("{column} `{value}`: {e:#}");
                *self.0.entry(column).or_default() += 1;
                0.0
            }
        }
    }

    fn report(&self) {
        for (column, count) in &self.0 {
            warn!("{count} unparseable value(s) in column `{column}`, counted as 0");
        }
    }
}

struct TokenCache<'a> {
    anonymizer: &'a Anonymizer,
    tokens: HashMap<String, AnonToken>,
}

impl<'a> TokenCache<'a> {
    fn new(anonymizer: &'a Anonymizer) -> Self {
        Self {
            anonymizer,
            tokens: HashMap::new(),
        }
    }

    fn get(&mut self, value: &str) -> AnonToken {
        if let Some(token) = self.tokens.get(value) {
            return token.clone();
        }
        let token = self.anonymizer.anonymize(value);
        self.tokens.insert(value.to_owned(), token.clone());
        token
    }
}

/// The normalized table of one reporting run.
#[derive(Debug, Clone, Default)]
pub struct JobTable {
    columns: BTreeSet<Column>,
    jobs: Vec<NormalizedJob>,
}

impl JobTable {
    pub fn has_column(&self, column: Column) -> bool {
        self.columns.contains(&column)
    }

    pub fn jobs(&self) -> &[NormalizedJob] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Per-run IDs for plot labels, in order of first appearance.
    pub fn user_ids(&self) -> UserIdMap {
        UserIdMap::from_users(self.jobs.iter().map(|job| job.raw.user.as_str()))
    }
}
