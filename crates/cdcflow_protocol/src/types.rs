//! Core domain types shared across the trigger adapter and merge job.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Column names of the canonical snapshot, in output order.
pub const SNAPSHOT_COLUMNS: [&str; 3] = ["PersonID", "FullName", "City"];

/// Column names bound positionally to a CDC input row.
pub const CDC_COLUMNS: [&str; 4] = ["Op", "PersonID", "FullName", "City"];

/// Identity key column.
pub const KEY_COLUMN: &str = "PersonID";

// ============================================================================
// Change operations
// ============================================================================

/// Row-level change operation carried in the first column of a CDC batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    #[serde(rename = "I")]
    Insert,
    #[serde(rename = "U")]
    Update,
    #[serde(rename = "D")]
    Delete,
}

impl Op {
    /// Parse the single-letter wire code. Surrounding whitespace is ignored,
    /// anything else returns `None`.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "I" => Some(Op::Insert),
            "U" => Some(Op::Update),
            "D" => Some(Op::Delete),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Op::Insert => "I",
            Op::Update => "U",
            Op::Delete => "D",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Shape of an uploaded input object, decided by its column count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    /// 4 columns: Op, PersonID, FullName, City
    Cdc,
    /// 3 columns: PersonID, FullName, City
    Snapshot,
}

impl BatchKind {
    pub fn from_column_count(columns: usize) -> Option<Self> {
        match columns {
            4 => Some(BatchKind::Cdc),
            3 => Some(BatchKind::Snapshot),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchKind::Cdc => "cdc",
            BatchKind::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Job invocation
// ============================================================================

/// Parameters passed from the trigger adapter to the merge job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobArguments {
    pub dst_bucket_name: String,
    pub file_name: String,
}

impl JobArguments {
    pub fn new(dst_bucket_name: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            dst_bucket_name: dst_bucket_name.into(),
            file_name: file_name.into(),
        }
    }

    /// Render as `--name value` pairs, the form a job runner passes on argv.
    pub fn to_cli_args(&self) -> Vec<String> {
        vec![
            "--dst-bucket-name".to_string(),
            self.dst_bucket_name.clone(),
            "--file-name".to_string(),
            self.file_name.clone(),
        ]
    }
}

/// Error returned when parsing a job run identifier fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid job run ID '{value}': {reason}")]
pub struct JobRunIdError {
    value: String,
    reason: String,
}

const JOB_RUN_ID_PREFIX: &str = "jr_";

/// Opaque identifier returned by a job dispatch, rendered `jr_<32 hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobRunId(Uuid);

impl JobRunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Result<Self, JobRunIdError> {
        let hex = value
            .strip_prefix(JOB_RUN_ID_PREFIX)
            .ok_or_else(|| JobRunIdError {
                value: value.to_string(),
                reason: format!("missing '{}' prefix", JOB_RUN_ID_PREFIX),
            })?;
        let uuid = Uuid::parse_str(hex).map_err(|e| JobRunIdError {
            value: value.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self(uuid))
    }

    /// Short tag used to namespace per-run storage prefixes.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for JobRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", JOB_RUN_ID_PREFIX, self.0.simple())
    }
}

impl std::str::FromStr for JobRunId {
    type Err = JobRunIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for JobRunId {
    type Error = JobRunIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<JobRunId> for String {
    fn from(value: JobRunId) -> Self {
        value.to_string()
    }
}

// ============================================================================
// Merge outcome
// ============================================================================

/// Row counts observed during one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeCounts {
    pub prior_rows: u64,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    /// CDC rows whose Op was not I/U/D.
    pub skipped_ops: u64,
    pub output_rows: u64,
}
