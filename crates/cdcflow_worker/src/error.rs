use arrow::error::ArrowError;
use cdcflow_sinks::SinkError;
use cdcflow_store::StoreError;
use thiserror::Error;

/// Merge job failures.
///
/// Every variant aborts the run before the canonical snapshot is touched, or
/// at promotion, which is all-or-nothing.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("invalid job arguments: {0}")]
    InvalidArguments(String),

    #[error("input object not found: {bucket}/{key}")]
    InputNotFound { bucket: String, key: String },

    #[error("unexpected number of columns: {columns} (expected 3 or 4)")]
    UnexpectedSchema { columns: usize },

    #[error("PersonID {person_id} appears more than once in the batch")]
    DuplicateKey { person_id: i32 },

    #[error("existing snapshot is unreadable: {0}")]
    CorruptSnapshot(String),

    #[error("promotion from {temp_prefix} failed: {reason}")]
    PromotionFailed { temp_prefix: String, reason: String },

    #[error("canonical snapshot {key} was modified concurrently: {reason}")]
    CanonicalConflict { key: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),
}

impl MergeError {
    /// Whether re-running the same invocation could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            MergeError::PromotionFailed { .. } | MergeError::CanonicalConflict { .. } => true,
            MergeError::Store(err) => err.is_transient(),
            _ => false,
        }
    }

    /// Map a staging or promotion failure onto the job's error kinds.
    pub(crate) fn from_promotion(err: SinkError, temp_prefix: &str) -> Self {
        match &err {
            SinkError::CanonicalConflict { key, .. } => MergeError::CanonicalConflict {
                key: key.clone(),
                reason: err.to_string(),
            },
            _ => MergeError::PromotionFailed {
                temp_prefix: temp_prefix.to_string(),
                reason: err.to_string(),
            },
        }
    }
}
