//! Snapshot sink: stage a snapshot under a per-run temporary prefix, then
//! promote it onto the canonical key.
//!
//! The sink follows a stage / promote / cleanup protocol:
//! - `stage` clears the temporary prefix and writes a single headered CSV
//!   part object plus a `_SUCCESS` marker
//! - `promote` locates the one part object and copies it onto the canonical
//!   key, guarded by the canonical version observed before the merge
//! - `cleanup` deletes everything under the temporary prefix
//!
//! Promotion is the only mutation of the canonical object and is a single
//! object copy, so a failure before or during it leaves the canonical
//! snapshot byte-identical.

use arrow::array::RecordBatch;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use cdcflow_protocol::{JobRunId, SNAPSHOT_COLUMNS};
use cdcflow_store::{ObjectStore, StoreError, WritePrecondition, WriteResult};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Key pattern of the data object produced by `stage`.
pub const PART_FILE_PATTERN: &str = r".*/part-.*\.csv$";
pub const SUCCESS_MARKER: &str = "_SUCCESS";

/// Arrow schema of the canonical snapshot: `PersonID: Int32, FullName: Utf8, City: Utf8`.
pub fn snapshot_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(SNAPSHOT_COLUMNS[0], DataType::Int32, true),
        Field::new(SNAPSHOT_COLUMNS[1], DataType::Utf8, true),
        Field::new(SNAPSHOT_COLUMNS[2], DataType::Utf8, true),
    ]))
}

/// Name of the single part object written for a run.
pub fn part_file_name(run_id: &JobRunId) -> String {
    format!("part-00000-{}-c000.csv", run_id)
}

/// Errors returned by staging and promotion.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("no part file found under {prefix}")]
    NoPartFile { prefix: String },

    #[error("expected exactly one part file under {prefix}, found {count}")]
    AmbiguousPartFiles { prefix: String, count: usize },

    #[error("canonical snapshot {key} changed since it was read (expected {expected}, found {current})")]
    CanonicalConflict {
        key: String,
        expected: ObservedVersion,
        current: ObservedVersion,
    },

    #[error("failed to clear temporary prefix {prefix}: {failed} object(s) could not be deleted")]
    StagingNotEmpty { prefix: String, failed: usize },

    #[error("invalid part file pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("failed to encode snapshot CSV: {0}")]
    Encode(#[from] ArrowError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type SinkResult<T> = std::result::Result<T, SinkError>;

/// Canonical object version observed before a merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "version", rename_all = "snake_case")]
pub enum ObservedVersion {
    /// The canonical object did not exist (first run).
    Absent,
    Version(String),
    /// Metadata could not be read; promotion falls back to an unconditional copy.
    Unknown,
}

impl fmt::Display for ObservedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObservedVersion::Absent => f.write_str("absent"),
            ObservedVersion::Version(v) => write!(f, "version {}", v),
            ObservedVersion::Unknown => f.write_str("unknown"),
        }
    }
}

/// Versioned reference to the canonical snapshot object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRef {
    pub bucket: String,
    pub key: String,
    pub observed: ObservedVersion,
}

impl SnapshotRef {
    /// Record the canonical object's current version.
    pub fn observe(store: &dyn ObjectStore, bucket: &str, key: &str) -> Self {
        let observed = match store.head(bucket, key) {
            Ok(Some(meta)) => match meta.version {
                Some(version) => ObservedVersion::Version(version),
                None => ObservedVersion::Unknown,
            },
            Ok(None) => ObservedVersion::Absent,
            Err(err) => {
                warn!(bucket, key, error = %err, "could not read canonical snapshot metadata");
                ObservedVersion::Unknown
            }
        };
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            observed,
        }
    }

    pub fn precondition(&self) -> WritePrecondition {
        match &self.observed {
            ObservedVersion::Absent => WritePrecondition::DoesNotExist,
            ObservedVersion::Version(v) => WritePrecondition::MatchesVersion(v.clone()),
            ObservedVersion::Unknown => WritePrecondition::None,
        }
    }
}

/// Part object written by `stage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedPart {
    pub key: String,
    pub rows: u64,
    pub bytes: u64,
}

/// Result of a successful promotion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promotion {
    pub part_key: String,
    pub canonical_key: String,
    pub version: String,
}

/// Outcome of removing the temporary prefix. Never fatal to the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CleanupOutcome {
    Removed { objects: usize },
    Failed { message: String },
}

/// Serialise a snapshot batch as headered CSV.
pub fn encode_snapshot_csv(batch: &RecordBatch) -> SinkResult<Vec<u8>> {
    let mut writer = arrow::csv::WriterBuilder::new()
        .with_header(true)
        .build(Vec::new());
    writer.write(batch)?;
    Ok(writer.into_inner())
}

/// Stages one run's snapshot and promotes it onto the canonical key.
pub struct StagedSnapshotSink<'a> {
    store: &'a dyn ObjectStore,
    canonical: SnapshotRef,
    temp_prefix: String,
    run_id: JobRunId,
}

impl<'a> StagedSnapshotSink<'a> {
    pub fn new(
        store: &'a dyn ObjectStore,
        canonical: SnapshotRef,
        temp_prefix: impl Into<String>,
        run_id: JobRunId,
    ) -> Self {
        Self {
            store,
            canonical,
            temp_prefix: temp_prefix.into(),
            run_id,
        }
    }

    pub fn temp_prefix(&self) -> &str {
        &self.temp_prefix
    }

    pub fn canonical(&self) -> &SnapshotRef {
        &self.canonical
    }

    fn bucket(&self) -> &str {
        &self.canonical.bucket
    }

    /// Write the snapshot as the single part object under the temp prefix.
    ///
    /// Anything already under the prefix is removed first, so the prefix ends
    /// up holding exactly this run's output.
    pub fn stage(&self, batch: &RecordBatch) -> SinkResult<StagedPart> {
        let existing = self.list_temp_keys()?;
        if !existing.is_empty() {
            debug!(
                prefix = %self.temp_prefix,
                objects = existing.len(),
                "clearing stale temporary output"
            );
            let report = self.store.delete_many(self.bucket(), &existing);
            if !report.is_complete() {
                return Err(SinkError::StagingNotEmpty {
                    prefix: self.temp_prefix.clone(),
                    failed: report.failed.len(),
                });
            }
        }

        let data = encode_snapshot_csv(batch)?;
        let bytes = data.len() as u64;
        let part_key = format!("{}{}", self.temp_prefix, part_file_name(&self.run_id));
        self.store
            .put(self.bucket(), &part_key, data, WritePrecondition::None)?;
        let marker = format!("{}{}", self.temp_prefix, SUCCESS_MARKER);
        self.store
            .put(self.bucket(), &marker, Vec::new(), WritePrecondition::None)?;

        info!(
            part = %part_key,
            rows = batch.num_rows(),
            bytes,
            "staged snapshot"
        );
        Ok(StagedPart {
            key: part_key,
            rows: batch.num_rows() as u64,
            bytes,
        })
    }

    /// Copy the staged part object onto the canonical key.
    pub fn promote(&self) -> SinkResult<Promotion> {
        let pattern = Regex::new(PART_FILE_PATTERN)?;
        let parts: Vec<String> = self
            .list_temp_keys()?
            .into_iter()
            .filter(|key| pattern.is_match(key))
            .collect();

        let part_key = match parts.as_slice() {
            [] => {
                return Err(SinkError::NoPartFile {
                    prefix: self.temp_prefix.clone(),
                })
            }
            [single] => single.clone(),
            _ => {
                return Err(SinkError::AmbiguousPartFiles {
                    prefix: self.temp_prefix.clone(),
                    count: parts.len(),
                })
            }
        };
        info!(part = %part_key, "found part file");

        let outcome = self.store.copy(
            self.bucket(),
            &part_key,
            &self.canonical.key,
            self.canonical.precondition(),
        )?;
        match outcome {
            WriteResult::Success { version } => {
                info!(
                    bucket = %self.canonical.bucket,
                    key = %self.canonical.key,
                    %version,
                    "promoted snapshot"
                );
                Ok(Promotion {
                    part_key,
                    canonical_key: self.canonical.key.clone(),
                    version,
                })
            }
            WriteResult::PreconditionFailed { current_version } => {
                Err(SinkError::CanonicalConflict {
                    key: self.canonical.key.clone(),
                    expected: self.canonical.observed.clone(),
                    current: current_version
                        .map(ObservedVersion::Version)
                        .unwrap_or(ObservedVersion::Absent),
                })
            }
        }
    }

    /// Delete every object under the temporary prefix.
    pub fn cleanup(&self) -> CleanupOutcome {
        let keys = match self.list_temp_keys() {
            Ok(keys) => keys,
            Err(err) => {
                warn!(prefix = %self.temp_prefix, error = %err, "failed to list temporary output");
                return CleanupOutcome::Failed {
                    message: err.to_string(),
                };
            }
        };
        if keys.is_empty() {
            info!(prefix = %self.temp_prefix, "no temporary objects to clean");
            return CleanupOutcome::Removed { objects: 0 };
        }

        let report = self.store.delete_many(self.bucket(), &keys);
        if let Some((key, err)) = report.failed.first() {
            warn!(
                prefix = %self.temp_prefix,
                failed = report.failed.len(),
                first_key = %key,
                error = %err,
                "temporary output cleanup incomplete"
            );
            return CleanupOutcome::Failed {
                message: format!(
                    "{} of {} object(s) not deleted; first failure {}: {}",
                    report.failed.len(),
                    keys.len(),
                    key,
                    err
                ),
            };
        }

        info!(prefix = %self.temp_prefix, objects = report.deleted.len(), "cleaned up temporary output");
        CleanupOutcome::Removed {
            objects: report.deleted.len(),
        }
    }

    fn list_temp_keys(&self) -> SinkResult<Vec<String>> {
        Ok(self
            .store
            .list(self.bucket(), &self.temp_prefix)?
            .into_iter()
            .map(|meta| meta.key)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int32Array, StringArray};
    use cdcflow_store::MemoryStore;

    fn people(ids: Vec<Option<i32>>, names: Vec<Option<&str>>, cities: Vec<Option<&str>>) -> RecordBatch {
        RecordBatch::try_new(
            snapshot_schema(),
            vec![
                Arc::new(Int32Array::from(ids)),
                Arc::new(StringArray::from(names)),
                Arc::new(StringArray::from(cities)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_encode_writes_header_and_nulls_as_empty() {
        let batch = people(
            vec![Some(1), None],
            vec![Some("Alice"), Some("Smith, J")],
            vec![Some("NYC"), None],
        );
        let csv = String::from_utf8(encode_snapshot_csv(&batch).unwrap()).unwrap();
        assert_eq!(csv, "PersonID,FullName,City\n1,Alice,NYC\n,\"Smith, J\",\n");
    }

    #[test]
    fn test_encode_empty_snapshot_keeps_header() {
        let batch = RecordBatch::new_empty(snapshot_schema());
        let csv = String::from_utf8(encode_snapshot_csv(&batch).unwrap()).unwrap();
        assert_eq!(csv, "PersonID,FullName,City\n");
    }

    #[test]
    fn test_part_file_name_matches_pattern() {
        let name = part_file_name(&JobRunId::new());
        let pattern = Regex::new(PART_FILE_PATTERN).unwrap();
        assert!(pattern.is_match(&format!("des_file/temp_output_x/{}", name)));
        assert!(!pattern.is_match("des_file/temp_output_x/_SUCCESS"));
        assert!(!pattern.is_match("des_file/temp_output_x/part-00000.csv.crc"));
    }

    #[test]
    fn test_observe_reports_absent_then_version() {
        let store = MemoryStore::new();
        let absent = SnapshotRef::observe(&store, "b", "des_file/final_output.csv");
        assert_eq!(absent.observed, ObservedVersion::Absent);
        assert_eq!(absent.precondition(), WritePrecondition::DoesNotExist);

        store
            .put("b", "des_file/final_output.csv", b"x".to_vec(), WritePrecondition::None)
            .unwrap();
        let present = SnapshotRef::observe(&store, "b", "des_file/final_output.csv");
        assert!(matches!(present.observed, ObservedVersion::Version(_)));
    }
}
