//! The merge job: classify, merge, stage, promote, clean up.

use arrow::array::RecordBatch;
use cdcflow_protocol::defaults::TEMP_TIMESTAMP_FORMAT;
use cdcflow_protocol::{BatchKind, JobArguments, JobConfig, JobRunId, MergeCounts};
use cdcflow_sinks::{CleanupOutcome, ObservedVersion, SnapshotRef, StagedSnapshotSink};
use cdcflow_store::{validate_bucket, ObjectStore};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, info_span, warn};

use crate::batch::{classify_batch, empty_snapshot, read_snapshot, InputBatch};
use crate::error::MergeError;
use crate::merge::merge_cdc;

/// Summary of a committed run.
#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub run_id: JobRunId,
    pub bucket: String,
    pub file_name: String,
    pub input_key: String,
    pub batch_kind: BatchKind,
    pub counts: MergeCounts,
    pub temp_prefix: String,
    pub part_key: String,
    pub canonical_key: String,
    pub canonical_version: String,
    pub cleanup: CleanupOutcome,
}

/// One dataset's merge job, bound to a store and layout.
pub struct MergeJob<'a> {
    store: &'a dyn ObjectStore,
    config: &'a JobConfig,
}

impl<'a> MergeJob<'a> {
    pub fn new(store: &'a dyn ObjectStore, config: &'a JobConfig) -> Self {
        Self { store, config }
    }

    pub fn run(&self, args: &JobArguments) -> Result<MergeReport, MergeError> {
        self.run_as(args, JobRunId::new())
    }

    /// Run under a run id assigned by the caller (the dispatcher).
    pub fn run_as(&self, args: &JobArguments, run_id: JobRunId) -> Result<MergeReport, MergeError> {
        let span = info_span!(
            "merge_job",
            run_id = %run_id,
            bucket = %args.dst_bucket_name,
            file = %args.file_name
        );
        let _enter = span.enter();

        validate_arguments(args)?;
        let bucket = args.dst_bucket_name.as_str();
        let input_key = self.config.input_key(&args.file_name);

        // Step A: classify
        let data = self.store.get(bucket, &input_key).map_err(|err| {
            if err.is_not_found() {
                MergeError::InputNotFound {
                    bucket: bucket.to_string(),
                    key: input_key.clone(),
                }
            } else {
                MergeError::Store(err)
            }
        })?;
        let input = classify_batch(&data)?;
        info!(
            key = %input_key,
            kind = %input.kind(),
            rows = input.num_rows(),
            "classified input"
        );

        // Step B: compute the new snapshot
        let canonical = SnapshotRef::observe(self.store, bucket, &self.config.canonical_key());
        let batch_kind = input.kind();
        let (snapshot, counts) = match input {
            InputBatch::Snapshot(batch) => {
                let snapshot = batch.into_inner();
                let counts = MergeCounts {
                    output_rows: snapshot.num_rows() as u64,
                    ..MergeCounts::default()
                };
                (snapshot, counts)
            }
            InputBatch::Cdc(changes) => {
                let prior = self.load_prior(&canonical);
                let outcome = merge_cdc(&prior, &changes, self.config.duplicate_keys)?;
                (outcome.snapshot, outcome.counts)
            }
        };
        info!(
            prior = counts.prior_rows,
            inserts = counts.inserts,
            updates = counts.updates,
            deletes = counts.deletes,
            skipped = counts.skipped_ops,
            output = counts.output_rows,
            "computed snapshot"
        );

        // Step C: write to a fresh temp prefix
        let timestamp = Utc::now().format(TEMP_TIMESTAMP_FORMAT).to_string();
        let temp_prefix = self.config.temp_prefix(&timestamp, &run_id.short());
        let sink = StagedSnapshotSink::new(self.store, canonical, temp_prefix.clone(), run_id.clone());
        if let Err(err) = sink.stage(&snapshot) {
            warn!(prefix = %temp_prefix, error = %err, "staging failed, canonical snapshot unchanged");
            sink.cleanup();
            return Err(MergeError::from_promotion(err, &temp_prefix));
        }

        // Step D: promote
        let promotion = match sink.promote() {
            Ok(promotion) => promotion,
            Err(err) => {
                warn!(prefix = %temp_prefix, error = %err, "promotion failed, canonical snapshot unchanged");
                sink.cleanup();
                return Err(MergeError::from_promotion(err, &temp_prefix));
            }
        };

        // Step E: cleanup never fails the run
        let cleanup = sink.cleanup();

        // Step F: commit
        info!(
            canonical = %promotion.canonical_key,
            version = %promotion.version,
            rows = counts.output_rows,
            "merge job committed"
        );
        Ok(MergeReport {
            run_id,
            bucket: bucket.to_string(),
            file_name: args.file_name.clone(),
            input_key,
            batch_kind,
            counts,
            temp_prefix,
            part_key: promotion.part_key,
            canonical_key: promotion.canonical_key,
            canonical_version: promotion.version,
            cleanup,
        })
    }

    /// Read the canonical snapshot; anything unreadable counts as a first run.
    fn load_prior(&self, canonical: &SnapshotRef) -> RecordBatch {
        if canonical.observed == ObservedVersion::Absent {
            info!(key = %canonical.key, "no canonical snapshot, treating as first run");
            return empty_snapshot();
        }
        let data = match self.store.get(&canonical.bucket, &canonical.key) {
            Ok(data) => data,
            Err(err) if err.is_not_found() => {
                info!(key = %canonical.key, "no canonical snapshot, treating as first run");
                return empty_snapshot();
            }
            Err(err) => {
                warn!(key = %canonical.key, error = %err, "failed to read canonical snapshot, treating as first run");
                return empty_snapshot();
            }
        };
        match read_snapshot(&data) {
            Ok(batch) => batch,
            Err(err) => {
                warn!(key = %canonical.key, error = %err, "failed to parse canonical snapshot, treating as first run");
                empty_snapshot()
            }
        }
    }
}

fn validate_arguments(args: &JobArguments) -> Result<(), MergeError> {
    validate_bucket(&args.dst_bucket_name)
        .map_err(|err| MergeError::InvalidArguments(err.to_string()))?;
    let file = args.file_name.as_str();
    if file.is_empty() {
        return Err(MergeError::InvalidArguments("file_name is empty".to_string()));
    }
    if file.contains('/') {
        return Err(MergeError::InvalidArguments(format!(
            "file_name '{}' must not contain '/'",
            file
        )));
    }
    Ok(())
}
