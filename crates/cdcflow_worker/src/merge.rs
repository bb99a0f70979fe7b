//! CDC merge: apply one batch of Insert/Update/Delete rows to a snapshot.
//!
//! The merge is a pair of anti-joins on `PersonID` followed by a union:
//!
//! ```text
//! retained = prior - keys(Deletes) - keys(Inserts ∪ Updates)
//! snapshot = retained ∪ Inserts ∪ Updates
//! ```
//!
//! Before the joins the change rows are normalised:
//! - a key with a Delete in the batch drops every Insert/Update for that key
//! - repeated keys among Inserts/Updates follow `DuplicateKeyPolicy`
//!
//! Null keys never match in either join, so rows with a null `PersonID`
//! always survive.

use arrow::array::{Array, AsArray, BooleanArray, Int32Array, RecordBatch};
use arrow::compute::{concat_batches, filter_record_batch};
use arrow::datatypes::Int32Type;
use cdcflow_protocol::{DuplicateKeyPolicy, MergeCounts, Op};
use cdcflow_sinks::snapshot_schema;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::batch::CdcBatch;
use crate::error::MergeError;

/// New snapshot plus the counts observed while computing it.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub snapshot: RecordBatch,
    pub counts: MergeCounts,
}

/// Apply `changes` to `prior` and return the new snapshot.
///
/// Output order is retained prior rows, then Inserts, then Updates, each in
/// input order.
pub fn merge_cdc(
    prior: &RecordBatch,
    changes: &CdcBatch,
    policy: DuplicateKeyPolicy,
) -> Result<MergeOutcome, MergeError> {
    let prior_ids = key_column(prior)?;
    let ops = changes.ops();
    let ids = changes.person_ids();

    let mut counts = MergeCounts {
        prior_rows: prior.num_rows() as u64,
        ..MergeCounts::default()
    };

    // Partition by Op
    let mut delete_keys = HashSet::new();
    let mut upserts: Vec<(usize, Op)> = Vec::new();
    for row in 0..changes.num_rows() {
        let op = if ops.is_null(row) {
            None
        } else {
            Op::from_code(ops.value(row))
        };
        match op {
            Some(Op::Delete) => {
                counts.deletes += 1;
                if let Some(id) = key_at(ids, row) {
                    delete_keys.insert(id);
                }
            }
            Some(op) => upserts.push((row, op)),
            None => counts.skipped_ops += 1,
        }
    }
    if counts.skipped_ops > 0 {
        warn!(
            skipped = counts.skipped_ops,
            "skipping change rows with unknown Op"
        );
    }

    // Delete wins over Insert/Update of the same key
    let before = upserts.len();
    upserts.retain(|(row, _)| key_at(ids, *row).map_or(true, |id| !delete_keys.contains(&id)));
    if upserts.len() < before {
        debug!(
            dropped = before - upserts.len(),
            "dropped Insert/Update rows superseded by a Delete"
        );
    }

    let upserts = dedup_keys(upserts, ids, policy)?;

    // Anti-join on Delete keys, then on the keys being replaced
    let after_deletes = anti_join(prior, &prior_ids, &delete_keys)?;
    let replace_keys: HashSet<i32> = upserts
        .iter()
        .filter_map(|(row, _)| key_at(ids, *row))
        .collect();

    let retained_ids = key_column(&after_deletes)?;
    if policy == DuplicateKeyPolicy::Reject {
        let existing: HashSet<i32> = (0..retained_ids.len())
            .filter_map(|i| key_at(&retained_ids, i))
            .collect();
        let clash = upserts
            .iter()
            .filter(|(_, op)| *op == Op::Insert)
            .filter_map(|(row, _)| key_at(ids, *row))
            .find(|id| existing.contains(id));
        if let Some(person_id) = clash {
            return Err(MergeError::DuplicateKey { person_id });
        }
    }

    let retained = anti_join(&after_deletes, &retained_ids, &replace_keys)?;

    let records = changes.records()?;
    let inserts = select_rows(&records, &upserts, Op::Insert)?;
    let updates = select_rows(&records, &upserts, Op::Update)?;
    counts.inserts = inserts.num_rows() as u64;
    counts.updates = updates.num_rows() as u64;

    let snapshot = concat_batches(&snapshot_schema(), [&retained, &inserts, &updates])?;
    counts.output_rows = snapshot.num_rows() as u64;

    debug!(
        prior = counts.prior_rows,
        retained = retained.num_rows(),
        inserts = counts.inserts,
        updates = counts.updates,
        deletes = counts.deletes,
        "merged change batch"
    );
    Ok(MergeOutcome { snapshot, counts })
}

/// Keep one Insert/Update row per key.
///
/// `LastWins` keeps the last row in file order; `Reject` fails on the first
/// repeated key. Rows with a null key are never deduplicated.
fn dedup_keys(
    upserts: Vec<(usize, Op)>,
    ids: &Int32Array,
    policy: DuplicateKeyPolicy,
) -> Result<Vec<(usize, Op)>, MergeError> {
    let mut last_row: HashMap<i32, usize> = HashMap::new();
    for (row, _) in &upserts {
        if let Some(id) = key_at(ids, *row) {
            if last_row.insert(id, *row).is_some() && policy == DuplicateKeyPolicy::Reject {
                return Err(MergeError::DuplicateKey { person_id: id });
            }
        }
    }

    let before = upserts.len();
    let kept: Vec<(usize, Op)> = upserts
        .into_iter()
        .filter(|(row, _)| key_at(ids, *row).map_or(true, |id| last_row.get(&id) == Some(row)))
        .collect();
    if kept.len() < before {
        debug!(
            superseded = before - kept.len(),
            "kept last change row for repeated keys"
        );
    }
    Ok(kept)
}

/// Rows of `batch` whose key is null or absent from `keys`.
fn anti_join(
    batch: &RecordBatch,
    batch_ids: &Int32Array,
    keys: &HashSet<i32>,
) -> Result<RecordBatch, MergeError> {
    if keys.is_empty() {
        return Ok(batch.clone());
    }
    let mask: BooleanArray = (0..batch.num_rows())
        .map(|row| Some(key_at(batch_ids, row).map_or(true, |id| !keys.contains(&id))))
        .collect();
    Ok(filter_record_batch(batch, &mask)?)
}

fn select_rows(
    records: &RecordBatch,
    upserts: &[(usize, Op)],
    op: Op,
) -> Result<RecordBatch, MergeError> {
    let selected: HashSet<usize> = upserts
        .iter()
        .filter(|(_, row_op)| *row_op == op)
        .map(|(row, _)| *row)
        .collect();
    let mask: BooleanArray = (0..records.num_rows())
        .map(|row| Some(selected.contains(&row)))
        .collect();
    Ok(filter_record_batch(records, &mask)?)
}

fn key_column(batch: &RecordBatch) -> Result<Int32Array, MergeError> {
    batch
        .columns()
        .first()
        .and_then(|col| col.as_primitive_opt::<Int32Type>())
        .cloned()
        .ok_or_else(|| MergeError::CorruptSnapshot("PersonID column is not Int32".to_string()))
}

fn key_at(ids: &Int32Array, row: usize) -> Option<i32> {
    if ids.is_null(row) {
        None
    } else {
        Some(ids.value(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{classify_batch, read_snapshot, InputBatch};
    use arrow::array::StringArray;

    type Row = (Option<i32>, Option<String>, Option<String>);

    fn cdc(data: &str) -> CdcBatch {
        match classify_batch(data.as_bytes()).unwrap() {
            InputBatch::Cdc(batch) => batch,
            other => panic!("expected cdc batch, got {:?}", other.kind()),
        }
    }

    fn prior(data: &str) -> RecordBatch {
        read_snapshot(format!("PersonID,FullName,City\n{}", data).as_bytes()).unwrap()
    }

    fn rows(batch: &RecordBatch) -> Vec<Row> {
        let ids = batch.column(0).as_primitive::<Int32Type>();
        let names: &StringArray = batch.column(1).as_string::<i32>();
        let cities: &StringArray = batch.column(2).as_string::<i32>();
        (0..batch.num_rows())
            .map(|i| {
                (
                    key_at(ids, i),
                    names.is_valid(i).then(|| names.value(i).to_string()),
                    cities.is_valid(i).then(|| cities.value(i).to_string()),
                )
            })
            .collect()
    }

    fn row(id: i32, name: &str, city: &str) -> Row {
        (Some(id), Some(name.to_string()), Some(city.to_string()))
    }

    #[test]
    fn test_insert_and_delete() {
        let out = merge_cdc(
            &prior("1,Alice,NYC\n2,Bob,LA\n"),
            &cdc("I,3,Carl,SF\nD,2,,\n"),
            DuplicateKeyPolicy::LastWins,
        )
        .unwrap();
        assert_eq!(
            rows(&out.snapshot),
            vec![row(1, "Alice", "NYC"), row(3, "Carl", "SF")]
        );
        assert_eq!(
            out.counts,
            MergeCounts {
                prior_rows: 2,
                inserts: 1,
                updates: 0,
                deletes: 1,
                skipped_ops: 0,
                output_rows: 2,
            }
        );
    }

    #[test]
    fn test_update_replaces_prior_row() {
        let out = merge_cdc(
            &prior("1,Alice,NYC\n2,Bob,LA\n"),
            &cdc("U,1,Alice,Boston\n"),
            DuplicateKeyPolicy::LastWins,
        )
        .unwrap();
        assert_eq!(
            rows(&out.snapshot),
            vec![row(2, "Bob", "LA"), row(1, "Alice", "Boston")]
        );
    }

    #[test]
    fn test_update_of_unknown_key_is_added() {
        let out = merge_cdc(
            &prior("1,Alice,NYC\n"),
            &cdc("U,5,Eve,Paris\n"),
            DuplicateKeyPolicy::LastWins,
        )
        .unwrap();
        assert_eq!(out.counts.output_rows, 2);
    }

    #[test]
    fn test_delete_wins_over_update_in_same_batch() {
        for batch in ["U,2,Bob,SF\nD,2,,\n", "D,2,,\nU,2,Bob,SF\n", "D,2,,\nI,2,Bob,SF\n"] {
            let out = merge_cdc(
                &prior("1,Alice,NYC\n2,Bob,LA\n"),
                &cdc(batch),
                DuplicateKeyPolicy::LastWins,
            )
            .unwrap();
            assert_eq!(rows(&out.snapshot), vec![row(1, "Alice", "NYC")], "batch {:?}", batch);
        }
    }

    #[test]
    fn test_repeated_keys_last_wins() {
        let out = merge_cdc(
            &prior(""),
            &cdc("I,1,Alice,NYC\nU,1,Alice,LA\nU,1,Alice,SF\n"),
            DuplicateKeyPolicy::LastWins,
        )
        .unwrap();
        assert_eq!(rows(&out.snapshot), vec![row(1, "Alice", "SF")]);
        assert_eq!(out.counts.inserts, 0);
        assert_eq!(out.counts.updates, 1);
    }

    #[test]
    fn test_insert_of_existing_key_replaces_under_last_wins() {
        let out = merge_cdc(
            &prior("1,Alice,NYC\n"),
            &cdc("I,1,Alicia,NYC\n"),
            DuplicateKeyPolicy::LastWins,
        )
        .unwrap();
        assert_eq!(rows(&out.snapshot), vec![row(1, "Alicia", "NYC")]);
    }

    #[test]
    fn test_reject_policy() {
        let repeated = merge_cdc(
            &prior(""),
            &cdc("I,4,Dan,NYC\nU,4,Dan,LA\n"),
            DuplicateKeyPolicy::Reject,
        );
        assert!(matches!(repeated, Err(MergeError::DuplicateKey { person_id: 4 })));

        let existing = merge_cdc(
            &prior("1,Alice,NYC\n"),
            &cdc("I,1,Alicia,NYC\n"),
            DuplicateKeyPolicy::Reject,
        );
        assert!(matches!(existing, Err(MergeError::DuplicateKey { person_id: 1 })));

        // Re-inserting a key deleted in the same batch is dropped, not a duplicate
        let deleted = merge_cdc(
            &prior("1,Alice,NYC\n"),
            &cdc("D,1,,\nI,1,Alicia,NYC\n"),
            DuplicateKeyPolicy::Reject,
        )
        .unwrap();
        assert_eq!(deleted.counts.output_rows, 0);

        // Updates of existing keys are not duplicates
        let updated = merge_cdc(
            &prior("1,Alice,NYC\n"),
            &cdc("U,1,Alice,LA\n"),
            DuplicateKeyPolicy::Reject,
        )
        .unwrap();
        assert_eq!(rows(&updated.snapshot), vec![row(1, "Alice", "LA")]);
    }

    #[test]
    fn test_unknown_ops_are_skipped() {
        let out = merge_cdc(
            &prior("1,Alice,NYC\n"),
            &cdc("X,1,,\n,2,Bob,LA\nI,3,Carl,SF\n"),
            DuplicateKeyPolicy::LastWins,
        )
        .unwrap();
        assert_eq!(out.counts.skipped_ops, 2);
        assert_eq!(
            rows(&out.snapshot),
            vec![row(1, "Alice", "NYC"), row(3, "Carl", "SF")]
        );
    }

    #[test]
    fn test_null_keys_never_match() {
        let out = merge_cdc(
            &prior("abc,Ghost,Nowhere\n1,Alice,NYC\n"),
            &cdc("D,xyz,,\nI,,Anon,LA\nI,,Anon,LA\n"),
            DuplicateKeyPolicy::Reject,
        )
        .unwrap();
        assert_eq!(out.counts.output_rows, 4);
        assert_eq!(
            rows(&out.snapshot)
                .iter()
                .filter(|(id, _, _)| id.is_none())
                .count(),
            3
        );
    }

    #[test]
    fn test_first_run_against_empty_prior() {
        let out = merge_cdc(
            &crate::batch::empty_snapshot(),
            &cdc("I,1,Alice,NYC\nU,2,Bob,LA\nD,9,,\n"),
            DuplicateKeyPolicy::LastWins,
        )
        .unwrap();
        assert_eq!(
            rows(&out.snapshot),
            vec![row(1, "Alice", "NYC"), row(2, "Bob", "LA")]
        );
        assert_eq!(out.counts.deletes, 1);
    }
}
