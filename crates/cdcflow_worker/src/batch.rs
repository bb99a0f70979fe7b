//! Input classification and CSV decoding into Arrow batches.
//!
//! Uploaded objects carry no header: the field count of the first record
//! decides whether the object is a CDC batch (Op, PersonID, FullName, City)
//! or a full snapshot (PersonID, FullName, City). Parsing is permissive:
//! short rows are padded with nulls, long rows are truncated, empty fields
//! are null and a PersonID that does not parse as a 32-bit integer is null.

use arrow::array::{
    ArrayRef, AsArray, Int32Array, Int32Builder, RecordBatch, StringArray, StringBuilder,
};
use arrow::datatypes::{DataType, Field, Int32Type, Schema, SchemaRef};
use cdcflow_protocol::{BatchKind, CDC_COLUMNS, SNAPSHOT_COLUMNS};
use cdcflow_sinks::snapshot_schema;
use csv::{ReaderBuilder, StringRecord};
use std::sync::Arc;

use crate::error::MergeError;

/// Arrow schema of a CDC batch: `Op: Utf8, PersonID: Int32, FullName: Utf8, City: Utf8`.
pub fn cdc_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(CDC_COLUMNS[0], DataType::Utf8, true),
        Field::new(CDC_COLUMNS[1], DataType::Int32, true),
        Field::new(CDC_COLUMNS[2], DataType::Utf8, true),
        Field::new(CDC_COLUMNS[3], DataType::Utf8, true),
    ]))
}

/// Rows of a 4-column input, bound positionally to `CDC_COLUMNS`.
#[derive(Debug, Clone)]
pub struct CdcBatch {
    batch: RecordBatch,
}

impl CdcBatch {
    pub fn try_new(batch: RecordBatch) -> Result<Self, MergeError> {
        if batch.schema() != cdc_schema() {
            return Err(MergeError::UnexpectedSchema {
                columns: batch.num_columns(),
            });
        }
        Ok(Self { batch })
    }

    pub fn record_batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Raw Op codes; validated during the merge, not here.
    pub fn ops(&self) -> &StringArray {
        self.batch.column(0).as_string::<i32>()
    }

    pub fn person_ids(&self) -> &Int32Array {
        self.batch.column(1).as_primitive::<Int32Type>()
    }

    /// The PersonID, FullName and City columns as a snapshot-shaped batch.
    pub fn records(&self) -> Result<RecordBatch, MergeError> {
        Ok(RecordBatch::try_new(
            snapshot_schema(),
            self.batch.columns()[1..].to_vec(),
        )?)
    }
}

/// Rows of a 3-column input, bound positionally to `SNAPSHOT_COLUMNS`.
#[derive(Debug, Clone)]
pub struct SnapshotBatch {
    batch: RecordBatch,
}

impl SnapshotBatch {
    pub fn try_new(batch: RecordBatch) -> Result<Self, MergeError> {
        if batch.schema() != snapshot_schema() {
            return Err(MergeError::UnexpectedSchema {
                columns: batch.num_columns(),
            });
        }
        Ok(Self { batch })
    }

    pub fn record_batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn into_inner(self) -> RecordBatch {
        self.batch
    }
}

/// A classified input object.
#[derive(Debug, Clone)]
pub enum InputBatch {
    Cdc(CdcBatch),
    Snapshot(SnapshotBatch),
}

impl InputBatch {
    pub fn kind(&self) -> BatchKind {
        match self {
            InputBatch::Cdc(_) => BatchKind::Cdc,
            InputBatch::Snapshot(_) => BatchKind::Snapshot,
        }
    }

    pub fn num_rows(&self) -> usize {
        match self {
            InputBatch::Cdc(batch) => batch.num_rows(),
            InputBatch::Snapshot(batch) => batch.num_rows(),
        }
    }
}

/// Parse a headerless input object and decide its shape.
///
/// An empty object has zero columns and is rejected like any other
/// unexpected width.
pub fn classify_batch(data: &[u8]) -> Result<InputBatch, MergeError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(data);
    let mut records = reader.records();

    let first = match records.next() {
        Some(record) => record?,
        None => return Err(MergeError::UnexpectedSchema { columns: 0 }),
    };
    let kind = BatchKind::from_column_count(first.len())
        .ok_or(MergeError::UnexpectedSchema {
            columns: first.len(),
        })?;

    let mut rows = RowsBuilder::new(kind);
    rows.push(&first);
    for record in records {
        rows.push(&record?);
    }

    match kind {
        BatchKind::Cdc => Ok(InputBatch::Cdc(CdcBatch::try_new(
            RecordBatch::try_new(cdc_schema(), rows.finish())?,
        )?)),
        BatchKind::Snapshot => Ok(InputBatch::Snapshot(SnapshotBatch::try_new(
            RecordBatch::try_new(snapshot_schema(), rows.finish())?,
        )?)),
    }
}

/// Parse a canonical snapshot object (headered CSV).
///
/// Columns are located by header name, so extra columns or a different
/// column order are tolerated. A missing header or a missing column is a
/// `CorruptSnapshot`.
pub fn read_snapshot(data: &[u8]) -> Result<RecordBatch, MergeError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(data);

    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        return Err(MergeError::CorruptSnapshot("missing header row".to_string()));
    }
    let mut positions = [0usize; 3];
    for (slot, name) in positions.iter_mut().zip(SNAPSHOT_COLUMNS) {
        *slot = headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| {
                MergeError::CorruptSnapshot(format!("header has no {} column", name))
            })?;
    }

    let mut rows = RowsBuilder::new(BatchKind::Snapshot);
    for record in reader.records() {
        let record = record?;
        rows.push_fields(positions.map(|i| record.get(i)));
    }
    Ok(RecordBatch::try_new(snapshot_schema(), rows.finish())?)
}

/// An empty snapshot with the canonical schema.
pub fn empty_snapshot() -> RecordBatch {
    RecordBatch::new_empty(snapshot_schema())
}

fn person_id(field: Option<&str>) -> Option<i32> {
    field
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
}

fn text(field: Option<&str>) -> Option<&str> {
    field.filter(|s| !s.is_empty())
}

/// Column builders for either input shape.
struct RowsBuilder {
    op: Option<StringBuilder>,
    person_id: Int32Builder,
    full_name: StringBuilder,
    city: StringBuilder,
}

impl RowsBuilder {
    fn new(kind: BatchKind) -> Self {
        Self {
            op: match kind {
                BatchKind::Cdc => Some(StringBuilder::new()),
                BatchKind::Snapshot => None,
            },
            person_id: Int32Builder::new(),
            full_name: StringBuilder::new(),
            city: StringBuilder::new(),
        }
    }

    /// Append a positional record; fields beyond the shape are ignored.
    fn push(&mut self, record: &StringRecord) {
        match self.op.as_mut() {
            Some(op) => {
                op.append_option(text(record.get(0)));
                self.push_fields([record.get(1), record.get(2), record.get(3)]);
            }
            None => self.push_fields([record.get(0), record.get(1), record.get(2)]),
        }
    }

    fn push_fields(&mut self, [id, name, city]: [Option<&str>; 3]) {
        self.person_id.append_option(person_id(id));
        self.full_name.append_option(text(name));
        self.city.append_option(text(city));
    }

    fn finish(mut self) -> Vec<ArrayRef> {
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(4);
        if let Some(mut op) = self.op.take() {
            columns.push(Arc::new(op.finish()));
        }
        columns.push(Arc::new(self.person_id.finish()));
        columns.push(Arc::new(self.full_name.finish()));
        columns.push(Arc::new(self.city.finish()));
        columns
    }
}
