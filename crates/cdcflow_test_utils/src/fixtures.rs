//! CSV fixtures and snapshot readback.
//!
//! Rows are compared as sorted `PersonRow` tuples so assertions do not depend
//! on output order.

use arrow::array::{Array, AsArray, RecordBatch};
use arrow::datatypes::Int32Type;
use cdcflow_store::{ObjectStore, WritePrecondition};

/// `(PersonID, FullName, City)` with nulls as `None`.
pub type PersonRow = (Option<i32>, Option<String>, Option<String>);

pub fn person(id: i32, name: &str, city: &str) -> PersonRow {
    (Some(id), Some(name.to_string()), Some(city.to_string()))
}

/// Headerless CDC input, one `(op, id, name, city)` per line.
pub fn cdc_csv(rows: &[(&str, i32, &str, &str)]) -> String {
    rows.iter()
        .map(|(op, id, name, city)| format!("{},{},{},{}\n", op, id, name, city))
        .collect()
}

/// Headerless snapshot input.
pub fn snapshot_csv(rows: &[(i32, &str, &str)]) -> String {
    rows.iter()
        .map(|(id, name, city)| format!("{},{},{}\n", id, name, city))
        .collect()
}

/// A canonical snapshot object, with header.
pub fn canonical_csv(rows: &[(i32, &str, &str)]) -> String {
    format!("PersonID,FullName,City\n{}", snapshot_csv(rows))
}

pub fn seed(store: &dyn ObjectStore, bucket: &str, key: &str, data: &str) {
    let written = store
        .put(bucket, key, data.as_bytes().to_vec(), WritePrecondition::None)
        .unwrap_or_else(|e| panic!("failed to seed {}/{}: {}", bucket, key, e));
    assert!(written.is_success(), "seed write to {}/{} rejected", bucket, key);
}

/// Parse a canonical object back into sorted rows.
pub fn canonical_rows(store: &dyn ObjectStore, bucket: &str, key: &str) -> Vec<PersonRow> {
    let data = store
        .get(bucket, key)
        .unwrap_or_else(|e| panic!("failed to read {}/{}: {}", bucket, key, e));
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(data.as_slice());
    let headers = reader.headers().expect("header row").clone();
    assert_eq!(
        headers.iter().collect::<Vec<_>>(),
        vec!["PersonID", "FullName", "City"],
        "canonical header"
    );

    let field = |s: &str| (!s.is_empty()).then(|| s.to_string());
    let mut rows: Vec<PersonRow> = reader
        .records()
        .map(|record| {
            let record = record.expect("csv record");
            (
                record.get(0).and_then(|s| s.parse().ok()),
                record.get(1).and_then(field),
                record.get(2).and_then(field),
            )
        })
        .collect();
    rows.sort();
    rows
}

/// Sorted rows of a snapshot-shaped batch.
pub fn snapshot_rows(batch: &RecordBatch) -> Vec<PersonRow> {
    let ids = batch.column(0).as_primitive::<Int32Type>();
    let names = batch.column(1).as_string::<i32>();
    let cities = batch.column(2).as_string::<i32>();
    let mut rows: Vec<PersonRow> = (0..batch.num_rows())
        .map(|i| {
            (
                ids.is_valid(i).then(|| ids.value(i)),
                names.is_valid(i).then(|| names.value(i).to_string()),
                cities.is_valid(i).then(|| cities.value(i).to_string()),
            )
        })
        .collect();
    rows.sort();
    rows
}
