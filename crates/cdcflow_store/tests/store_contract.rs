//! Behaviour every `ObjectStore` backend must share.
//!
//! The merge job relies on these semantics: prefix listing in key order,
//! whole-object replacement on copy, idempotent deletes and
//! compare-and-swap on the destination of a copy.

use cdcflow_store::{LocalStore, MemoryStore, ObjectStore, WritePrecondition, WriteResult};
use tempfile::tempdir;

fn check_contract(store: &dyn ObjectStore) {
    let bucket = "people";

    // Absent objects
    assert!(store.head(bucket, "des_file/final_output.csv").unwrap().is_none());
    assert!(store.get(bucket, "des_file/final_output.csv").unwrap_err().is_not_found());
    assert!(store.list(bucket, "des_file/").unwrap().is_empty());

    // Writes and prefix listing
    for key in [
        "des_file/temp_output_1/part-00000-a-c000.csv",
        "des_file/temp_output_1/_SUCCESS",
        "des_file/temp_output_10/part-00000-b-c000.csv",
        "intermediate_data/in.csv",
    ] {
        let written = store
            .put(bucket, key, key.as_bytes().to_vec(), WritePrecondition::None)
            .unwrap();
        assert!(written.is_success());
    }
    let listed: Vec<String> = store
        .list(bucket, "des_file/temp_output_1/")
        .unwrap()
        .into_iter()
        .map(|m| m.key)
        .collect();
    assert_eq!(
        listed,
        vec![
            "des_file/temp_output_1/_SUCCESS",
            "des_file/temp_output_1/part-00000-a-c000.csv",
        ]
    );

    // Copy creates, then replaces only under a matching version
    let part = "des_file/temp_output_1/part-00000-a-c000.csv";
    let canonical = "des_file/final_output.csv";
    let created = store
        .copy(bucket, part, canonical, WritePrecondition::DoesNotExist)
        .unwrap();
    let WriteResult::Success { version } = created else {
        panic!("copy onto absent key should succeed: {:?}", created);
    };
    assert_eq!(store.get(bucket, canonical).unwrap(), part.as_bytes());
    assert_eq!(store.head(bucket, canonical).unwrap().unwrap().version, Some(version.clone()));

    let other = "des_file/temp_output_10/part-00000-b-c000.csv";
    let conflict = store
        .copy(
            bucket,
            other,
            canonical,
            WritePrecondition::MatchesVersion("not-the-version".to_string()),
        )
        .unwrap();
    assert!(matches!(conflict, WriteResult::PreconditionFailed { current_version: Some(_) }));
    assert_eq!(store.get(bucket, canonical).unwrap(), part.as_bytes());

    let replaced = store
        .copy(bucket, other, canonical, WritePrecondition::MatchesVersion(version))
        .unwrap();
    assert!(replaced.is_success());
    assert_eq!(store.get(bucket, canonical).unwrap(), other.as_bytes());

    // Batch delete of a prefix, twice
    let temp_keys: Vec<String> = store
        .list(bucket, "des_file/temp_output_1/")
        .unwrap()
        .into_iter()
        .map(|m| m.key)
        .collect();
    assert!(store.delete_many(bucket, &temp_keys).is_complete());
    assert!(store.delete_many(bucket, &temp_keys).is_complete());
    assert!(store.list(bucket, "des_file/temp_output_1/").unwrap().is_empty());
    assert!(store.head(bucket, canonical).unwrap().is_some());
}

#[test]
fn test_memory_store_contract() {
    check_contract(&MemoryStore::new());
}

#[test]
fn test_local_store_contract() {
    let dir = tempdir().unwrap();
    check_contract(&LocalStore::new(dir.path()).unwrap());
}
