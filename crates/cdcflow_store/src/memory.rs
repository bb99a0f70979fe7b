use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::{
    precondition_holds, validate_bucket, validate_key, ObjectMeta, ObjectStore, StoreError,
    StoreResult, WritePrecondition, WriteResult,
};

/// In-memory object store.
///
/// Versions are drawn from a store-wide generation counter, so a key that is
/// deleted and recreated never reuses an earlier version token.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    buckets: HashMap<String, BTreeMap<String, StoredObject>>,
    generation: u64,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    generation: u64,
    last_modified: DateTime<Utc>,
}

impl StoredObject {
    fn meta(&self, key: &str) -> ObjectMeta {
        ObjectMeta {
            key: key.to_string(),
            size: self.data.len() as u64,
            version: Some(self.generation.to_string()),
            last_modified: Some(self.last_modified),
        }
    }
}

fn poisoned() -> StoreError {
    StoreError::Internal("memory store lock poisoned".to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every key in a bucket, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.state
            .read()
            .map(|state| {
                state
                    .buckets
                    .get(bucket)
                    .map(|objects| objects.keys().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

impl ObjectStore for MemoryStore {
    fn get(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        let state = self.state.read().map_err(|_| poisoned())?;
        state
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|obj| obj.data.clone())
            .ok_or_else(|| StoreError::not_found(bucket, key))
    }

    fn head(&self, bucket: &str, key: &str) -> StoreResult<Option<ObjectMeta>> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|obj| obj.meta(key)))
    }

    fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        precondition: WritePrecondition,
    ) -> StoreResult<WriteResult> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        let mut state = self.state.write().map_err(|_| poisoned())?;

        let current = state
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|obj| obj.generation.to_string());
        if !precondition_holds(&precondition, current.as_deref()) {
            return Ok(WriteResult::PreconditionFailed {
                current_version: current,
            });
        }

        state.generation += 1;
        let generation = state.generation;
        state.buckets.entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            StoredObject {
                data,
                generation,
                last_modified: Utc::now(),
            },
        );

        Ok(WriteResult::Success {
            version: generation.to_string(),
        })
    }

    fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<ObjectMeta>> {
        validate_bucket(bucket)?;
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state
            .buckets
            .get(bucket)
            .map(|objects| {
                objects
                    .range(prefix.to_string()..)
                    .take_while(|(key, _)| key.starts_with(prefix))
                    .map(|(key, obj)| obj.meta(key))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn delete(&self, bucket: &str, key: &str) -> StoreResult<()> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        let mut state = self.state.write().map_err(|_| poisoned())?;
        if let Some(objects) = state.buckets.get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(store: &MemoryStore, key: &str, data: &str) -> String {
        match store
            .put("b", key, data.as_bytes().to_vec(), WritePrecondition::None)
            .unwrap()
        {
            WriteResult::Success { version } => version,
            other => panic!("unexpected write result: {:?}", other),
        }
    }

    #[test]
    fn test_roundtrip_and_head() {
        let store = MemoryStore::new();
        put(&store, "dir/a.csv", "hello");

        assert_eq!(store.get("b", "dir/a.csv").unwrap(), b"hello");
        let meta = store.head("b", "dir/a.csv").unwrap().unwrap();
        assert_eq!(meta.size, 5);
        assert!(store.head("b", "dir/missing.csv").unwrap().is_none());
        assert!(store.get("b", "dir/missing.csv").unwrap_err().is_not_found());
        assert!(store.get("other", "dir/a.csv").unwrap_err().is_not_found());
    }

    #[test]
    fn test_list_is_prefix_scoped_and_sorted() {
        let store = MemoryStore::new();
        put(&store, "tmp/run1/part-00000.csv", "x");
        put(&store, "tmp/run1/_SUCCESS", "");
        put(&store, "tmp/run10/part-00000.csv", "y");
        put(&store, "final.csv", "z");

        let keys: Vec<String> = store
            .list("b", "tmp/run1/")
            .unwrap()
            .into_iter()
            .map(|m| m.key)
            .collect();
        assert_eq!(keys, vec!["tmp/run1/_SUCCESS", "tmp/run1/part-00000.csv"]);
        assert!(store.list("b", "nothing/").unwrap().is_empty());
        assert!(store.list("empty-bucket", "").unwrap().is_empty());
    }

    #[test]
    fn test_versions_never_repeat() {
        let store = MemoryStore::new();
        let v1 = put(&store, "k", "1");
        store.delete("b", "k").unwrap();
        let v2 = put(&store, "k", "2");
        assert_ne!(v1, v2);

        let stale = store
            .put("b", "k", b"3".to_vec(), WritePrecondition::MatchesVersion(v1))
            .unwrap();
        assert_eq!(
            stale,
            WriteResult::PreconditionFailed {
                current_version: Some(v2.clone())
            }
        );
        assert_eq!(store.get("b", "k").unwrap(), b"2");
    }

    #[test]
    fn test_copy_with_precondition() {
        let store = MemoryStore::new();
        put(&store, "src", "new");

        let created = store
            .copy("b", "src", "dst", WritePrecondition::DoesNotExist)
            .unwrap();
        assert!(created.is_success());
        let again = store
            .copy("b", "src", "dst", WritePrecondition::DoesNotExist)
            .unwrap();
        assert!(!again.is_success());

        let missing = store.copy("b", "nope", "dst", WritePrecondition::None);
        assert!(missing.unwrap_err().is_not_found());
    }

    #[test]
    fn test_delete_many_is_idempotent() {
        let store = MemoryStore::new();
        put(&store, "t/a", "1");
        put(&store, "t/b", "2");
        let report = store.delete_many("b", &["t/a".to_string(), "t/zzz".to_string()]);
        assert!(report.is_complete());
        assert_eq!(report.deleted.len(), 2);
        assert_eq!(store.keys("b"), vec!["t/b".to_string()]);
    }
}
