//! Polling stand-in for storage notifications.

use cdcflow_protocol::{JobConfig, ObjectCreatedEvent};
use cdcflow_store::{ObjectStore, StoreResult};
use std::collections::HashSet;
use tracing::debug;

use crate::event::encode_key;

/// Tracks which input objects have been seen and emits one notification for
/// each new object directly under the input prefix.
#[derive(Debug)]
pub struct InputWatcher {
    bucket: String,
    prefix: String,
    seen: HashSet<String>,
}

impl InputWatcher {
    pub fn new(bucket: impl Into<String>, config: &JobConfig) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: config.input_dir(),
            seen: HashSet::new(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Mark everything currently present as seen without emitting events.
    pub fn prime(&mut self, store: &dyn ObjectStore) -> StoreResult<usize> {
        let keys = self.list_inputs(store)?;
        let count = keys.len();
        self.seen.extend(keys);
        debug!(bucket = %self.bucket, objects = count, "primed input watcher");
        Ok(count)
    }

    /// Notifications for objects that appeared since the last poll, in key order.
    ///
    /// Keys no longer listed are forgotten, so an object removed and uploaded
    /// again under the same name is reported again.
    pub fn poll(&mut self, store: &dyn ObjectStore) -> StoreResult<Vec<ObjectCreatedEvent>> {
        let listed = self.list_inputs(store)?;
        let mut events = Vec::new();
        for key in &listed {
            if !self.seen.contains(key) {
                events.push(ObjectCreatedEvent::for_object(&self.bucket, encode_key(key)));
            }
        }
        self.seen = listed.into_iter().collect();
        Ok(events)
    }

    /// Number of keys currently tracked as seen.
    pub fn tracked(&self) -> usize {
        self.seen.len()
    }

    fn list_inputs(&self, store: &dyn ObjectStore) -> StoreResult<Vec<String>> {
        Ok(store
            .list(&self.bucket, &self.prefix)?
            .into_iter()
            .map(|meta| meta.key)
            .filter(|key| !key[self.prefix.len()..].contains('/'))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::decode_notification;
    use cdcflow_store::{MemoryStore, WritePrecondition};

    fn put(store: &MemoryStore, key: &str) {
        store
            .put("people", key, b"I,1,A,B\n".to_vec(), WritePrecondition::None)
            .unwrap();
    }

    #[test]
    fn test_emits_each_new_object_once() {
        let store = MemoryStore::new();
        let config = JobConfig::default();
        let mut watcher = InputWatcher::new("people", &config);

        put(&store, &config.input_key("old.csv"));
        assert_eq!(watcher.prime(&store).unwrap(), 1);
        assert!(watcher.poll(&store).unwrap().is_empty());

        put(&store, &config.input_key("new file+1.csv"));
        put(&store, &format!("{}nested/skip.csv", config.input_dir()));
        put(&store, "des_file/final_output.csv");

        let events = watcher.poll(&store).unwrap();
        assert_eq!(events.len(), 1);
        let location = decode_notification(&events[0]).unwrap();
        assert_eq!(location.bucket, "people");
        assert_eq!(location.file_name, "new file+1.csv");

        assert!(watcher.poll(&store).unwrap().is_empty());
    }

    #[test]
    fn test_forgets_removed_objects() {
        let store = MemoryStore::new();
        let config = JobConfig::default();
        let mut watcher = InputWatcher::new("people", &config);
        let key = config.input_key("a.csv");

        put(&store, &key);
        assert_eq!(watcher.poll(&store).unwrap().len(), 1);
        assert_eq!(watcher.tracked(), 1);

        store.delete("people", &key).unwrap();
        assert!(watcher.poll(&store).unwrap().is_empty());
        assert_eq!(watcher.tracked(), 0);

        put(&store, &key);
        assert_eq!(watcher.poll(&store).unwrap().len(), 1);
    }
}
