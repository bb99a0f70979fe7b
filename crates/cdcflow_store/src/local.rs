use chrono::{DateTime, Utc};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::{
    content_version, precondition_holds, validate_bucket, validate_key, ObjectMeta, ObjectStore,
    StoreError, StoreResult, WritePrecondition, WriteResult,
};

const STAGING_DIR: &str = ".staging";

/// Filesystem-backed object store rooted at a directory.
///
/// Layout: `<root>/<bucket>/<key>`. Writes are staged under `<root>/.staging`
/// and renamed into place, so readers never observe a partially written
/// object. Conditional writes are serialised within this process only; the
/// version token is a content hash.
#[derive(Debug)]
pub struct LocalStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(STAGING_DIR))
            .map_err(|e| StoreError::io("", &root.display().to_string(), e))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> StoreResult<PathBuf> {
        validate_bucket(bucket)?;
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> StoreResult<PathBuf> {
        validate_key(key)?;
        let mut path = self.bucket_dir(bucket)?;
        path.extend(key.split('/'));
        Ok(path)
    }

    fn current_version(&self, bucket: &str, key: &str, path: &Path) -> StoreResult<Option<String>> {
        match fs::read(path) {
            Ok(data) => Ok(Some(content_version(&data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(bucket, key, e)),
        }
    }

    /// Remove now-empty directories between `path` and the bucket root.
    fn prune_empty_dirs(&self, bucket_dir: &Path, path: &Path) {
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == bucket_dir || !current.starts_with(bucket_dir) {
                break;
            }
            if fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}

fn modified_at(meta: &fs::Metadata) -> Option<DateTime<Utc>> {
    meta.modified().ok().map(DateTime::<Utc>::from)
}

impl ObjectStore for LocalStore {
    fn get(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        fs::read(&path).map_err(|e| StoreError::io(bucket, key, e))
    }

    fn head(&self, bucket: &str, key: &str) -> StoreResult<Option<ObjectMeta>> {
        let path = self.object_path(bucket, key)?;
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(bucket, key, e)),
        };
        let meta = fs::metadata(&path).map_err(|e| StoreError::io(bucket, key, e))?;
        Ok(Some(ObjectMeta {
            key: key.to_string(),
            size: data.len() as u64,
            version: Some(content_version(&data)),
            last_modified: modified_at(&meta),
        }))
    }

    fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        precondition: WritePrecondition,
    ) -> StoreResult<WriteResult> {
        let path = self.object_path(bucket, key)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StoreError::Internal("local store lock poisoned".to_string()))?;

        let current = self.current_version(bucket, key, &path)?;
        if !precondition_holds(&precondition, current.as_deref()) {
            debug!(bucket, key, ?precondition, "precondition failed");
            return Ok(WriteResult::PreconditionFailed {
                current_version: current,
            });
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(bucket, key, e))?;
        }

        let staged = self
            .root
            .join(STAGING_DIR)
            .join(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        let write_staged = || -> std::io::Result<()> {
            let mut file = fs::File::create(&staged)?;
            file.write_all(&data)?;
            file.sync_all()?;
            fs::rename(&staged, &path)
        };
        if let Err(e) = write_staged() {
            if staged.exists() {
                let _ = fs::remove_file(&staged);
            }
            return Err(StoreError::io(bucket, key, e));
        }

        Ok(WriteResult::Success {
            version: content_version(&data),
        })
    }

    /// Walks only the directory holding `prefix` and reads no object
    /// contents, so listed entries carry no version.
    fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<ObjectMeta>> {
        let bucket_dir = self.bucket_dir(bucket)?;
        let parent = prefix.rfind('/').map_or("", |i| &prefix[..i]);
        let mut walk_root = bucket_dir.clone();
        if !parent.is_empty() {
            validate_key(parent)?;
            walk_root.extend(parent.split('/'));
        }
        if !walk_root.is_dir() {
            return Ok(Vec::new());
        }

        let mut objects = Vec::new();
        for entry in WalkDir::new(&walk_root).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(bucket, error = %err, "skipping unreadable entry during list");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&bucket_dir) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if !key.starts_with(prefix) {
                continue;
            }
            // Removed between the walk and the stat
            let Ok(meta) = entry.metadata() else {
                debug!(bucket, key = %key, "object vanished during list");
                continue;
            };
            objects.push(ObjectMeta {
                size: meta.len(),
                version: None,
                last_modified: modified_at(&meta),
                key,
            });
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    fn delete(&self, bucket: &str, key: &str) -> StoreResult<()> {
        let path = self.object_path(bucket, key)?;
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StoreError::io(bucket, key, e)),
        }
        let bucket_dir = self.bucket_dir(bucket)?;
        self.prune_empty_dirs(&bucket_dir, &path);
        Ok(())
    }
}
