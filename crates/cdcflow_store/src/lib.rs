//! Object storage abstraction.
//!
//! The merge job only needs a handful of object operations: read an object,
//! write one, list a prefix, copy one key onto another, and delete a set of
//! keys. Objects live in named buckets and are addressed by `/`-separated keys.
//!
//! Every object carries an opaque version token. Writes and copies accept a
//! [`WritePrecondition`] so a caller can replace an object only if it still has
//! the version it observed earlier (compare-and-swap).

use chrono::{DateTime, Utc};
use thiserror::Error;

mod local;
mod memory;

pub use local::LocalStore;
pub use memory::MemoryStore;

/// Errors returned by object store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("invalid {what} '{value}': {reason}")]
    InvalidKey {
        what: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("storage I/O error on {bucket}/{key}: {source}")]
    Io {
        bucket: String,
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("storage internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// I/O and internal failures may succeed on retry; bad keys and missing
    /// objects will not.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Io { .. } | StoreError::Internal(_))
    }

    pub(crate) fn not_found(bucket: &str, key: &str) -> Self {
        StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    pub(crate) fn io(bucket: &str, key: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::not_found(bucket, key);
        }
        StoreError::Io {
            bucket: bucket.to_string(),
            key: key.to_string(),
            source,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Precondition for conditional writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WritePrecondition {
    /// Write only if the object does not exist.
    DoesNotExist,
    /// Write only if the object's version matches the token.
    MatchesVersion(String),
    /// Write unconditionally.
    None,
}

/// Outcome of a conditional write. A failed precondition is a normal result,
/// not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    Success {
        version: String,
    },
    PreconditionFailed {
        /// Version present at write time, `None` if the object was absent.
        current_version: Option<String>,
    },
}

impl WriteResult {
    pub fn is_success(&self) -> bool {
        matches!(self, WriteResult::Success { .. })
    }
}

/// Metadata about a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    /// Opaque version token for conditional writes. Always set by `head`;
    /// listings may leave it unset when computing it would mean reading the
    /// object.
    pub version: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Result of a batch delete. Individual failures do not abort the batch.
#[derive(Debug, Default)]
pub struct DeleteReport {
    pub deleted: Vec<String>,
    pub failed: Vec<(String, StoreError)>,
}

impl DeleteReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Object storage backend.
///
/// Keys are validated with [`validate_key`]; buckets with [`validate_bucket`].
pub trait ObjectStore: Send + Sync + 'static {
    /// Read an entire object. Returns `StoreError::NotFound` if it is absent.
    fn get(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>>;

    /// Object metadata, or `None` if it is absent.
    fn head(&self, bucket: &str, key: &str) -> StoreResult<Option<ObjectMeta>>;

    /// Write an object, replacing any previous content if the precondition holds.
    fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        precondition: WritePrecondition,
    ) -> StoreResult<WriteResult>;

    /// Objects whose key starts with `prefix`, sorted by key.
    fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<ObjectMeta>>;

    /// Delete an object. Deleting a missing object succeeds.
    fn delete(&self, bucket: &str, key: &str) -> StoreResult<()>;

    /// Copy `src_key` onto `dst_key` within a bucket, subject to a precondition
    /// on the destination. The destination is replaced as a whole.
    fn copy(
        &self,
        bucket: &str,
        src_key: &str,
        dst_key: &str,
        precondition: WritePrecondition,
    ) -> StoreResult<WriteResult> {
        let data = self.get(bucket, src_key)?;
        self.put(bucket, dst_key, data, precondition)
    }

    /// Delete many keys, continuing past individual failures.
    fn delete_many(&self, bucket: &str, keys: &[String]) -> DeleteReport {
        let mut report = DeleteReport::default();
        for key in keys {
            match self.delete(bucket, key) {
                Ok(()) => report.deleted.push(key.clone()),
                Err(err) => report.failed.push((key.clone(), err)),
            }
        }
        report
    }
}

/// Reject keys that could escape a bucket or collide with directory paths.
pub fn validate_key(key: &str) -> StoreResult<()> {
    let invalid = |reason| StoreError::InvalidKey {
        what: "object key",
        value: key.to_string(),
        reason,
    };
    if key.is_empty() {
        return Err(invalid("empty key"));
    }
    if key.starts_with('/') || key.ends_with('/') {
        return Err(invalid("leading or trailing '/'"));
    }
    if key.contains('\\') || key.contains('\0') {
        return Err(invalid("backslash or NUL"));
    }
    for segment in key.split('/') {
        match segment {
            "" => return Err(invalid("empty path segment")),
            "." | ".." => return Err(invalid("relative path segment")),
            _ => {}
        }
    }
    Ok(())
}

pub fn validate_bucket(bucket: &str) -> StoreResult<()> {
    let invalid = |reason| StoreError::InvalidKey {
        what: "bucket",
        value: bucket.to_string(),
        reason,
    };
    if bucket.is_empty() {
        return Err(invalid("empty bucket"));
    }
    if bucket.starts_with('.') {
        return Err(invalid("leading '.'"));
    }
    if bucket.contains(['/', '\\', '\0']) {
        return Err(invalid("path separator"));
    }
    Ok(())
}

/// Content hash used as a version token by the filesystem backend.
pub(crate) fn content_version(data: &[u8]) -> String {
    blake3::hash(data).to_hex()[..16].to_string()
}

/// Evaluate a precondition against the version currently stored.
pub(crate) fn precondition_holds(
    precondition: &WritePrecondition,
    current: Option<&str>,
) -> bool {
    match (precondition, current) {
        (WritePrecondition::None, _) => true,
        (WritePrecondition::DoesNotExist, current) => current.is_none(),
        (WritePrecondition::MatchesVersion(expected), Some(current)) => expected == current,
        (WritePrecondition::MatchesVersion(_), None) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("des_file/final_output.csv").is_ok());
        assert!(validate_key("a b+c.csv").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("dir/").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key("a/../b").is_err());
        assert!(validate_key("a\\b").is_err());
    }

    #[test]
    fn test_validate_bucket() {
        assert!(validate_bucket("people-data").is_ok());
        assert!(validate_bucket("").is_err());
        assert!(validate_bucket(".staging").is_err());
        assert!(validate_bucket("a/b").is_err());
    }

    #[test]
    fn test_precondition_table() {
        let none = WritePrecondition::None;
        let absent = WritePrecondition::DoesNotExist;
        let v1 = WritePrecondition::MatchesVersion("1".into());

        assert!(precondition_holds(&none, None));
        assert!(precondition_holds(&none, Some("7")));
        assert!(precondition_holds(&absent, None));
        assert!(!precondition_holds(&absent, Some("1")));
        assert!(precondition_holds(&v1, Some("1")));
        assert!(!precondition_holds(&v1, Some("2")));
        assert!(!precondition_holds(&v1, None));
    }

    #[test]
    fn test_not_found_io_maps_to_not_found() {
        let err = StoreError::io(
            "b",
            "k",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.is_not_found());
        assert!(!err.is_transient());
    }
}
