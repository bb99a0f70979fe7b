//! Failure-injecting store wrapper with an operation log.

use cdcflow_store::{
    DeleteReport, ObjectMeta, ObjectStore, StoreError, StoreResult, WritePrecondition, WriteResult,
};
use std::sync::Mutex;

/// Record of a store call, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Get { key: String },
    Head { key: String },
    Put { key: String, size: usize, precondition: WritePrecondition },
    List { prefix: String },
    Delete { key: String },
    Copy { src: String, dst: String, precondition: WritePrecondition },
}

/// Operation an injected failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    Get,
    Head,
    Put,
    List,
    Delete,
    /// Matched against the destination key.
    Copy,
    Any,
}

type CopyHook<S> = Box<dyn FnOnce(&S) + Send>;

/// Wraps a store, logging every call and failing those that match an
/// injected `(operation, key prefix)` rule.
pub struct FaultyStore<S: ObjectStore> {
    inner: S,
    ops: Mutex<Vec<StoreOp>>,
    failures: Mutex<Vec<(FailOn, String)>>,
    before_copy: Mutex<Option<CopyHook<S>>>,
}

impl<S: ObjectStore> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            ops: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            before_copy: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Fail every `op` call whose key (or list prefix) starts with `prefix`.
    pub fn inject(&self, op: FailOn, prefix: impl Into<String>) {
        self.failures.lock().expect("lock").push((op, prefix.into()));
    }

    pub fn clear_failures(&self) {
        self.failures.lock().expect("lock").clear();
    }

    /// Run `hook` against the inner store just before the next copy, e.g. to
    /// simulate a concurrent writer replacing the destination.
    pub fn before_next_copy(&self, hook: impl FnOnce(&S) + Send + 'static) {
        *self.before_copy.lock().expect("lock") = Some(Box::new(hook));
    }

    pub fn operations(&self) -> Vec<StoreOp> {
        self.ops.lock().expect("lock").clone()
    }

    pub fn copies(&self) -> Vec<StoreOp> {
        self.operations()
            .into_iter()
            .filter(|op| matches!(op, StoreOp::Copy { .. }))
            .collect()
    }

    fn record(&self, op: StoreOp) {
        self.ops.lock().expect("lock").push(op);
    }

    fn check(&self, op: FailOn, bucket: &str, key: &str) -> StoreResult<()> {
        let failures = self.failures.lock().expect("lock");
        let hit = failures
            .iter()
            .any(|(on, prefix)| (*on == op || *on == FailOn::Any) && key.starts_with(prefix.as_str()));
        if hit {
            tracing::debug!(?op, bucket, key, "injected store failure");
            return Err(StoreError::Io {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source: std::io::Error::other(format!("injected {:?} failure", op)),
            });
        }
        Ok(())
    }
}

impl<S: ObjectStore> ObjectStore for FaultyStore<S> {
    fn get(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>> {
        self.record(StoreOp::Get { key: key.to_string() });
        self.check(FailOn::Get, bucket, key)?;
        self.inner.get(bucket, key)
    }

    fn head(&self, bucket: &str, key: &str) -> StoreResult<Option<ObjectMeta>> {
        self.record(StoreOp::Head { key: key.to_string() });
        self.check(FailOn::Head, bucket, key)?;
        self.inner.head(bucket, key)
    }

    fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        precondition: WritePrecondition,
    ) -> StoreResult<WriteResult> {
        self.record(StoreOp::Put {
            key: key.to_string(),
            size: data.len(),
            precondition: precondition.clone(),
        });
        self.check(FailOn::Put, bucket, key)?;
        self.inner.put(bucket, key, data, precondition)
    }

    fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<ObjectMeta>> {
        self.record(StoreOp::List { prefix: prefix.to_string() });
        self.check(FailOn::List, bucket, prefix)?;
        self.inner.list(bucket, prefix)
    }

    fn delete(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.record(StoreOp::Delete { key: key.to_string() });
        self.check(FailOn::Delete, bucket, key)?;
        self.inner.delete(bucket, key)
    }

    fn copy(
        &self,
        bucket: &str,
        src_key: &str,
        dst_key: &str,
        precondition: WritePrecondition,
    ) -> StoreResult<WriteResult> {
        self.record(StoreOp::Copy {
            src: src_key.to_string(),
            dst: dst_key.to_string(),
            precondition: precondition.clone(),
        });
        self.check(FailOn::Copy, bucket, dst_key)?;
        let hook = self.before_copy.lock().expect("lock").take();
        if let Some(hook) = hook {
            hook(&self.inner);
        }
        self.inner.copy(bucket, src_key, dst_key, precondition)
    }

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
