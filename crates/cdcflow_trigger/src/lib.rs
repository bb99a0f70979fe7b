//! Trigger adapter for cdcflow.
//!
//! Decodes an object-created notification into `(bucket, file name)` and
//! starts exactly one merge job run through a [`JobDispatcher`]. The adapter
//! returns as soon as the run is dispatched.

pub mod adapter;
pub mod dispatch;
pub mod event;
pub mod watch;

pub use adapter::{TriggerAdapter, TriggerError};
pub use dispatch::{
    DatasetLocks, DispatchError, JobDispatcher, JobRunTracker, LocalDispatcher, RunState,
};
pub use event::{decode_notification, encode_key, ObjectLocation};
pub use watch::InputWatcher;
