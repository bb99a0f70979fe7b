//! Shared protocol for cdcflow.
//!
//! Types exchanged between the trigger adapter and the merge job: invocation
//! arguments, run identifiers, storage notifications, trigger responses and the
//! dataset layout configuration.

pub mod config;
pub mod defaults;
pub mod event;
pub mod paths;
pub mod types;

pub use config::{DuplicateKeyPolicy, JobConfig};
pub use event::{ObjectCreatedEvent, TriggerBody, TriggerResponse};
pub use types::{
    BatchKind, JobArguments, JobRunId, JobRunIdError, MergeCounts, Op, CDC_COLUMNS, KEY_COLUMN,
    SNAPSHOT_COLUMNS,
};
