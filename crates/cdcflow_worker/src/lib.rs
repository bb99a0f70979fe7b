//! Merge job for cdcflow.
//!
//! Reads one uploaded object, classifies it as a CDC or snapshot batch,
//! computes the new canonical snapshot and promotes it through a staged
//! sink.

pub mod batch;
pub mod config;
pub mod error;
pub mod job;
pub mod merge;

pub use batch::{classify_batch, read_snapshot, CdcBatch, InputBatch, SnapshotBatch};
pub use error::MergeError;
pub use job::{MergeJob, MergeReport};
pub use merge::{merge_cdc, MergeOutcome};

use cdcflow_protocol::JobArguments;

/// Invocation parameters as passed on the command line.
#[derive(clap::Args, Debug, Clone)]
pub struct MergeArgs {
    /// Bucket holding the input and the canonical snapshot
    #[arg(long)]
    pub dst_bucket_name: String,

    /// Name of the uploaded object under the input prefix
    #[arg(long)]
    pub file_name: String,
}

impl MergeArgs {
    pub fn to_job_arguments(&self) -> JobArguments {
        JobArguments::new(self.dst_bucket_name.clone(), self.file_name.clone())
    }
}
