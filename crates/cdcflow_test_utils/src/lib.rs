//! cdcflow test utilities
//!
//! - [`fixtures`]: CSV builders and snapshot readback helpers
//! - [`storage`]: `FaultyStore`, an `ObjectStore` wrapper that records
//!   operations and fails them on demand
//!
//! ```rust,ignore
//! use cdcflow_test_utils::{FailOn, FaultyStore};
//! use cdcflow_store::MemoryStore;
//!
//! let store = FaultyStore::new(MemoryStore::new());
//! store.inject(FailOn::Copy, "des_file/final_output.csv");
//! // promotion now fails; the canonical object is untouched
//! ```

pub mod fixtures;
pub mod storage;

pub use fixtures::{
    canonical_csv, canonical_rows, cdc_csv, person, seed, snapshot_csv, snapshot_rows, PersonRow,
};
pub use storage::{FailOn, FaultyStore, StoreOp};
