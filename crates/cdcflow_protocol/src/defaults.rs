//! Canonical default values shared by the trigger adapter and the merge job.

pub const DEFAULT_JOB_NAME: &str = "consolidate-person-snapshot";
pub const DEFAULT_INPUT_PREFIX: &str = "intermediate_data/world/Person_Lewis/";
pub const DEFAULT_OUTPUT_PREFIX: &str = "des_file";
pub const DEFAULT_FINAL_OUTPUT_NAME: &str = "final_output.csv";
pub const TEMP_OUTPUT_DIR_PREFIX: &str = "temp_output_";
/// strftime pattern for the temporary output namespace.
pub const TEMP_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
pub const TRIGGER_SUCCESS_MESSAGE: &str = "Merge job triggered successfully";
