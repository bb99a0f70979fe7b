//! Job configuration shared by the trigger adapter, merge job and CLI.

use serde::{Deserialize, Serialize};

use crate::defaults::{
    DEFAULT_FINAL_OUTPUT_NAME, DEFAULT_INPUT_PREFIX, DEFAULT_JOB_NAME, DEFAULT_OUTPUT_PREFIX,
    TEMP_OUTPUT_DIR_PREFIX,
};

/// How a CDC batch treats a key that would otherwise end up twice in the
/// snapshot (repeated among Inserts/Updates, or an Insert of an existing key).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicateKeyPolicy {
    /// The last change row in file order wins and replaces any prior row.
    #[default]
    LastWins,
    /// Abort the run with a duplicate-key error.
    Reject,
}

impl DuplicateKeyPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateKeyPolicy::LastWins => "last-wins",
            DuplicateKeyPolicy::Reject => "reject",
        }
    }
}

/// Layout and merge settings for one logical dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Name the trigger dispatches under.
    pub job_name: String,
    /// Prefix prepended to the notified file name to locate the input object.
    pub input_prefix: String,
    /// Prefix holding the canonical output and per-run temp folders.
    pub output_prefix: String,
    /// Object name of the canonical snapshot under `output_prefix`.
    pub final_output_name: String,
    pub duplicate_keys: DuplicateKeyPolicy,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            job_name: DEFAULT_JOB_NAME.to_string(),
            input_prefix: DEFAULT_INPUT_PREFIX.to_string(),
            output_prefix: DEFAULT_OUTPUT_PREFIX.to_string(),
            final_output_name: DEFAULT_FINAL_OUTPUT_NAME.to_string(),
            duplicate_keys: DuplicateKeyPolicy::default(),
        }
    }
}

impl JobConfig {
    /// Input prefix normalised to end with exactly one `/` (empty stays empty).
    pub fn input_dir(&self) -> String {
        dir_prefix(&self.input_prefix)
    }

    pub fn input_key(&self, file_name: &str) -> String {
        format!("{}{}", self.input_dir(), file_name)
    }

    pub fn canonical_key(&self) -> String {
        format!("{}{}", dir_prefix(&self.output_prefix), self.final_output_name)
    }

    /// Per-run temporary prefix, e.g. `des_file/temp_output_20250101_120000_1a2b3c4d/`.
    pub fn temp_prefix(&self, timestamp: &str, run_tag: &str) -> String {
        format!(
            "{}{}{}_{}/",
            dir_prefix(&self.output_prefix),
            TEMP_OUTPUT_DIR_PREFIX,
            timestamp,
            run_tag
        )
    }
}

fn dir_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let config = JobConfig::default();
        assert_eq!(
            config.input_key("people.csv"),
            "intermediate_data/world/Person_Lewis/people.csv"
        );
        assert_eq!(config.canonical_key(), "des_file/final_output.csv");
        assert_eq!(
            config.temp_prefix("20250101_120000", "1a2b3c4d"),
            "des_file/temp_output_20250101_120000_1a2b3c4d/"
        );
    }

    #[test]
    fn test_prefix_normalisation() {
        let config = JobConfig {
            input_prefix: "landing".to_string(),
            output_prefix: "/out/".to_string(),
            ..JobConfig::default()
        };
        assert_eq!(config.input_key("x.csv"), "landing/x.csv");
        assert_eq!(config.canonical_key(), "out/final_output.csv");

        let flat = JobConfig {
            input_prefix: String::new(),
            output_prefix: String::new(),
            ..JobConfig::default()
        };
        assert_eq!(flat.input_key("x.csv"), "x.csv");
        assert_eq!(flat.canonical_key(), "final_output.csv");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: JobConfig =
            serde_json::from_str(r#"{"duplicate_keys":"reject","output_prefix":"snap"}"#).unwrap();
        assert_eq!(config.duplicate_keys, DuplicateKeyPolicy::Reject);
        assert_eq!(config.output_prefix, "snap");
        assert_eq!(config.final_output_name, "final_output.csv");
    }
}
