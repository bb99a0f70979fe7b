//! Loading `JobConfig` and store settings for the binaries.

use anyhow::{Context, Result};
use cdcflow_protocol::paths::{default_config_path, default_store_root};
use cdcflow_protocol::JobConfig;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Load a job config.
///
/// An explicit path must exist. Without one, `<home>/config.toml` is used if
/// present, otherwise the built-in defaults.
pub fn load_job_config(path: Option<&Path>) -> Result<JobConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let fallback = default_config_path();
            if !fallback.is_file() {
                debug!(path = %fallback.display(), "no config file, using defaults");
                return Ok(JobConfig::default());
            }
            fallback
        }
    };

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: JobConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;
    debug!(path = %path.display(), "loaded job config");
    Ok(config)
}

/// Serialise a job config as TOML.
pub fn render_job_config(config: &JobConfig) -> Result<String> {
    toml::to_string_pretty(config).context("Failed to render config")
}

pub fn resolve_store_root(root: Option<PathBuf>) -> PathBuf {
    root.unwrap_or_else(default_store_root)
}
