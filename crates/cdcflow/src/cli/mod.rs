//! Command implementations for the `cdcflow` binary.

pub mod config;
pub mod merge;
pub mod trigger;
pub mod watch;

use anyhow::{Context, Result};
use cdcflow_protocol::paths::default_config_path;
use cdcflow_protocol::JobConfig;
use cdcflow_store::LocalStore;
use cdcflow_worker::config::{load_job_config, resolve_store_root};
use std::path::{Path, PathBuf};

/// Settings resolved once from global flags, environment and config file.
#[derive(Debug)]
pub struct CliContext {
    pub store_root: PathBuf,
    /// Config file in effect, if any.
    pub config_path: Option<PathBuf>,
    pub config: JobConfig,
}

impl CliContext {
    pub fn resolve(store_root: Option<PathBuf>, config_path: Option<&Path>) -> Result<Self> {
        let config = load_job_config(config_path)?;
        let config_path = match config_path {
            Some(path) => Some(path.to_path_buf()),
            None => Some(default_config_path()).filter(|path| path.is_file()),
        };
        Ok(Self {
            store_root: resolve_store_root(store_root),
            config_path,
            config,
        })
    }

    pub fn open_store(&self) -> Result<LocalStore> {
        LocalStore::new(self.store_root.clone())
            .with_context(|| format!("Failed to open store at {}", self.store_root.display()))
    }
}
