use std::path::PathBuf;

/// Resolve the cdcflow home directory.
///
/// Priority:
/// 1) CDCFLOW_HOME
/// 2) the platform home directory
/// 3) ./.cdcflow
pub fn cdcflow_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("CDCFLOW_HOME") {
        return PathBuf::from(override_path);
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".cdcflow");
    }
    PathBuf::from(".").join(".cdcflow")
}

/// Default local object store root: ~/.cdcflow/store
pub fn default_store_root() -> PathBuf {
    cdcflow_home().join("store")
}

/// Default config file: ~/.cdcflow/config.toml
pub fn default_config_path() -> PathBuf {
    cdcflow_home().join("config.toml")
}

/// Default logs directory: ~/.cdcflow/logs
pub fn default_logs_dir() -> PathBuf {
    cdcflow_home().join("logs")
}
