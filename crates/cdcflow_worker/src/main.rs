//! cdcflow merge job
//!
//! Usage:
//!     cdcflow-merge --dst-bucket-name people --file-name batch_0001.csv

use anyhow::Context;
use cdcflow_logging::{init_logging, LogConfig};
use cdcflow_store::LocalStore;
use cdcflow_worker::config::{load_job_config, resolve_store_root};
use cdcflow_worker::{MergeArgs, MergeJob};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "cdcflow-merge", about = "Merge one uploaded batch into the canonical snapshot")]
struct Args {
    #[command(flatten)]
    merge: MergeArgs,

    /// Root directory of the local object store
    #[arg(long, env = "CDCFLOW_STORE_ROOT")]
    store_root: Option<PathBuf>,

    /// Job config file (TOML)
    #[arg(long, env = "CDCFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging on stderr
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    if let Err(err) = init_logging(LogConfig {
        app_name: "cdcflow-merge",
        verbose: args.verbose,
        log_dir: None,
    }) {
        eprintln!("Warning: logging unavailable: {:#}", err);
    }

    let config = load_job_config(args.config.as_deref())?;
    let root = resolve_store_root(args.store_root);
    let store = LocalStore::new(root.clone())
        .with_context(|| format!("Failed to open store at {}", root.display()))?;

    match MergeJob::new(&store, &config).run(&args.merge.to_job_arguments()) {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            tracing::error!(error = %err, retryable = err.is_retryable(), "merge job failed");
            eprintln!("Error: {}", err);
            Ok(ExitCode::FAILURE)
        }
    }
}
