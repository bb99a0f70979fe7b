//! cdcflow - keep a canonical Person snapshot current from uploaded batches
//!
//! Usage:
//!     cdcflow merge --dst-bucket-name people --file-name batch_0001.csv
//!     cdcflow trigger --event notification.json
//!     cdcflow watch --bucket people
//!     cdcflow config

mod cli;

use cdcflow_logging::{init_logging, LogConfig};
use cdcflow_worker::MergeArgs;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "cdcflow", version, about = "Merge CDC batches into a canonical snapshot")]
struct Cli {
    /// Enable debug logging on stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Root directory of the local object store
    #[arg(long, global = true, env = "CDCFLOW_STORE_ROOT")]
    store_root: Option<PathBuf>,

    /// Job config file (TOML)
    #[arg(long, global = true, env = "CDCFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Merge one uploaded batch into the canonical snapshot
    Merge {
        #[command(flatten)]
        args: MergeArgs,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Handle one object-created notification and wait for the run
    Trigger {
        /// Notification JSON file, or '-' for stdin
        #[arg(long, default_value = "-")]
        event: String,
    },

    /// Poll a bucket's input prefix and trigger a run per new object
    Watch {
        /// Bucket to watch
        #[arg(long)]
        bucket: String,

        /// Seconds between polls
        #[arg(long, default_value_t = 5)]
        interval_secs: u64,

        /// Also trigger runs for objects already present at startup
        #[arg(long)]
        include_existing: bool,
    },

    /// Show resolved paths and job configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn run_command(cli: Cli) -> anyhow::Result<()> {
    let ctx = cli::CliContext::resolve(cli.store_root, cli.config.as_deref())?;
    match cli.command {
        Commands::Merge { args, json } => cli::merge::run(&ctx, &args, json),
        Commands::Trigger { event } => cli::trigger::run(&ctx, &event),
        Commands::Watch {
            bucket,
            interval_secs,
            include_existing,
        } => cli::watch::run(
            &ctx,
            cli::watch::WatchArgs {
                bucket,
                interval_secs,
                include_existing,
            },
        ),
        Commands::Config { json } => cli::config::run(&ctx, json),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(LogConfig {
        app_name: "cdcflow",
        verbose: cli.verbose,
        log_dir: None,
    }) {
        eprintln!("Warning: logging unavailable: {:#}", err);
    }

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "cdcflow",
            "merge",
            "--dst-bucket-name",
            "people",
            "--file-name",
            "a.csv",
            "--store-root",
            "/tmp/store",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.store_root, Some(PathBuf::from("/tmp/store")));
        match cli.command {
            Commands::Merge { args, json } => {
                assert_eq!(args.dst_bucket_name, "people");
                assert_eq!(args.file_name, "a.csv");
                assert!(!json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_trigger_reads_stdin_by_default() {
        let cli = Cli::try_parse_from(["cdcflow", "trigger"]).unwrap();
        assert!(matches!(cli.command, Commands::Trigger { event } if event == "-"));
    }
}
