use anyhow::Result;
use cdcflow_protocol::paths::{cdcflow_home, default_logs_dir};
use cdcflow_worker::config::render_job_config;
use serde::Serialize;
use std::path::PathBuf;

use super::CliContext;

#[derive(Debug, Serialize)]
struct ConfigOutput<'a> {
    home: PathBuf,
    store_root: &'a PathBuf,
    config_path: Option<&'a PathBuf>,
    logs_dir: PathBuf,
    job: &'a cdcflow_protocol::JobConfig,
    canonical_key: String,
}

pub fn run(ctx: &CliContext, json: bool) -> Result<()> {
    let output = ConfigOutput {
        home: cdcflow_home(),
        store_root: &ctx.store_root,
        config_path: ctx.config_path.as_ref(),
        logs_dir: default_logs_dir(),
        job: &ctx.config,
        canonical_key: ctx.config.canonical_key(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Home:       {}", output.home.display());
    println!("Store root: {}", output.store_root.display());
    match output.config_path {
        Some(path) => println!("Config:     {}", path.display()),
        None => println!("Config:     (defaults)"),
    }
    println!("Logs:       {}", output.logs_dir.display());
    println!("Snapshot:   {}", output.canonical_key);
    println!();
    print!("{}", render_job_config(&ctx.config)?);
    Ok(())
}
