use anyhow::{bail, Context, Result};
use cdcflow_store::ObjectStore;
use cdcflow_trigger::{LocalDispatcher, RunState, TriggerAdapter};
use std::io::Read;
use std::sync::Arc;
use tracing::info;

use super::CliContext;

pub fn run(ctx: &CliContext, event: &str) -> Result<()> {
    let payload = read_event(event)?;

    let store: Arc<dyn ObjectStore> = Arc::new(ctx.open_store()?);
    let adapter = TriggerAdapter::new(
        LocalDispatcher::new(store, ctx.config.clone()),
        ctx.config.job_name.clone(),
    );

    let response = adapter.handle_json(&payload)?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    let body = response.parse_body()?;

    // The run lives on a background thread; exiting now would abandon it.
    info!(job_run_id = %body.job_run_id, "waiting for job run");
    let outcome = adapter.dispatcher().wait(&body.job_run_id, None);
    adapter.dispatcher().tracker().forget(&body.job_run_id);
    match outcome {
        Some(RunState::Succeeded { report }) => {
            super::merge::print_report(&report);
            Ok(())
        }
        Some(RunState::Failed { message, retryable }) => {
            if retryable {
                bail!("job run {} failed (retryable): {}", body.job_run_id, message)
            }
            bail!("job run {} failed: {}", body.job_run_id, message)
        }
        Some(RunState::Running { .. }) | None => {
            bail!("job run {} did not report an outcome", body.job_run_id)
        }
    }
}

fn read_event(source: &str) -> Result<String> {
    if source == "-" {
        let mut payload = String::new();
        std::io::stdin()
            .read_to_string(&mut payload)
            .context("Failed to read notification from stdin")?;
        return Ok(payload);
    }
    std::fs::read_to_string(source).with_context(|| format!("Failed to read notification {}", source))
}
