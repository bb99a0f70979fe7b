use anyhow::{Context, Result};
use cdcflow_protocol::ObjectCreatedEvent;
use cdcflow_store::{validate_bucket, ObjectStore};
use cdcflow_trigger::{InputWatcher, JobDispatcher, LocalDispatcher, RunState, TriggerAdapter};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::CliContext;

#[derive(Debug)]
pub struct WatchArgs {
    pub bucket: String,
    pub interval_secs: u64,
    pub include_existing: bool,
}

pub fn run(ctx: &CliContext, args: WatchArgs) -> Result<()> {
    validate_bucket(&args.bucket)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(watch_loop(ctx, args))
}

async fn watch_loop(ctx: &CliContext, args: WatchArgs) -> Result<()> {
    let store: Arc<dyn ObjectStore> = Arc::new(ctx.open_store()?);
    let adapter = TriggerAdapter::new(
        LocalDispatcher::new(Arc::clone(&store), ctx.config.clone()),
        ctx.config.job_name.clone(),
    );

    let mut watcher = InputWatcher::new(args.bucket.clone(), &ctx.config);
    if !args.include_existing {
        let existing = watcher.prime(store.as_ref())?;
        info!(bucket = %args.bucket, existing, "ignoring objects already present");
    }

    println!(
        "Watching {}/{} every {}s (Ctrl-C to stop)",
        args.bucket,
        ctx.config.input_dir(),
        args.interval_secs
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval_secs.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let events = match watcher.poll(store.as_ref()) {
                    Ok(events) => events,
                    Err(err) => {
                        warn!(bucket = %args.bucket, error = %err, "poll failed");
                        continue;
                    }
                };
                for event in events {
                    dispatch(&adapter, &event);
                }
                report_finished(adapter.dispatcher());
            }
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
        }
    }

    let pending: Vec<_> = adapter
        .dispatcher()
        .tracker()
        .runs()
        .into_iter()
        .filter(|(_, state)| !state.is_terminal())
        .map(|(id, _)| id)
        .collect();
    if !pending.is_empty() {
        println!("Waiting for {} running job(s)...", pending.len());
        let tracker = adapter.dispatcher().tracker().clone();
        tokio::task::spawn_blocking(move || {
            for id in &pending {
                tracker.wait(id, None);
            }
        })
        .await
        .context("Failed to wait for running jobs")?;
    }
    report_finished(adapter.dispatcher());
    Ok(())
}

/// Print and forget runs that finished since the last tick.
fn report_finished(dispatcher: &LocalDispatcher) {
    for (run_id, state) in dispatcher.tracker().drain_finished() {
        match state {
            RunState::Succeeded { report } => println!(
                "Run {} for {} succeeded: {} rows",
                run_id, report.file_name, report.counts.output_rows
            ),
            RunState::Failed { message, retryable } => {
                println!("Run {} failed (retryable: {}): {}", run_id, retryable, message)
            }
            RunState::Running { .. } => {}
        }
    }
}

fn dispatch<D: JobDispatcher>(adapter: &TriggerAdapter<D>, event: &ObjectCreatedEvent) {
    match adapter.handle(event).map(|response| response.parse_body()) {
        Ok(Ok(body)) => println!("Triggered {} for {}", body.job_run_id, body.file),
        Ok(Err(err)) => warn!(error = %err, "unreadable trigger response"),
        Err(err) => warn!(error = %err, "failed to trigger job run"),
    }
}
