use anyhow::Result;
use cdcflow_sinks::CleanupOutcome;
use cdcflow_worker::{MergeArgs, MergeJob, MergeReport};

use super::CliContext;

pub fn run(ctx: &CliContext, args: &MergeArgs, json: bool) -> Result<()> {
    let store = ctx.open_store()?;
    let report = MergeJob::new(&store, &ctx.config).run(&args.to_job_arguments())?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

pub(crate) fn print_report(report: &MergeReport) {
    let counts = &report.counts;
    println!("Run:        {}", report.run_id);
    println!("Input:      {}/{} ({})", report.bucket, report.input_key, report.batch_kind);
    println!(
        "Rows:       {} prior, +{} inserted, ~{} updated, -{} deleted, {} skipped",
        counts.prior_rows, counts.inserts, counts.updates, counts.deletes, counts.skipped_ops
    );
    println!("Snapshot:   {} ({} rows)", report.canonical_key, counts.output_rows);
    match &report.cleanup {
        CleanupOutcome::Removed { objects } => {
            println!("Cleanup:    removed {} object(s) under {}", objects, report.temp_prefix)
        }
        CleanupOutcome::Failed { message } => {
            println!("Cleanup:    FAILED for {} ({})", report.temp_prefix, message)
        }
    }
}
