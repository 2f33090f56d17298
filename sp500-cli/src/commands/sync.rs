//! `sp500 sync` — one pipeline run in the foreground.

use std::time::Duration;

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;

use sp500_sync::{RunOutcome, RunReport};

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Abort the run after this many seconds (defaults to SYNC_DEADLINE_SECS).
    #[arg(long)]
    pub deadline_secs: Option<u64>,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        sp500_daemon::init_tracing("warn");
        let config = super::load_config()?;
        let deadline = self
            .deadline_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(config.server.sync_deadline);

        let components = super::load_components()?;
        let report = super::block_on(components.pipeline.run_with_deadline(deadline))?;
        print_report(&report);

        if let RunOutcome::Failed(err) = &report.outcome {
            bail!("sync failed ({}): {err}", err.kind());
        }
        Ok(())
    }
}

fn print_report(report: &RunReport) {
    let path = report
        .transitions
        .iter()
        .map(|state| state.to_string())
        .collect::<Vec<_>>()
        .join(" → ");
    println!("{}", path.bright_black());

    match &report.outcome {
        RunOutcome::Skipped => println!("{} another sync is already running", "·".yellow()),
        RunOutcome::Unchanged => println!("{} listing unchanged", "✓".green()),
        RunOutcome::Changed { notified, failed } => {
            println!(
                "{} listing changed, {} subscriber(s) notified",
                "✓".green(),
                notified
            );
            for email in failed {
                println!("  {} delivery failed: {email}", "✗".red());
            }
        }
        RunOutcome::Failed(_) => println!("{} sync failed", "✗".red()),
    }
}
