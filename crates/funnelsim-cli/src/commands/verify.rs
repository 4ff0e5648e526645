use anyhow::Context;
use clap::Args;
use colored::Colorize;
use funnelsim_analytics::audit_event_log;
use funnelsim_core::{read_csv, EventRow};
use std::path::PathBuf;
use tracing::{info, warn};

/// Violations printed before the rest are summarized as a count
const MAX_LISTED: usize = 20;

#[derive(Args)]
pub struct VerifyCommand {
    /// Event log to check
    #[arg(long, env = "FUNNELSIM_EVENTS", default_value = "data/events.csv")]
    pub events: PathBuf,

    /// Also check that no user exceeds this many payment retries
    #[arg(long)]
    pub max_retries: Option<u32>,
}

impl VerifyCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rows: Vec<EventRow> = read_csv(&self.events)
            .with_context(|| format!("Failed to read {}", self.events.display()))?;
        info!("Checking {} events from {}", rows.len(), self.events.display());

        let report = audit_event_log(&rows, self.max_retries);
        if report.is_clean() {
            println!(
                "{} {} users, {} events, no violations",
                "✅".bright_green(),
                report.users_checked.to_string().bright_cyan(),
                report.events_checked.to_string().bright_cyan()
            );
            return Ok(());
        }

        for violation in report.violations.iter().take(MAX_LISTED) {
            println!(
                "{} user {}: {}",
                "✗".bright_red(),
                violation.user_id.to_string().bright_yellow(),
                violation.kind
            );
        }
        if report.violations.len() > MAX_LISTED {
            warn!("{} more violations not shown", report.violations.len() - MAX_LISTED);
        }

        anyhow::bail!(
            "{} violations across {} users",
            report.violations.len(),
            report.users_checked
        )
    }
}
