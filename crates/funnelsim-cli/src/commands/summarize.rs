use anyhow::Context;
use clap::{Args, ValueEnum};
use colored::Colorize;
use funnelsim_analytics::{FunnelReport, ReportOptions, RevenueBasis, SegmentBreakdown};
use funnelsim_core::{read_csv, EventRow, Subscription};
use funnelsim_generator::SUBSCRIPTIONS_FILE;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Args)]
pub struct SummarizeCommand {
    /// Event log to summarize
    #[arg(long, env = "FUNNELSIM_EVENTS", default_value = "data/events.csv")]
    pub events: PathBuf,

    /// Subscriptions table used for plan-mix MRR and ARR.
    /// Defaults to subscriptions.csv next to the event log, when present.
    #[arg(long, env = "FUNNELSIM_SUBSCRIPTIONS")]
    pub subscriptions: Option<PathBuf>,

    /// Flat monthly subscription price. Overrides the plan mix.
    #[arg(long)]
    pub price: Option<f64>,

    /// Percentage-point uplift used for per-stage opportunity sizing
    #[arg(long, default_value_t = 5.0)]
    pub uplift: f64,

    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

impl SummarizeCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        if let Some(price) = self.price {
            anyhow::ensure!(price >= 0.0, "--price must not be negative, got {}", price);
        }
        anyhow::ensure!(
            (0.0..=100.0).contains(&self.uplift),
            "--uplift must be within [0, 100], got {}",
            self.uplift
        );

        let rows: Vec<EventRow> = read_csv(&self.events)
            .with_context(|| format!("Failed to read {}", self.events.display()))?;
        info!("Loaded {} events from {}", rows.len(), self.events.display());

        let options = ReportOptions {
            monthly_price: self.price,
            uplift_points: self.uplift,
        };
        let report = match self.subscriptions_path() {
            Some(path) => {
                let subscriptions: Vec<Subscription> = read_csv(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                info!(
                    "Loaded {} subscriptions from {}",
                    subscriptions.len(),
                    path.display()
                );
                FunnelReport::from_dataset(&rows, &subscriptions, &options)
            }
            None => FunnelReport::from_rows(&rows, &options),
        };

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            OutputFormat::Table => print_report(&report),
        }
        Ok(())
    }

    fn subscriptions_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.subscriptions {
            return Some(path.clone());
        }
        let sibling = self.events.with_file_name(SUBSCRIPTIONS_FILE);
        if sibling.is_file() {
            Some(sibling)
        } else {
            debug!("No subscriptions table at {}", sibling.display());
            None
        }
    }
}

fn print_report(report: &FunnelReport) {
    println!();
    println!(
        "{} {}",
        "Funnel over".bright_white().bold(),
        format!("{} users", report.total_users).bright_cyan()
    );
    println!(
        "{}",
        format!(
            "{:<14} {:>8} {:>11} {:>9} {:>9} {:>11}",
            "stage", "users", "conversion", "drop-off", "overall", "avg hours"
        )
        .bright_white()
    );
    for stage in &report.stages {
        println!(
            "{:<14} {:>8} {:>10.2}% {:>8.2}% {:>8.2}% {:>11.1}",
            stage.stage.to_string(),
            stage.users,
            stage.conversion_rate,
            stage.drop_off_rate,
            stage.overall_rate,
            stage.average_hours_from_previous
        );
    }

    print_segments("By channel", &report.by_channel);
    print_segments("By device", &report.by_device);

    println!();
    println!("{}", "Payments".bright_white().bold());
    for payments in &report.payments {
        println!(
            "{:<14} {:>8} trial users, {:>6.2}% with a failed attempt, {} churned",
            payments.device.to_string(),
            payments.trial_users,
            payments.failure_rate,
            payments.churned_users
        );
    }

    if let Some(revenue) = &report.revenue {
        println!();
        match &revenue.basis {
            RevenueBasis::FlatPrice { monthly_price } => println!(
                "{} {} subscribers at ${:.2}/month = {}",
                "ARR:".bright_white().bold(),
                revenue.subscribers,
                monthly_price,
                format!("${:.0}", revenue.arr).bright_green().bold()
            ),
            RevenueBasis::PlanMix => {
                println!(
                    "{} {} subscribers, {} cancelled, MRR ${:.2} = {}",
                    "ARR:".bright_white().bold(),
                    revenue.subscribers,
                    revenue.cancelled,
                    revenue.mrr,
                    format!("${:.0}", revenue.arr).bright_green().bold()
                );
                for plan in &revenue.plans {
                    println!(
                        "  {:<10} {:>8} subscribers {:>6} cancelled {:>12}",
                        plan.plan.to_string(),
                        plan.subscribers,
                        plan.cancelled,
                        format!("${:.2}/mo", plan.mrr)
                    );
                }
            }
        }
        for opportunity in &revenue.opportunities {
            println!(
                "  +{:.1}pp into {:<13} {:>8.1} subscribers {:>12}",
                opportunity.uplift_points,
                opportunity.stage.to_string(),
                opportunity.additional_subscribers,
                format!("+${:.0}", opportunity.additional_arr).bright_yellow()
            );
        }
    }
    println!();
}

fn print_segments(title: &str, segments: &[SegmentBreakdown]) {
    println!();
    println!("{}", title.bright_white().bold());
    for segment in segments {
        println!(
            "{:<14} {:>8} users, {:>6.2}% activated, {:>6.2}% paid",
            segment.segment, segment.users, segment.activation_rate, segment.paid_conversion_rate
        );
    }
}
