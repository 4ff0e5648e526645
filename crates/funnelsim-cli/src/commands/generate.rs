use anyhow::Context;
use clap::Args;
use colored::Colorize;
use funnelsim_core::GeneratorConfig;
use funnelsim_generator::{write_dataset, FunnelGenerator};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Args)]
pub struct GenerateCommand {
    /// Configuration file (YAML, or JSON with a .json extension)
    #[arg(long, env = "FUNNELSIM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the number of users to simulate
    #[arg(long, env = "FUNNELSIM_USERS")]
    pub users: Option<u64>,

    /// Override the random seed
    #[arg(long, env = "FUNNELSIM_SEED")]
    pub seed: Option<u64>,

    /// Directory for events.csv and users.csv
    #[arg(long, env = "FUNNELSIM_OUTPUT_DIR", default_value = "data")]
    pub output_dir: PathBuf,
}

impl GenerateCommand {
    fn load_config(&self) -> anyhow::Result<GeneratorConfig> {
        let mut config = match &self.config {
            Some(path) => GeneratorConfig::from_path(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => GeneratorConfig::default(),
        };

        if let Some(users) = self.users {
            config.user_count = users;
        }
        if let Some(seed) = self.seed {
            config.random_seed = seed;
        }
        Ok(config)
    }

    pub fn execute(self) -> anyhow::Result<()> {
        let config = self.load_config()?;
        let generator = FunnelGenerator::new(&config).context("Invalid generator configuration")?;

        info!(
            "Generating {} users with seed {}",
            config.user_count, config.random_seed
        );

        let pb = ProgressBar::new(generator.user_count());
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} users ({eta})")?
                .progress_chars("█▓▒░  "),
        );

        let summary = write_dataset(&generator, &self.output_dir, |_| pb.inc(1));
        pb.finish_and_clear();
        let summary = summary.with_context(|| {
            format!("Failed to write dataset to {}", self.output_dir.display())
        })?;
        debug!("Dataset summary: {:?}", summary);

        println!();
        println!("{}", "✅ Dataset generated".bright_green().bold());
        println!(
            "{} {}",
            "Users:".bright_white().bold(),
            summary.users.to_string().bright_cyan()
        );
        println!(
            "{} {}",
            "Events:".bright_white().bold(),
            summary.events.to_string().bright_cyan()
        );
        println!(
            "{} {} ({:.2}% paid conversion)",
            "Subscriptions:".bright_white().bold(),
            summary.subscriptions.to_string().bright_cyan(),
            summary.paid_conversion_rate() * 100.0
        );
        println!(
            "{} {}",
            "Cancelled:".bright_white().bold(),
            summary.cancellations.to_string().bright_cyan()
        );
        println!(
            "{} {}",
            "Event log:".bright_white().bold(),
            summary.events_path.display().to_string().bright_yellow()
        );
        println!(
            "{} {}",
            "Users table:".bright_white().bold(),
            summary.users_path.display().to_string().bright_yellow()
        );
        println!(
            "{} {}",
            "Subscriptions table:".bright_white().bold(),
            summary.subscriptions_path.display().to_string().bright_yellow()
        );
        println!();

        Ok(())
    }
}
