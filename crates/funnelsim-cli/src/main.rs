//! Funnelsim CLI - generate, summarize and verify synthetic funnel datasets

mod commands;

use clap::{Parser, Subcommand};
use commands::{ConfigCommand, GenerateCommand, SummarizeCommand, VerifyCommand};
use tracing_subscriber::{layer::SubscriberExt, Layer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "FUNNELSIM_LOG_LEVEL",
        global = true
    )]
    log_level: String,

    /// Log format: compact, full
    #[arg(
        long,
        default_value = "compact",
        env = "FUNNELSIM_LOG_FORMAT",
        global = true
    )]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a synthetic event log and users table
    Generate(GenerateCommand),
    /// Conversion tables and revenue estimates from an event log
    Summarize(SummarizeCommand),
    /// Check an event log for ordering and funnel violations
    Verify(VerifyCommand),
    /// Print the default configuration as YAML
    Config(ConfigCommand),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // If RUST_LOG is set, use it directly; otherwise cover our crates at --log-level
    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .expect("Invalid RUST_LOG environment variable")
    } else {
        tracing_subscriber::EnvFilter::new(format!(
            "funnelsim={level},\
             funnelsim_cli={level},\
             funnelsim_core={level},\
             funnelsim_generator={level},\
             funnelsim_analytics={level}",
            level = cli.log_level
        ))
    };

    let fmt_layer = match cli.log_format.as_str() {
        "full" => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(std::io::stderr)
            .boxed(),
        _ => tracing_subscriber::fmt::layer() // "compact" or any other value
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set global default subscriber");

    match cli.command {
        Commands::Generate(generate_cmd) => generate_cmd.execute(),
        Commands::Summarize(summarize_cmd) => summarize_cmd.execute(),
        Commands::Verify(verify_cmd) => verify_cmd.execute(),
        Commands::Config(config_cmd) => config_cmd.execute(),
    }
}
