//! Steadyhand binary.
//!
//! This binary provides the main entry point for steadyhand, a retention and
//! downsampling engine that keeps a bounded raw sample store and folds
//! expired samples into per-minute summaries.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use steadyhand_core::{
    cli::commands::{Commands, LoggingConfig},
    cli::handlers::{
        handle_compact, handle_ingest, handle_recent, handle_run, handle_status, handle_summaries,
    },
    config::{ConfigArgs, LoggingSettings, Settings},
};
use tracing::{info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub logging: LoggingConfig,

    #[command(subcommand)]
    pub command: Commands,
}

fn init_logging(cli: &LoggingConfig, settings: &LoggingSettings) -> Option<WorkerGuard> {
    let level = cli.get_effective_level(&settings.level);
    let filter = cli.log_filter.as_deref().or(settings.filter.as_deref());
    let level: Level = level.parse().unwrap_or(Level::INFO);
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .parse_lossy(filter.unwrap_or(""));

    let (file_layer, guard) = match &settings.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "steadyhand.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with(file_layer)
        .init();

    guard
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load(&cli.config).context("Failed to load configuration")?;
    let _log_guard = init_logging(&cli.logging, &settings.logging);

    info!("Steadyhand starting up");

    match cli.command {
        Commands::Ingest(cmd) => {
            let report = handle_ingest(&settings, cmd.input.as_deref()).await?;
            print_json(&report)?;
        }
        Commands::Compact => {
            let result = handle_compact(&settings).await?;
            print_json(&result)?;
        }
        Commands::Run => {
            handle_run(&settings, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for Ctrl-C: {}", e);
                }
            })
            .await?;
        }
        Commands::Status => {
            let status = handle_status(&settings).await?;
            print_json(&status)?;
        }
        Commands::Recent(cmd) => {
            let samples = handle_recent(&settings, cmd.limit).await?;
            print_json(&samples)?;
        }
        Commands::Summaries => {
            let buckets = handle_summaries(&settings).await?;
            print_json(&buckets)?;
        }
    }

    Ok(())
}
