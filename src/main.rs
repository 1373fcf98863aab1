//! Panelist CLI entry point.

use anyhow::Result;
use clap::Parser;
use panelist::cli::{commands, Cli, Commands};
use panelist::config::Settings;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("panelist={}", log_level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config_path = cli.config.as_ref().map(PathBuf::from);
    let settings = Settings::load_from(config_path.as_ref())?;
    std::fs::create_dir_all(settings.data_dir())?;

    match cli.command {
        Commands::Generate {
            request,
            panel,
            urls,
            text,
            languages,
            words,
            segments,
            longform,
            guidance,
            cron,
            output,
        } => {
            let args = commands::GenerateArgs {
                request,
                panel,
                urls,
                text,
                languages,
                words,
                segments,
                longform,
                guidance,
                cron,
                output,
            };
            commands::run_generate(args, settings).await?;
        }

        Commands::Fetch { request, limit } => {
            commands::run_fetch(request.as_deref(), limit, settings).await?;
        }

        Commands::Resolve { url } => {
            commands::run_resolve(&url, settings).await?;
        }

        Commands::Schedule { watch, interval } => {
            commands::run_schedule(watch, interval, settings).await?;
        }

        Commands::Config { action } => {
            commands::run_config(&action, config_path, settings)?;
        }
    }

    Ok(())
}
