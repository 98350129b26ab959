mod config;
mod observability;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use suggest_router::config::ValidationError;
use suggest_router::errors::SuggestRouterError;

#[derive(Parser)]
#[command(name = "suggestd", about = "Suggest orchestration daemon")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, short, default_value = "suggestd.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone, Copy)]
enum CliCommand {
    /// Serve suggest traffic (default)
    Run,
    /// Load and validate the configuration, then exit
    ValidateConfig,
    /// Print every metric the daemon emits
    ListMetrics,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Metrics(#[from] observability::MetricsInitError),
    #[error(transparent)]
    Router(#[from] SuggestRouterError),
    #[error("runtime error: {0}")]
    Io(#[from] std::io::Error),
}

fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(CliCommand::Run) {
        CliCommand::ListMetrics => {
            for def in observability::all_metrics() {
                println!(
                    "{}\t{}\t{}",
                    def.name,
                    def.metric_type.as_str(),
                    def.description
                );
            }
            Ok(())
        }
        CliCommand::ValidateConfig => {
            let config = config::Config::from_file(&cli.config)?;
            config.suggest.validate()?;
            println!("{}: configuration is valid", cli.config.display());
            Ok(())
        }
        CliCommand::Run => run(cli.config),
    }
}

fn run(path: PathBuf) -> Result<(), CliError> {
    let config = config::Config::from_file(&path)?;
    let _sentry = observability::init_logging(config.common.logging.as_ref());

    if let Some(metrics_config) = &config.common.metrics {
        observability::init_metrics(metrics_config)?;
    }

    tracing::info!(config = %path.display(), "starting suggestd");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(suggest_router::run(config.suggest, shutdown_signal()))?;

    tracing::info!("suggestd stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or on SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
