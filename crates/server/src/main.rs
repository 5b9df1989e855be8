mod bootstrap;
mod health;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use jirabot_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use tokio::sync::watch;

#[derive(Debug, Parser)]
#[command(
    name = "jirabot",
    about = "Slack bot that files Jira issues from modal forms",
    after_help = "Examples:\n  jirabot --config jirabot.toml\n  jirabot --log-level debug --grace-period 60"
)]
struct Args {
    #[arg(long, value_name = "PATH", help = "Configuration file (defaults to jirabot.toml)")]
    config: Option<PathBuf>,
    #[arg(long, help = "Log level: trace, debug, info, warn or error")]
    log_level: Option<String>,
    #[arg(long = "grace-period", value_name = "SECONDS", help = "How long shutdown waits for in-flight filings")]
    grace_period_secs: Option<u64>,
    #[arg(long, help = "Port for the health endpoint")]
    port: Option<u16>,
}

impl Args {
    fn load_options(self) -> LoadOptions {
        LoadOptions {
            require_file: self.config.is_some(),
            config_path: self.config,
            overrides: ConfigOverrides {
                log_level: self.log_level,
                graceful_shutdown_secs: self.grace_period_secs,
                health_check_port: self.port,
                ..ConfigOverrides::default()
            },
        }
    }
}

fn init_logging(config: &AppConfig) {
    use jirabot_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run(Args::parse()).await
}

async fn run(args: Args) -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(args.load_options())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config)?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        health::HealthState::new(app.registry.clone(), app.tasks.clone()),
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown().await;
        tracing::info!(
            event_name = "system.shutdown.requested",
            correlation_id = "shutdown",
            "shutdown signal received; stopping receive loop"
        );
        let _ = shutdown_tx.send(true);
    });

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        grace_period_secs = app.config.server.graceful_shutdown_secs,
        "jirabot started"
    );
    let report = app.slack_runner.run(shutdown_rx).await;
    tracing::info!(
        event_name = "system.shutdown.complete",
        correlation_id = "shutdown",
        completed = report.completed,
        abandoned = report.abandoned,
        "jirabot stopped"
    );

    Ok(())
}

async fn wait_for_shutdown() {
    let interrupt = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {}
        () = terminate => {}
    }
}
