//! pimetrics binary entry point.
//!
//! Loads probe definitions, schedules them and reports every sample to the
//! log until the run completes or the process is interrupted.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pimetrics::{
    Scheduler,
    config::{AppConfig, parse_duration},
    sink::{LogSink, Sink},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// pimetrics - periodic system and API probes
#[derive(Parser, Debug)]
#[command(name = "pimetrics", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/pimetrics.yaml",
        env = "PIMETRICS_CONFIG"
    )]
    config: String,

    /// Run every probe once and exit
    #[arg(long)]
    once: bool,

    /// Stop after this long (e.g. "30s", "5m")
    #[arg(long, value_parser = parse_duration)]
    duration: Option<Duration>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pimetrics=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    tracing::info!(path = %cli.config, "Loading configuration");
    let config = AppConfig::load_with_probe_path(&cli.config)?;

    let sink: Arc<dyn Sink> = Arc::new(LogSink);
    let mut scheduler = Scheduler::new();

    for (probe_config, interval) in config.scheduled_probes() {
        let probe = match probe_config.build(Arc::clone(&sink)) {
            Ok(probe) => probe,
            Err(e) => {
                tracing::error!(
                    probe = %probe_config.name,
                    kind = probe_config.source.kind(),
                    error = %e,
                    "Failed to build probe, skipping"
                );
                continue;
            }
        };
        scheduler.register_boxed(probe, interval)?;
    }

    tracing::info!(
        scheduled = scheduler.len(),
        configured = config.probes.len(),
        "Probes scheduled"
    );
    if !cli.once {
        tracing::info!("Press Ctrl+C to shutdown");
    }

    tokio::select! {
        result = scheduler.run(cli.once, cli.duration) => result?,
        _ = shutdown_signal() => {}
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolve when Ctrl+C or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
