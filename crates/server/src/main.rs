mod bootstrap;
mod health;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parley_agent::DialogueRuntime;
use parley_core::config::{AppConfig, LoadOptions, LoggingConfig};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &LoggingConfig) {
    use parley_core::config::LogFormat::*;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);

    match config.format {
        Compact => builder.compact().init(),
        Pretty => builder.pretty().init(),
        Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config.logging);

    let app = match bootstrap::bootstrap_with_config(config).await {
        Ok(app) => app,
        Err(bootstrap_error) => {
            error!(
                event_name = "system.bootstrap.failed",
                correlation_id = "bootstrap",
                error = %bootstrap_error,
                "initialization failed, refusing to serve"
            );
            return Err(bootstrap_error.into());
        }
    };

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let listener =
        health::bind(&app.config.server.bind_address, app.config.server.health_check_port).await?;
    let health_task = tokio::spawn(health::serve(
        listener,
        health::HealthState::new(app.db_pool.clone(), app.runtime.clone()),
        async move {
            let _ = shutdown_rx.changed().await;
        },
    ));
    spawn_catalog_reloader(app.runtime.clone())?;

    info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        catalog_generation = app.runtime.catalog_generation(),
        "parley-server started"
    );
    tokio::signal::ctrl_c().await?;
    info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "parley-server stopping"
    );

    let _ = shutdown_tx.send(true);
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, health_task).await.is_err() {
        warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "health endpoint did not stop within the grace period"
        );
    }
    app.db_pool.close().await;

    Ok(())
}

/// SIGHUP invalidates the catalog cache and refits the pipeline on the new
/// generation. A failed reload keeps serving the previous snapshot.
#[cfg(unix)]
fn spawn_catalog_reloader(runtime: Arc<DialogueRuntime>) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            match runtime.refresh_catalog().await {
                Ok(generation) => info!(
                    event_name = "system.catalog.reloaded",
                    correlation_id = "sighup",
                    catalog_generation = generation,
                    "catalog reloaded on SIGHUP"
                ),
                Err(reload_error) => warn!(
                    event_name = "system.catalog.reload_failed",
                    correlation_id = "sighup",
                    error = %reload_error,
                    "catalog reload failed, keeping the previous snapshot"
                ),
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_catalog_reloader(_runtime: Arc<DialogueRuntime>) -> std::io::Result<()> {
    Ok(())
}
