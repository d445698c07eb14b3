mod bootstrap;
mod health;
pub mod routes;

use anyhow::Result;
use tracing::info;

use bookline_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use bookline_core::config::LogFormat::*;
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
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
    )
    .await?;

    if let Some(sweeper) = app.sweeper {
        info!(
            event_name = "system.server.sweeper_started",
            interval_secs = app.config.sweeper.interval_secs,
            "completion sweeper started"
        );
        tokio::spawn(sweeper.run());
    } else {
        info!(event_name = "system.server.sweeper_disabled", "completion sweeper disabled");
    }

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(
        event_name = "system.server.started",
        bind_address = %address,
        "bookline-server started"
    );

    axum::serve(listener, routes::router(app.state))
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    info!(event_name = "system.server.stopping", "bookline-server stopping");
    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(signal_error) = tokio::signal::ctrl_c().await {
        tracing::warn!(
            event_name = "system.server.signal_error",
            error = %signal_error,
            "could not listen for shutdown signal"
        );
    }
}
