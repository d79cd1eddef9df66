//! `orderflow` service binary.

use anyhow::{Context, Result};
use orderflow_service::{telemetry, Service, ServiceConfig};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServiceConfig::from_env().context("invalid configuration")?;
    telemetry::init(config.log_format)?;

    info!(
        http_addr = %config.http_addr,
        max_attempts = config.pipeline.backoff.max_attempts.into_inner(),
        simulate_stock_failures = config.pipeline.stock.simulate_failures,
        "starting orderflow"
    );

    let listener = TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;
    let service = Service::new(config).context("failed to provision topics")?;

    let stats = service.run(listener, shutdown_signal()).await?;
    info!(
        acknowledged = stats.orders.acknowledged,
        redeliveries = stats.orders.redeliveries,
        dead_lettered = stats.orders.dead_lettered,
        dead_letters_reported = stats.dead_letters.acknowledged,
        "orderflow stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
