use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use crate::app::{build_router, AppState};
use crate::bootstrap::{self, Backoff};
use crate::config::config;
use crate::database::manager::DatabaseManager;

pub async fn handle(port: Option<u16>) -> anyhow::Result<()> {
    let config = config();
    info!("Starting Executive API in {:?} mode", config.environment);
    if crate::is_development!() {
        warn!("Development mode: CORS is permissive and default secrets may be in use");
    }

    let mut backoff = Backoff::new(Duration::from_secs(config.startup.db_wait_seconds));
    bootstrap::prepare_control(&mut backoff)
        .await
        .context("control database is not available")?;
    tokio::spawn(bootstrap::reconcile_tenants(backoff));

    let state = AppState::from_config().context("invalid blob store configuration")?;
    let app = build_router(state);

    let bind_addr = format!("0.0.0.0:{}", port.unwrap_or(config.api.port));
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    DatabaseManager::close_all().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
