use std::time::Duration;

use anyhow::Context;
use tracing::info;

use crate::bootstrap::{self, Backoff};
use crate::config::config;
use crate::database::manager::DatabaseManager;
use crate::reconcile;

/// Reconcile every physical database synchronously; the first failure aborts
pub async fn handle() -> anyhow::Result<()> {
    let mut backoff = Backoff::new(Duration::from_secs(config().startup.db_wait_seconds));
    bootstrap::prepare_control(&mut backoff)
        .await
        .context("control database is not available")?;

    let count = reconcile::reconcile_all()
        .await
        .context("reconciliation failed")?;
    info!("Reconciled {} database(s)", count);

    DatabaseManager::close_all().await;
    Ok(())
}
