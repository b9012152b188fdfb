//! Schema reconciliation.
//!
//! Brings a physical database up to the baseline shape with idempotent
//! `ensure_*` steps. Every step returns a `Result`; callers choose the policy:
//! request paths propagate failures, startup logs and moves on.

pub mod baseline;
pub mod catalog;
pub mod ensure;

use once_cell::sync::Lazy;
use sqlx::PgConnection;
use std::collections::HashSet;
use std::sync::RwLock;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::config;
use crate::database::manager::{DatabaseError, DatabaseManager};
use crate::database::models::TenantBinding;
use crate::database::naming::{schema_name, tenant_db_name};
use crate::database::registry::TenantRegistry;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("{step}: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl ReconcileError {
    /// Driver message without the step prefix, for client diagnostics
    pub fn detail(&self) -> String {
        match self {
            ReconcileError::Step { source, .. } => match source.as_database_error() {
                Some(db) => db.message().to_string(),
                None => source.to_string(),
            },
            ReconcileError::Database(e) => e.to_string(),
        }
    }
}

trait StepExt<T> {
    fn step(self, step: &'static str) -> Result<T, ReconcileError>;
}

impl<T> StepExt<T> for Result<T, sqlx::Error> {
    fn step(self, step: &'static str) -> Result<T, ReconcileError> {
        self.map_err(|source| ReconcileError::Step { step, source })
    }
}

/// Which physical database is being reconciled
#[derive(Debug, Clone)]
pub enum ReconcileTarget {
    /// The bootstrap database: registry, identities and legacy records
    Control,
    /// A tenant database hosting exactly one tenant
    Tenant(TenantBinding),
}

impl ReconcileTarget {
    pub fn is_control(&self) -> bool {
        matches!(self, ReconcileTarget::Control)
    }

    pub fn database_name(&self) -> Result<String, DatabaseError> {
        match self {
            ReconcileTarget::Control => DatabaseManager::control_database_name(),
            ReconcileTarget::Tenant(t) => Ok(tenant_db_name(t.id, &t.slug)),
        }
    }
}

// Physical databases reconciled during this process lifetime. Append-only;
// losing it on restart only costs a redundant idempotent pass.
static WATERMARK: Lazy<RwLock<HashSet<String>>> = Lazy::new(|| RwLock::new(HashSet::new()));

pub fn is_reconciled(database: &str) -> bool {
    match WATERMARK.read() {
        Ok(set) => set.contains(database),
        Err(poisoned) => poisoned.into_inner().contains(database),
    }
}

pub(crate) fn mark_reconciled(database: &str) {
    let mut set = match WATERMARK.write() {
        Ok(set) => set,
        Err(poisoned) => poisoned.into_inner(),
    };
    set.insert(database.to_string());
}

/// Run every step, in order, against one physical database.
///
/// Tables and columns exist before any backfill touches them, and indexes
/// come last.
pub async fn reconcile_database(
    conn: &mut PgConnection,
    schema: &str,
    target: &ReconcileTarget,
) -> Result<(), ReconcileError> {
    let control = target.is_control();
    let tables = baseline::tables_for(control);

    ensure::ensure_schema(&mut *conn, schema).await.step("ensure_schema")?;
    if control {
        ensure::repair_legacy_tables(&mut *conn, schema)
            .await
            .step("repair_legacy_tables")?;
    }
    ensure::ensure_tables(&mut *conn, schema, &tables)
        .await
        .step("ensure_tables")?;
    ensure::ensure_columns(&mut *conn, schema, &tables)
        .await
        .step("ensure_columns")?;
    ensure::ensure_users_column_order(&mut *conn, schema)
        .await
        .step("ensure_users_column_order")?;

    match target {
        ReconcileTarget::Control => {
            let security = &config().security;
            ensure::ensure_control_tenant(&mut *conn, schema)
                .await
                .step("ensure_control_tenant")?;
            ensure::ensure_bootstrap_admin(
                &mut *conn,
                schema,
                &security.bootstrap_admin_username,
                &security.bootstrap_admin_password,
            )
            .await
            .step("ensure_bootstrap_admin")?;
            ensure::backfill_control(&mut *conn, schema)
                .await
                .step("backfill_control")?;
        }
        ReconcileTarget::Tenant(tenant) => {
            ensure::backfill_tenant(&mut *conn, schema, tenant)
                .await
                .step("backfill_tenant")?;
        }
    }

    ensure::ensure_tenant_indexes(&mut *conn, schema)
        .await
        .step("ensure_tenant_indexes")?;
    Ok(())
}

/// Reconcile one target unconditionally and record it in the watermark.
/// A missing tenant database is created first.
pub async fn reconcile_target(target: &ReconcileTarget) -> Result<(), ReconcileError> {
    let database = target.database_name()?;
    let pool = match target {
        ReconcileTarget::Control => DatabaseManager::control_pool().await?,
        ReconcileTarget::Tenant(_) => {
            DatabaseManager::create_database_if_absent(&database).await?;
            DatabaseManager::tenant_pool(&database).await?
        }
    };

    let mut conn = pool.acquire().await.map_err(DatabaseError::from)?;
    reconcile_database(&mut conn, &schema_name(), target).await?;

    mark_reconciled(&database);
    info!("Reconciled database {}", database);
    Ok(())
}

/// Reconcile unless already done during this process lifetime
pub async fn ensure_reconciled(target: &ReconcileTarget) -> Result<(), ReconcileError> {
    let database = target.database_name()?;
    if is_reconciled(&database) {
        return Ok(());
    }
    reconcile_target(target).await
}

/// Control database first, then every registered tenant. Stops at the first failure.
pub async fn reconcile_all() -> Result<usize, ReconcileError> {
    reconcile_target(&ReconcileTarget::Control).await?;

    let registry = TenantRegistry::connect().await?;
    let mut count = 1;
    for tenant in registry.list().await?.into_iter().filter(|t| !t.is_control()) {
        reconcile_target(&ReconcileTarget::Tenant(tenant.binding())).await?;
        count += 1;
    }
    Ok(count)
}

/// Tenant databases are reconciled opportunistically: failures are logged
/// and retried by the next request that routes there. Returns the number of
/// tenants that failed.
pub async fn reconcile_tenants_best_effort() -> Result<usize, ReconcileError> {
    let registry = TenantRegistry::connect().await?;
    let mut failed = 0;
    for tenant in registry.list().await?.into_iter().filter(|t| !t.is_control()) {
        let target = ReconcileTarget::Tenant(tenant.binding());
        if let Err(e) = ensure_reconciled(&target).await {
            warn!("Best-effort reconciliation of tenant {} ({}) failed: {}", tenant.id, tenant.slug, e);
            failed += 1;
        }
    }
    Ok(failed)
}
