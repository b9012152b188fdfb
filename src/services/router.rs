//! Per-request tenant routing.
//!
//! Verified claims (plus an optional explicit target) resolve to one tenant,
//! whose physical database is reconciled on first use and handed back as a
//! [`TenantSession`] holding a pooled connection.

use thiserror::Error;
use tracing::debug;

use crate::auth::Claims;
use crate::database::manager::{DatabaseError, DatabaseManager};
use crate::database::models::Tenant;
use crate::database::naming::{schema_name, PhysicalDatabase};
use crate::database::registry::TenantRegistry;
use crate::database::session::TenantSession;
use crate::error::bounded_diagnostic;
use crate::reconcile::{self, ReconcileTarget};

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Token is not bound to a tenant")]
    InvalidBinding,

    #[error("Tenant {0} no longer exists")]
    UnknownTenant(i64),

    #[error("Tenant {0} not found")]
    TargetNotFound(i64),

    #[error("failed to reconcile {database}: {diagnostic}")]
    Reconcile { database: String, diagnostic: String },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Whose data a request operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    /// The caller's own tenant
    Own(i64),
    /// An explicit tenant chosen by a privileged caller
    Explicit(i64),
}

impl RouteTarget {
    pub fn tenant_id(&self) -> i64 {
        match self {
            RouteTarget::Own(id) | RouteTarget::Explicit(id) => *id,
        }
    }
}

/// Reject tokens without a usable tenant binding
pub fn validate_binding(claims: &Claims) -> Result<(), RouteError> {
    if claims.tenant_id <= 0 || claims.tenant_slug.trim().is_empty() {
        return Err(RouteError::InvalidBinding);
    }
    Ok(())
}

/// An explicit target is honored only for privileged callers; everyone else
/// silently falls back to their own tenant.
pub fn resolve_target(claims: &Claims, requested: Option<i64>) -> RouteTarget {
    match requested {
        Some(id) if id > 0 && claims.is_privileged() && id != claims.tenant_id => {
            RouteTarget::Explicit(id)
        }
        _ => RouteTarget::Own(claims.tenant_id),
    }
}

/// Resolve the tenant row for this request
pub async fn resolve_tenant(
    registry: &TenantRegistry,
    claims: &Claims,
    requested: Option<i64>,
) -> Result<Tenant, RouteError> {
    validate_binding(claims)?;
    let target = resolve_target(claims, requested);

    match registry.get(target.tenant_id()).await? {
        Some(tenant) => Ok(tenant),
        None => match target {
            RouteTarget::Own(id) => Err(RouteError::UnknownTenant(id)),
            RouteTarget::Explicit(id) => Err(RouteError::TargetNotFound(id)),
        },
    }
}

/// Session for the tenant the request resolves to
pub async fn open_session(claims: &Claims, requested: Option<i64>) -> Result<TenantSession, RouteError> {
    let registry = TenantRegistry::connect().await?;
    let tenant = resolve_tenant(&registry, claims, requested).await?;
    debug!(
        "Routing {} to tenant {} ({})",
        claims.sub, tenant.id, tenant.slug
    );
    open_tenant_session(&tenant).await
}

/// Reconcile (once per process) and open a session on `tenant`'s database.
/// Reconciliation failures surface as provisioning errors.
pub async fn open_tenant_session(tenant: &Tenant) -> Result<TenantSession, RouteError> {
    let schema = schema_name();
    let (target, database) = match tenant.physical_database() {
        PhysicalDatabase::Control => (
            ReconcileTarget::Control,
            DatabaseManager::control_database_name()?,
        ),
        PhysicalDatabase::Tenant(name) => (ReconcileTarget::Tenant(tenant.binding()), name),
    };

    reconcile::ensure_reconciled(&target)
        .await
        .map_err(|e| RouteError::Reconcile {
            database: database.clone(),
            diagnostic: format!(
                "failed to provision tenant database (db=\"{}\", schema=\"{}\"): {}",
                database,
                schema,
                bounded_diagnostic(&e.detail(), "ReconcileError")
            ),
        })?;

    let pool = match target {
        ReconcileTarget::Control => DatabaseManager::control_pool().await?,
        ReconcileTarget::Tenant(_) => DatabaseManager::tenant_pool(&database).await?,
    };
    let conn = pool.acquire().await.map_err(DatabaseError::from)?;

    Ok(TenantSession::new(tenant.binding(), database, schema, conn))
}
