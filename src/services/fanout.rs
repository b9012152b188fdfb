//! Cross-tenant listing for privileged callers.
//!
//! The registry is re-read on every call. Tenants are queried with bounded
//! concurrency and the merged result is ordered by `(tenant_name, id)`.
//! The first tenant that fails aborts the whole aggregate, and the error
//! names that tenant.

use futures::{StreamExt, TryStreamExt};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::config;
use crate::database::manager::DatabaseError;
use crate::database::models::{Tenant, TenantBinding};
use crate::database::naming::CONTROL_TENANT_SLUG;
use crate::database::records::{self, EntityKind, RecordError};
use crate::database::registry::TenantRegistry;
use crate::services::router::{self, RouteError};

#[derive(Debug, Error)]
pub enum TenantFailure {
    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Records(#[from] RecordError),
}

#[derive(Debug, Error)]
pub enum FanoutError {
    #[error(transparent)]
    Registry(#[from] DatabaseError),

    #[error("tenant {tenant_id} ({slug}): {source}")]
    Tenant {
        tenant_id: i64,
        slug: String,
        #[source]
        source: Box<TenantFailure>,
    },
}

/// Tenants selected by an optional name filter. The filter matches a
/// tenant's name or slug, case-insensitively. A caller from the control
/// tenant filtering on the control slug itself gets every tenant.
pub fn select_tenants(tenants: Vec<Tenant>, filter: Option<&str>, caller_is_control: bool) -> Vec<Tenant> {
    let filter = filter.map(str::trim).filter(|f| !f.is_empty());
    let filter = match filter {
        Some(f) if caller_is_control && f.eq_ignore_ascii_case(CONTROL_TENANT_SLUG) => None,
        other => other.map(str::to_lowercase),
    };

    match filter {
        None => tenants,
        Some(f) => tenants
            .into_iter()
            .filter(|t| t.name.trim().to_lowercase() == f || t.slug.trim().to_lowercase() == f)
            .collect(),
    }
}

/// The row's own `tenant_name`, else the name of the tenant it came from
fn sort_name(row: &Value, tenant: &TenantBinding) -> String {
    row.get("tenant_name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(&tenant.name)
        .to_string()
}

/// Concatenate per-tenant batches and stable-sort by `(tenant_name, id)`.
/// Names compare case-sensitively (byte order), so `Zed` sorts before `acme`.
pub fn merge_sorted(batches: Vec<(TenantBinding, Vec<Value>)>) -> Vec<Value> {
    let mut keyed: Vec<(String, i64, Value)> = batches
        .into_iter()
        .flat_map(|(tenant, rows)| {
            rows.into_iter()
                .map(|row| {
                    let name = sort_name(&row, &tenant);
                    let id = row.get("id").and_then(Value::as_i64).unwrap_or(0);
                    (name, id, row)
                })
                .collect::<Vec<_>>()
        })
        .collect();

    keyed.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));
    keyed.into_iter().map(|(_, _, row)| row).collect()
}

async fn list_one(tenant: Tenant, kind: EntityKind) -> Result<(TenantBinding, Vec<Value>), FanoutError> {
    let wrap = |source: TenantFailure| FanoutError::Tenant {
        tenant_id: tenant.id,
        slug: tenant.slug.clone(),
        source: Box::new(source),
    };

    let mut session = router::open_tenant_session(&tenant)
        .await
        .map_err(|e| wrap(e.into()))?;
    let (conn, schema, binding) = session.parts();
    let rows = records::list(conn, schema, kind, binding)
        .await
        .map_err(|e| wrap(e.into()))?;

    debug!("Fan-out: {} rows from tenant {}", rows.len(), tenant.slug);
    Ok((tenant.binding(), rows))
}

/// Every tenant's `kind` records, merged. Callers must be privileged.
pub async fn list_across_tenants(
    kind: EntityKind,
    filter: Option<&str>,
    caller_is_control: bool,
) -> Result<Vec<Value>, FanoutError> {
    let registry = TenantRegistry::connect().await?;
    let tenants = select_tenants(registry.list().await?, filter, caller_is_control);
    let concurrency = config().fanout.concurrency.max(1);

    // buffered() yields in input order, so batches stay in registry order
    let batches: Vec<(TenantBinding, Vec<Value>)> = futures::stream::iter(tenants)
        .map(|tenant| list_one(tenant, kind))
        .buffered(concurrency)
        .try_collect()
        .await?;

    Ok(merge_sorted(batches))
}
