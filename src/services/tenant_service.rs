//! Tenant lifecycle: create, update and delete registry rows together with
//! their physical databases and administrative identities.

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::config;
use crate::database::identity;
use crate::database::manager::{DatabaseError, DatabaseManager};
use crate::database::models::{NewTenant, Role, Tenant};
use crate::database::naming::{schema_name, tenant_db_name, CONTROL_TENANT_ID};
use crate::database::records;
use crate::database::registry::TenantRegistry;
use crate::services::provisioner::{self, ProvisionError};

const MAX_SLUG_LEN: usize = 50;

#[derive(Debug, Error)]
pub enum TenantError {
    #[error("{0}")]
    Validation(String),

    #[error("Tenant {0} not found")]
    NotFound(i64),

    #[error("{0}")]
    Conflict(String),

    #[error("The control tenant's slug cannot be changed")]
    ControlSlugImmutable,

    #[error("The control tenant cannot be deleted")]
    NotDeletable,

    #[error(transparent)]
    Provisioning(#[from] ProvisionError),

    #[error(transparent)]
    Database(DatabaseError),
}

impl From<DatabaseError> for TenantError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Conflict(msg) => TenantError::Conflict(msg),
            other => TenantError::Database(other),
        }
    }
}

impl From<sqlx::Error> for TenantError {
    fn from(err: sqlx::Error) -> Self {
        DatabaseError::from(err).into()
    }
}

impl From<records::RecordError> for TenantError {
    fn from(err: records::RecordError) -> Self {
        match err {
            records::RecordError::Database(db) => db.into(),
            other => TenantError::Validation(other.to_string()),
        }
    }
}

/// Body of `PUT /api/tenants/{id}`; absent fields keep their value
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TenantChanges {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub created_by: Option<String>,
}

/// Lowercase, trimmed, and limited to `[a-z0-9_-]`
pub fn normalize_slug(raw: &str) -> Result<String, TenantError> {
    let slug = raw.trim().to_lowercase();
    if slug.is_empty() {
        return Err(TenantError::Validation("slug is required".to_string()));
    }
    if slug.len() > MAX_SLUG_LEN {
        return Err(TenantError::Validation(format!(
            "slug must be at most {} characters",
            MAX_SLUG_LEN
        )));
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(TenantError::Validation(
            "slug may only contain letters, digits, '-' and '_'".to_string(),
        ));
    }
    Ok(slug)
}

fn normalize_name(raw: &str) -> Result<String, TenantError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(TenantError::Validation("name is required".to_string()));
    }
    Ok(name.to_string())
}

pub async fn list() -> Result<Vec<Tenant>, TenantError> {
    let registry = TenantRegistry::connect().await?;
    Ok(registry.list().await?)
}

pub async fn get(id: i64) -> Result<Tenant, TenantError> {
    let registry = TenantRegistry::connect().await?;
    registry.get(id).await?.ok_or(TenantError::NotFound(id))
}

/// Seed or repair `ADMIN.<SLUG>` in the control database
async fn ensure_control_admin(tenant: &Tenant) -> Result<(), TenantError> {
    let pool = DatabaseManager::control_pool().await?;
    let mut conn = pool.acquire().await?;
    identity::ensure_tenant_admin(
        &mut conn,
        &schema_name(),
        &tenant.binding(),
        &config().security.tenant_admin_default_password,
    )
    .await?;
    Ok(())
}

/// Insert, provision and seed a new tenant. Any failure after the insert
/// removes the registry row again.
pub async fn create(input: NewTenant, actor: &str) -> Result<Tenant, TenantError> {
    let new_tenant = NewTenant {
        name: normalize_name(&input.name)?,
        slug: normalize_slug(&input.slug)?,
        created_by: input
            .created_by
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .or_else(|| Some(actor.to_string())),
    };

    let registry = TenantRegistry::connect().await?;
    let tenant = registry.insert(&new_tenant).await?;
    info!("Registered tenant {} ({})", tenant.id, tenant.slug);

    let seeded = match provisioner::provision(&tenant).await {
        Ok(()) => ensure_control_admin(&tenant).await,
        Err(e) => Err(e.into()),
    };

    if let Err(err) = seeded {
        warn!("Rolling back tenant {} ({}): {}", tenant.id, tenant.slug, err);
        if let Err(cleanup) = registry.delete(tenant.id).await {
            warn!("Failed to remove registry row of tenant {}: {}", tenant.id, cleanup);
        }
        return Err(err);
    }

    Ok(tenant)
}

/// Apply name/slug/creator changes, then re-run provisioning and keep the
/// admin identity in step with the slug.
pub async fn update(id: i64, changes: TenantChanges) -> Result<Tenant, TenantError> {
    let registry = TenantRegistry::connect().await?;
    let current = registry.get(id).await?.ok_or(TenantError::NotFound(id))?;

    let name = match changes.name.as_deref() {
        Some(raw) => normalize_name(raw)?,
        None => current.name.clone(),
    };
    let slug = match changes.slug.as_deref() {
        Some(raw) => normalize_slug(raw)?,
        None => current.slug.clone(),
    };
    if current.is_control() && slug != current.slug {
        return Err(TenantError::ControlSlugImmutable);
    }
    let created_by = changes
        .created_by
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());

    let updated = registry.update(id, &name, &slug, created_by).await?;
    if updated.is_control() {
        return Ok(updated);
    }

    if let Err(err) = apply_update(&current, &updated).await {
        warn!("Reverting tenant {} after failed update: {}", id, err);
        if let Err(revert) = registry
            .update(id, &current.name, &current.slug, current.created_by.as_deref())
            .await
        {
            warn!("Failed to revert tenant {}: {}", id, revert);
        }
        return Err(err);
    }

    Ok(updated)
}

/// Provision the (possibly new) physical database and bring the admin
/// identity in line with the slug.
async fn apply_update(previous: &Tenant, updated: &Tenant) -> Result<(), TenantError> {
    provisioner::provision(updated).await?;
    if updated.slug != previous.slug {
        move_admin_identity(previous, updated).await?;
    }
    ensure_control_admin(updated).await
}

/// `ADMIN.<OLD>` becomes `ADMIN.<NEW>`. When an identity already holds the
/// new name it is bound to the tenant and the old one is left as is.
async fn move_admin_identity(previous: &Tenant, updated: &Tenant) -> Result<(), TenantError> {
    let schema = schema_name();
    let pool = DatabaseManager::control_pool().await?;
    let mut conn = pool.acquire().await?;
    let desired = identity::tenant_admin_username(&updated.slug);

    if let Some(existing) = identity::find_login_candidate(&mut conn, &schema, &desired).await? {
        identity::bind_user(&mut conn, &schema, existing.id, updated.id, Role::Admin).await?;
        info!("Bound existing {} to tenant {}", existing.username, updated.id);
        return Ok(());
    }

    let renamed = identity::rename_user(
        &mut conn,
        &schema,
        &identity::tenant_admin_username(&previous.slug),
        &desired,
    )
    .await?;
    if renamed {
        info!("Renamed admin identity of tenant {} to {}", updated.id, desired);
    }
    Ok(())
}

/// Delete a tenant. With `delete_db` the physical database is dropped and
/// legacy control-database rows naming the tenant are removed too.
pub async fn delete(id: i64, delete_db: bool) -> Result<(), TenantError> {
    if id == CONTROL_TENANT_ID {
        return Err(TenantError::NotDeletable);
    }
    let registry = TenantRegistry::connect().await?;
    let tenant = registry.get(id).await?.ok_or(TenantError::NotFound(id))?;
    if tenant.is_control() {
        return Err(TenantError::NotDeletable);
    }

    let schema = schema_name();
    let pool = DatabaseManager::control_pool().await?;
    let mut conn = pool.acquire().await?;

    if delete_db {
        let database = tenant_db_name(tenant.id, &tenant.slug);
        DatabaseManager::drop_database(&database).await?;
        let removed = records::delete_company_rows(&mut conn, &schema, &tenant.name).await?;
        info!(
            "Dropped {} and {} legacy rows of tenant {}",
            database, removed, tenant.slug
        );
    }

    let identities = identity::delete_by_tenant(&mut conn, &schema, tenant.id).await?;
    registry.delete(tenant.id).await?;
    info!(
        "Deleted tenant {} ({}) and {} identities",
        tenant.id, tenant.slug, identities
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_are_lowercased_and_trimmed() {
        assert_eq!(normalize_slug("  Acme ").unwrap(), "acme");
        assert_eq!(normalize_slug("beta_co-2").unwrap(), "beta_co-2");
    }

    #[test]
    fn rejects_bad_slugs() {
        assert!(matches!(normalize_slug("   "), Err(TenantError::Validation(_))));
        assert!(matches!(normalize_slug("acme corp"), Err(TenantError::Validation(_))));
        assert!(matches!(normalize_slug("açme"), Err(TenantError::Validation(_))));
        assert!(matches!(
            normalize_slug(&"a".repeat(MAX_SLUG_LEN + 1)),
            Err(TenantError::Validation(_))
        ));
    }

    #[test]
    fn slug_conflicts_keep_their_message() {
        let err: TenantError = DatabaseError::Conflict("slug 'acme' is already in use".into()).into();
        assert!(matches!(err, TenantError::Conflict(ref m) if m.contains("acme")));
    }
}
