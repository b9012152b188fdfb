//! Login: credential check against the control database's identity table,
//! tenant selection, and token issue.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::{verify_password, AuthError, TokenCodec};
use crate::config::config;
use crate::database::identity;
use crate::database::manager::DatabaseManager;
use crate::database::models::{Role, Tenant, TenantBinding, User};
use crate::database::naming::{schema_name, CONTROL_TENANT_ID};
use crate::database::registry::TenantRegistry;

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub tenant_slug: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub username: String,
    pub role: Role,
    pub name: Option<String>,
    pub profile: Option<String>,
    pub tenant: TenantBinding,
    pub superadmin: bool,
}

/// The configured bootstrap administrator, compared case-insensitively
pub fn is_bootstrap_admin(username: &str) -> bool {
    username
        .trim()
        .eq_ignore_ascii_case(config().security.bootstrap_admin_username.trim())
}

/// Tenant asked for explicitly, else implied by an `ADMIN.<SLUG>` username
pub fn requested_slug(tenant_slug: Option<&str>, username: &str) -> Option<String> {
    tenant_slug
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .or_else(|| identity::admin_username_slug(username))
}

fn check_password(user: &User, password: &str) -> Result<(), AuthError> {
    match (user.password_salt.as_deref(), user.password_hash.as_deref()) {
        (Some(salt), Some(hash)) if verify_password(password, salt, hash) => Ok(()),
        _ => Err(AuthError::InvalidCredentials),
    }
}

pub async fn login(tokens: &TokenCodec, request: LoginRequest) -> Result<LoginResponse, AuthError> {
    let username = request.username.trim();
    if username.is_empty() || request.password.is_empty() {
        return Err(AuthError::Validation(
            "username and password are required".to_string(),
        ));
    }

    let schema = schema_name();
    let pool = DatabaseManager::control_pool().await?;
    let mut conn = pool.acquire().await?;
    let registry = TenantRegistry::new(pool.clone(), &schema);

    let user = identity::find_login_candidate(&mut conn, &schema, username)
        .await?
        .ok_or(AuthError::InvalidCredentials)?;
    if !user.is_active() {
        return Err(AuthError::Inactive);
    }
    check_password(&user, &request.password)?;

    let tenant = if is_bootstrap_admin(&user.username) {
        if user.role() != Role::Superadmin {
            warn!("Bootstrap administrator {} lacks the SUPERADMIN role", user.username);
            return Err(AuthError::InvalidCredentials);
        }
        if user.tenant_id != CONTROL_TENANT_ID {
            identity::rebind_tenant(&mut conn, &schema, user.id, CONTROL_TENANT_ID).await?;
        }
        registry
            .get(CONTROL_TENANT_ID)
            .await?
            .ok_or_else(|| AuthError::TenantNotFound(CONTROL_TENANT_ID.to_string()))?
    } else {
        select_tenant(&registry, &mut conn, &schema, &user, request.tenant_slug.as_deref()).await?
    };

    let role = user.role();
    let token = tokens.issue(&user.username, role, tenant.id, &tenant.slug)?;
    let superadmin = role == Role::Superadmin && tenant.is_control();
    info!("Login {} -> tenant {} ({})", user.username, tenant.id, tenant.slug);

    Ok(LoginResponse {
        token,
        username: user.username,
        role,
        name: user.name,
        profile: user.profile,
        tenant: tenant.binding(),
        superadmin,
    })
}

/// A requested tenant other than the bound one is accepted only when the
/// bound tenant is gone; the identity is then rebound to it.
async fn select_tenant(
    registry: &TenantRegistry,
    conn: &mut sqlx::PgConnection,
    schema: &str,
    user: &User,
    tenant_slug: Option<&str>,
) -> Result<Tenant, AuthError> {
    let bound = registry.get(user.tenant_id).await?;

    let Some(slug) = requested_slug(tenant_slug, &user.username) else {
        return bound.ok_or_else(|| AuthError::TenantNotFound(user.tenant_id.to_string()));
    };

    let requested = registry
        .find_by_slug(&slug)
        .await?
        .ok_or_else(|| AuthError::TenantNotFound(slug.clone()))?;
    if requested.id == user.tenant_id {
        return Ok(requested);
    }

    match bound {
        Some(_) => Err(AuthError::TenantMismatch),
        None => {
            info!(
                "Rebinding {} from missing tenant {} to {}",
                user.username, user.tenant_id, requested.id
            );
            identity::rebind_tenant(conn, schema, user.id, requested.id).await?;
            Ok(requested)
        }
    }
}
