//! Identity rows (`users`). Usernames are unique across all tenants in the
//! control database; tenant databases hold a copy of their own admin.

use sqlx::PgConnection;

use super::manager::is_unique_violation;
use super::models::{Role, TenantBinding, User};
use super::naming::qualified;
use crate::auth::password::hash_password;
use crate::reconcile::baseline::USERS_TABLE;

const USER_COLUMNS: &str = "id::bigint AS id, name, username, tenant_id::bigint AS tenant_id, \
     role, job_title, profile, email, password_salt, password_hash, \
     COALESCE(active, 1)::int AS active";

pub struct NewUser<'a> {
    pub name: &'a str,
    pub username: &'a str,
    pub tenant_id: i64,
    pub role: Role,
    pub password: &'a str,
}

/// `ADMIN.<SLUG>`
pub fn tenant_admin_username(slug: &str) -> String {
    format!("ADMIN.{}", slug.trim().to_uppercase())
}

/// Slug implied by an `ADMIN.<SLUG>` username
pub fn admin_username_slug(username: &str) -> Option<String> {
    let upper = username.trim().to_uppercase();
    let slug = upper.strip_prefix("ADMIN.")?;
    if slug.is_empty() {
        None
    } else {
        Some(slug.to_lowercase())
    }
}

pub async fn find_by_username(
    conn: &mut PgConnection,
    schema: &str,
    username: &str,
) -> Result<Option<User>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM {} WHERE username = $1",
        USER_COLUMNS,
        qualified(schema, USERS_TABLE)
    );
    sqlx::query_as(&sql).bind(username).fetch_optional(conn).await
}

/// Exact match first, then upper-case, then lower-case
pub async fn find_login_candidate(
    conn: &mut PgConnection,
    schema: &str,
    username: &str,
) -> Result<Option<User>, sqlx::Error> {
    let trimmed = username.trim();
    let mut candidates = vec![trimmed.to_string()];
    for variant in [trimmed.to_uppercase(), trimmed.to_lowercase()] {
        if !candidates.contains(&variant) {
            candidates.push(variant);
        }
    }

    for candidate in candidates {
        if let Some(user) = find_by_username(&mut *conn, schema, &candidate).await? {
            return Ok(Some(user));
        }
    }
    Ok(None)
}

pub async fn create_user(
    conn: &mut PgConnection,
    schema: &str,
    user: &NewUser<'_>,
) -> Result<User, sqlx::Error> {
    let hashed = hash_password(user.password);
    let sql = format!(
        "INSERT INTO {} (name, username, tenant_id, role, password_salt, password_hash, active) \
         VALUES ($1, $2, $3, $4, $5, $6, 1) RETURNING {}",
        qualified(schema, USERS_TABLE),
        USER_COLUMNS
    );
    sqlx::query_as(&sql)
        .bind(user.name)
        .bind(user.username)
        .bind(user.tenant_id)
        .bind(user.role.as_str())
        .bind(&hashed.salt)
        .bind(&hashed.hash)
        .fetch_one(conn)
        .await
}

/// Repair an identity's tenant binding and role and reactivate it.
/// The password is left untouched.
pub async fn bind_user(
    conn: &mut PgConnection,
    schema: &str,
    user_id: i64,
    tenant_id: i64,
    role: Role,
) -> Result<User, sqlx::Error> {
    let sql = format!(
        "UPDATE {} SET tenant_id = $2, role = $3, active = 1 WHERE id = $1 RETURNING {}",
        qualified(schema, USERS_TABLE),
        USER_COLUMNS
    );
    sqlx::query_as(&sql)
        .bind(user_id)
        .bind(tenant_id)
        .bind(role.as_str())
        .fetch_one(conn)
        .await
}

/// Move an identity to another tenant without touching its role
pub async fn rebind_tenant(
    conn: &mut PgConnection,
    schema: &str,
    user_id: i64,
    tenant_id: i64,
) -> Result<(), sqlx::Error> {
    let sql = format!(
        "UPDATE {} SET tenant_id = $2 WHERE id = $1",
        qualified(schema, USERS_TABLE)
    );
    sqlx::query(&sql).bind(user_id).bind(tenant_id).execute(conn).await?;
    Ok(())
}

/// Create `username` if missing, otherwise repair its binding and role.
pub async fn ensure_identity(
    conn: &mut PgConnection,
    schema: &str,
    user: &NewUser<'_>,
) -> Result<User, sqlx::Error> {
    if let Some(existing) = find_by_username(&mut *conn, schema, user.username).await? {
        return bind_user(conn, schema, existing.id, user.tenant_id, user.role).await;
    }

    match create_user(&mut *conn, schema, user).await {
        Ok(created) => Ok(created),
        // lost a race with a concurrent seed; repair the winner's row instead
        Err(e) if is_unique_violation(&e) => {
            let existing = find_by_username(&mut *conn, schema, user.username)
                .await?
                .ok_or(e)?;
            bind_user(conn, schema, existing.id, user.tenant_id, user.role).await
        }
        Err(e) => Err(e),
    }
}

/// Seed (or repair) the `ADMIN.<SLUG>` identity of a tenant
pub async fn ensure_tenant_admin(
    conn: &mut PgConnection,
    schema: &str,
    tenant: &TenantBinding,
    default_password: &str,
) -> Result<User, sqlx::Error> {
    let username = tenant_admin_username(&tenant.slug);
    let name = format!("{} Administrator", tenant.name);
    ensure_identity(
        conn,
        schema,
        &NewUser {
            name: &name,
            username: &username,
            tenant_id: tenant.id,
            role: Role::Admin,
            password: default_password,
        },
    )
    .await
}

/// Returns false when `old_username` does not exist
pub async fn rename_user(
    conn: &mut PgConnection,
    schema: &str,
    old_username: &str,
    new_username: &str,
) -> Result<bool, sqlx::Error> {
    let sql = format!(
        "UPDATE {} SET username = $2 WHERE username = $1",
        qualified(schema, USERS_TABLE)
    );
    let result = sqlx::query(&sql)
        .bind(old_username)
        .bind(new_username)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_by_tenant(
    conn: &mut PgConnection,
    schema: &str,
    tenant_id: i64,
) -> Result<u64, sqlx::Error> {
    let sql = format!(
        "DELETE FROM {} WHERE tenant_id = $1",
        qualified(schema, USERS_TABLE)
    );
    let result = sqlx::query(&sql).bind(tenant_id).execute(conn).await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_usernames_follow_the_slug() {
        assert_eq!(tenant_admin_username("acme"), "ADMIN.ACME");
        assert_eq!(tenant_admin_username(" beta-co "), "ADMIN.BETA-CO");
    }

    #[test]
    fn infers_slug_from_admin_username() {
        assert_eq!(admin_username_slug("admin.acme"), Some("acme".to_string()));
        assert_eq!(admin_username_slug("ADMIN.ACME"), Some("acme".to_string()));
        assert_eq!(admin_username_slug("ADMIN."), None);
        assert_eq!(admin_username_slug("JOHN"), None);
    }
}
