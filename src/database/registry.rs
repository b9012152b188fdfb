//! Tenant registry: one row per tenant in the control database.
//!
//! Reads always go to the database; the full registry is never cached.

use sqlx::PgPool;

use super::manager::{is_unique_violation, DatabaseError, DatabaseManager};
use super::models::{NewTenant, Tenant};
use super::naming::{qualified, schema_name};
use crate::reconcile::baseline::TENANTS_TABLE;

const TENANT_COLUMNS: &str =
    "id::bigint AS id, name, slug, created_on, updated_on, created_by";

#[derive(Clone)]
pub struct TenantRegistry {
    pool: PgPool,
    table: String,
}

impl TenantRegistry {
    pub fn new(pool: PgPool, schema: &str) -> Self {
        Self {
            pool,
            table: qualified(schema, TENANTS_TABLE),
        }
    }

    /// Registry backed by the control pool and configured schema
    pub async fn connect() -> Result<Self, DatabaseError> {
        let pool = DatabaseManager::control_pool().await?;
        Ok(Self::new(pool, &schema_name()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// All tenants ordered by id
    pub async fn list(&self) -> Result<Vec<Tenant>, DatabaseError> {
        let sql = format!("SELECT {} FROM {} ORDER BY id", TENANT_COLUMNS, self.table);
        Ok(sqlx::query_as(&sql).fetch_all(&self.pool).await?)
    }

    pub async fn get(&self, id: i64) -> Result<Option<Tenant>, DatabaseError> {
        let sql = format!("SELECT {} FROM {} WHERE id = $1", TENANT_COLUMNS, self.table);
        Ok(sqlx::query_as(&sql).bind(id).fetch_optional(&self.pool).await?)
    }

    pub async fn find_by_slug(&self, slug: &str) -> Result<Option<Tenant>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE lower(slug) = lower($1)",
            TENANT_COLUMNS, self.table
        );
        Ok(sqlx::query_as(&sql)
            .bind(slug.trim())
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Insert a tenant row. A duplicate slug is a conflict.
    pub async fn insert(&self, tenant: &NewTenant) -> Result<Tenant, DatabaseError> {
        let sql = format!(
            "INSERT INTO {} (name, slug, created_on, created_by) \
             VALUES ($1, $2, CURRENT_DATE, $3) RETURNING {}",
            self.table, TENANT_COLUMNS
        );
        sqlx::query_as(&sql)
            .bind(&tenant.name)
            .bind(&tenant.slug)
            .bind(&tenant.created_by)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| slug_conflict(e, &tenant.slug))
    }

    pub async fn update(
        &self,
        id: i64,
        name: &str,
        slug: &str,
        created_by: Option<&str>,
    ) -> Result<Tenant, DatabaseError> {
        let sql = format!(
            "UPDATE {} SET name = $2, slug = $3, created_by = COALESCE($4, created_by), \
             updated_on = CURRENT_DATE WHERE id = $1 RETURNING {}",
            self.table, TENANT_COLUMNS
        );
        sqlx::query_as(&sql)
            .bind(id)
            .bind(name)
            .bind(slug)
            .bind(created_by)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| slug_conflict(e, slug))?
            .ok_or_else(|| DatabaseError::NotFound(format!("tenant {}", id)))
    }

    /// Returns false when no row matched
    pub async fn delete(&self, id: i64) -> Result<bool, DatabaseError> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.table);
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}

fn slug_conflict(err: sqlx::Error, slug: &str) -> DatabaseError {
    if is_unique_violation(&err) {
        DatabaseError::Conflict(format!("slug '{}' is already in use", slug))
    } else {
        DatabaseError::Sqlx(err)
    }
}
