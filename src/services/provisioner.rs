//! First-time creation of a tenant's physical database.

use sqlx::PgConnection;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::config;
use crate::database::identity;
use crate::database::manager::{DatabaseError, DatabaseManager};
use crate::database::models::Tenant;
use crate::database::naming::{schema_name, tenant_db_name};
use crate::error::bounded_diagnostic;
use crate::reconcile::baseline::{LEGACY_TENANT_TABLE, TENANTS_TABLE};
use crate::reconcile::catalog::{self, ReflectedTable};
use crate::reconcile::{self, ensure, ReconcileError, ReconcileTarget};

#[derive(Debug, Error)]
pub enum ProvisionStepError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("{step}: {source}")]
    Sql {
        step: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl ProvisionStepError {
    fn sql(step: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| ProvisionStepError::Sql { step, source }
    }

    fn kind(&self) -> &'static str {
        match self {
            ProvisionStepError::Database(_) => "DatabaseError",
            ProvisionStepError::Reconcile(_) => "ReconcileError",
            ProvisionStepError::Sql { .. } => "SqlError",
        }
    }

    fn detail(&self) -> String {
        match self {
            ProvisionStepError::Reconcile(e) => e.detail(),
            ProvisionStepError::Sql { source, .. } => match source.as_database_error() {
                Some(db) => db.message().to_string(),
                None => source.to_string(),
            },
            ProvisionStepError::Database(e) => e.to_string(),
        }
    }
}

/// Provisioning failed for `database`/`schema`
#[derive(Debug, Error)]
#[error("failed to provision tenant database (db=\"{database}\", schema=\"{schema}\"): {source}")]
pub struct ProvisionError {
    pub database: String,
    pub schema: String,
    #[source]
    pub source: ProvisionStepError,
}

impl ProvisionError {
    /// Client-facing message: names the database and schema, never the raw
    /// driver text unbounded
    pub fn diagnostic(&self) -> String {
        format!(
            "failed to provision tenant database (db=\"{}\", schema=\"{}\"): {}",
            self.database,
            self.schema,
            bounded_diagnostic(&self.source.detail(), self.source.kind())
        )
    }
}

/// Create, shape and seed the physical database of `tenant`.
///
/// Safe to re-run: every step is create-if-missing and the admin seed
/// repairs an existing row. The control tenant is never provisioned here.
pub async fn provision(tenant: &Tenant) -> Result<(), ProvisionError> {
    let schema = schema_name();
    let database = tenant_db_name(tenant.id, &tenant.slug);

    if tenant.is_control() {
        warn!("Refusing to provision the control tenant");
        return Ok(());
    }

    run_steps(tenant, &database, &schema)
        .await
        .map_err(|source| ProvisionError {
            database: database.clone(),
            schema: schema.clone(),
            source,
        })?;

    info!("Provisioned tenant {} ({}) in {}", tenant.id, tenant.slug, database);
    Ok(())
}

async fn run_steps(tenant: &Tenant, database: &str, schema: &str) -> Result<(), ProvisionStepError> {
    // 1. physical database, outside any transaction
    DatabaseManager::create_database_if_absent(database).await?;

    let pool = DatabaseManager::tenant_pool(database).await?;
    let mut conn = pool.acquire().await.map_err(DatabaseError::from)?;

    // 2. schema namespace
    ensure::ensure_schema(&mut conn, schema)
        .await
        .map_err(ProvisionStepError::sql("create_schema"))?;

    // 3. tables shaped like the control database's, minus the registry
    let tables = reflect_control_tables(schema).await?;
    apply_reflected(&mut conn, schema, &tables).await?;

    let target = ReconcileTarget::Tenant(tenant.binding());
    reconcile::reconcile_database(&mut conn, schema, &target).await?;
    reconcile::mark_reconciled(database);

    // 4. the tenant's administrative identity
    identity::ensure_tenant_admin(
        &mut conn,
        schema,
        &tenant.binding(),
        &config().security.tenant_admin_default_password,
    )
    .await
    .map_err(ProvisionStepError::sql("seed_tenant_admin"))?;

    Ok(())
}

async fn reflect_control_tables(schema: &str) -> Result<Vec<ReflectedTable>, ProvisionStepError> {
    let control = DatabaseManager::control_pool().await?;
    let mut conn = control.acquire().await.map_err(DatabaseError::from)?;
    catalog::reflect_tables(&mut conn, schema, &[TENANTS_TABLE, LEGACY_TENANT_TABLE])
        .await
        .map_err(ProvisionStepError::sql("reflect_control_schema"))
}

/// Tables first, then foreign keys between them, then secondary indexes
async fn apply_reflected(
    conn: &mut PgConnection,
    schema: &str,
    tables: &[ReflectedTable],
) -> Result<(), ProvisionStepError> {
    for table in tables {
        sqlx::query(&table.create_table_sql(schema))
            .execute(&mut *conn)
            .await
            .map_err(ProvisionStepError::sql("create_table"))?;
    }

    for table in tables {
        for fk in table.foreign_keys() {
            let exists = catalog::constraint_exists(&mut *conn, schema, &fk.name)
                .await
                .map_err(ProvisionStepError::sql("inspect_constraints"))?;
            if !exists {
                sqlx::query(&table.add_constraint_sql(schema, fk))
                    .execute(&mut *conn)
                    .await
                    .map_err(ProvisionStepError::sql("add_foreign_key"))?;
            }
        }
        for index in table.index_sql() {
            sqlx::query(&index)
                .execute(&mut *conn)
                .await
                .map_err(ProvisionStepError::sql("create_index"))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_names_database_and_schema() {
        let err = ProvisionError {
            database: "acme-2".to_string(),
            schema: "EXECUTIVE".to_string(),
            source: ProvisionStepError::Database(DatabaseError::NotFound(
                "template   missing\n".to_string(),
            )),
        };
        assert_eq!(
            err.diagnostic(),
            "failed to provision tenant database (db=\"acme-2\", schema=\"EXECUTIVE\"): Not found: template missing"
        );
    }

    #[test]
    fn diagnostic_is_bounded() {
        let err = ProvisionError {
            database: "acme-2".to_string(),
            schema: "EXECUTIVE".to_string(),
            source: ProvisionStepError::Database(DatabaseError::NotFound("y".repeat(1000))),
        };
        assert!(err.diagnostic().ends_with("..."));
        assert!(err.diagnostic().len() < 400);
    }
}
