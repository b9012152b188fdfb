//! Individual `ensure_*` steps. Each one checks the catalog first and only
//! issues DDL for what is missing, so any step can be re-run.

use sqlx::{Connection, PgConnection};
use tracing::{debug, info, warn};

use super::baseline::{
    self, TableSpec, LEGACY_TENANTS_TABLE, LEGACY_TENANT_TABLE, TENANTS_TABLE, USERS,
    USERS_TABLE,
};
use super::catalog;
use crate::database::identity::{self, NewUser};
use crate::database::models::{Role, TenantBinding};
use crate::database::naming::{
    quote_identifier, qualified, CONTROL_TENANT_ID, CONTROL_TENANT_NAME, CONTROL_TENANT_SLUG,
};

pub async fn ensure_schema(conn: &mut PgConnection, schema: &str) -> Result<(), sqlx::Error> {
    if catalog::schema_exists(&mut *conn, schema).await? {
        return Ok(());
    }
    let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_identifier(schema));
    sqlx::query(&sql).execute(&mut *conn).await?;
    info!("Created schema {}", schema);
    Ok(())
}

/// Control database only: drop the deprecated singular registry table and
/// rename a wrong-case registry table to its canonical name.
pub async fn repair_legacy_tables(conn: &mut PgConnection, schema: &str) -> Result<(), sqlx::Error> {
    if catalog::table_exists(&mut *conn, schema, LEGACY_TENANT_TABLE).await? {
        let sql = format!("DROP TABLE IF EXISTS {} CASCADE", qualified(schema, LEGACY_TENANT_TABLE));
        sqlx::query(&sql).execute(&mut *conn).await?;
        info!("Dropped legacy table {}.{}", schema, LEGACY_TENANT_TABLE);
    }

    if catalog::table_exists(&mut *conn, schema, LEGACY_TENANTS_TABLE).await?
        && !catalog::table_exists(&mut *conn, schema, TENANTS_TABLE).await?
    {
        let sql = format!(
            "ALTER TABLE {} RENAME TO {}",
            qualified(schema, LEGACY_TENANTS_TABLE),
            quote_identifier(TENANTS_TABLE)
        );
        sqlx::query(&sql).execute(&mut *conn).await?;
        info!("Renamed {}.{} to {}", schema, LEGACY_TENANTS_TABLE, TENANTS_TABLE);
    }
    Ok(())
}

pub async fn ensure_tables(
    conn: &mut PgConnection,
    schema: &str,
    tables: &[&TableSpec],
) -> Result<(), sqlx::Error> {
    for table in tables {
        if catalog::table_exists(&mut *conn, schema, table.name).await? {
            continue;
        }
        sqlx::query(&table.create_table_sql(schema)).execute(&mut *conn).await?;
        info!("Created table {}.{}", schema, table.name);
    }
    Ok(())
}

pub async fn ensure_columns(
    conn: &mut PgConnection,
    schema: &str,
    tables: &[&TableSpec],
) -> Result<(), sqlx::Error> {
    for table in tables {
        let existing = catalog::column_names(&mut *conn, schema, table.name).await?;
        for column in table.columns.iter().filter(|c| !existing.iter().any(|e| e == c.name)) {
            sqlx::query(&table.add_column_sql(schema, column)).execute(&mut *conn).await?;
            info!("Added column {}.{}.{}", schema, table.name, column.name);
        }
    }
    Ok(())
}

/// Rebuild `users` when `name` is not its second column. Rows, extra legacy
/// columns and the identity sequence are carried over in one transaction.
pub async fn ensure_users_column_order(conn: &mut PgConnection, schema: &str) -> Result<(), sqlx::Error> {
    let existing = catalog::column_names(&mut *conn, schema, USERS_TABLE).await?;
    if existing.is_empty() || existing.get(1).map(String::as_str) == Some("name") {
        return Ok(());
    }

    let typed: Vec<(String, String)> = sqlx::query_as(
        "SELECT a.attname::text, format_type(a.atttypid, a.atttypmod) \
         FROM pg_attribute a \
         JOIN pg_class c ON c.oid = a.attrelid \
         JOIN pg_namespace n ON n.oid = c.relnamespace \
         WHERE n.nspname = $1 AND c.relname = $2 AND a.attnum > 0 AND NOT a.attisdropped \
         ORDER BY a.attnum",
    )
    .bind(schema)
    .bind(USERS_TABLE)
    .fetch_all(&mut *conn)
    .await?;

    let rebuild = format!("{}__rebuild", USERS_TABLE);
    let extras: Vec<&(String, String)> = typed
        .iter()
        .filter(|(name, _)| USERS.column(name).is_none())
        .collect();
    let copied: Vec<String> = USERS
        .column_names()
        .filter(|c| existing.iter().any(|e| e == *c))
        .map(str::to_string)
        .chain(extras.iter().map(|(name, _)| name.clone()))
        .map(|c| quote_identifier(&c))
        .collect();
    let copied = copied.join(", ");

    let mut tx = conn.begin().await?;

    let mut create = USERS.create_table_sql(schema).replacen(
        &qualified(schema, USERS_TABLE),
        &qualified(schema, &rebuild),
        1,
    );
    if !extras.is_empty() {
        let extra_defs = extras
            .iter()
            .map(|(name, ty)| format!("{} {}", quote_identifier(name), ty))
            .collect::<Vec<_>>()
            .join(", ");
        // splice the legacy columns in before the closing parenthesis
        create.pop();
        create.push_str(", ");
        create.push_str(&extra_defs);
        create.push(')');
    }
    sqlx::query(&create).execute(&mut *tx).await?;

    let copy = format!(
        "INSERT INTO {} ({copied}) SELECT {copied} FROM {}",
        qualified(schema, &rebuild),
        qualified(schema, USERS_TABLE),
    );
    sqlx::query(&copy).execute(&mut *tx).await?;

    let drop = format!("DROP TABLE {} CASCADE", qualified(schema, USERS_TABLE));
    sqlx::query(&drop).execute(&mut *tx).await?;
    let rename = format!(
        "ALTER TABLE {} RENAME TO {}",
        qualified(schema, &rebuild),
        quote_identifier(USERS_TABLE)
    );
    sqlx::query(&rename).execute(&mut *tx).await?;
    reset_identity(&mut *tx, schema, USERS_TABLE).await?;

    tx.commit().await?;
    info!("Rebuilt {}.{} with canonical column order", schema, USERS_TABLE);
    Ok(())
}

/// Move the identity sequence past the highest existing id
async fn reset_identity(conn: &mut PgConnection, schema: &str, table: &str) -> Result<(), sqlx::Error> {
    let sql = format!(
        "SELECT setval(pg_get_serial_sequence($1, 'id'), \
         GREATEST((SELECT COALESCE(MAX(id), 0) FROM {}), 1))",
        qualified(schema, table)
    );
    sqlx::query(&sql)
        .bind(qualified(schema, table))
        .execute(conn)
        .await?;
    Ok(())
}

/// Control database only: exactly one registry row, id 1, carries the
/// `executive` slug and the control name.
///
/// A different row holding the control slug is merged into id 1: its
/// identities and legacy rows are rebound, then the row is either promoted to
/// id 1 (when id 1 is free) or deleted. Afterwards id 1 is upserted with the
/// control slug and name.
pub async fn ensure_control_tenant(conn: &mut PgConnection, schema: &str) -> Result<(), sqlx::Error> {
    let registry = qualified(schema, TENANTS_TABLE);
    let mut tx = conn.begin().await?;

    let stray: Option<i64> = sqlx::query_scalar(&format!(
        "SELECT id FROM {} WHERE lower(btrim(slug)) = $1 AND id <> $2 ORDER BY id LIMIT 1",
        registry
    ))
    .bind(CONTROL_TENANT_SLUG)
    .bind(CONTROL_TENANT_ID)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(stray) = stray {
        rebind_tenant_rows(&mut *tx, schema, stray).await?;

        let control_exists: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE id = $1)",
            registry
        ))
        .bind(CONTROL_TENANT_ID)
        .fetch_one(&mut *tx)
        .await?;

        let sql = if control_exists {
            format!("DELETE FROM {} WHERE id = $2", registry)
        } else {
            format!("UPDATE {} SET id = $1 WHERE id = $2", registry)
        };
        sqlx::query(&sql)
            .bind(CONTROL_TENANT_ID)
            .bind(stray)
            .execute(&mut *tx)
            .await?;
        warn!(
            "Tenant {} held the control slug; merged into tenant {}",
            stray, CONTROL_TENANT_ID
        );
    }

    let sql = format!(
        "INSERT INTO {registry} AS t (id, name, slug, created_on, created_by) \
         VALUES ($1, $2, $3, CURRENT_DATE, 'SYSTEM') \
         ON CONFLICT (id) DO UPDATE SET \
             name = EXCLUDED.name, \
             slug = EXCLUDED.slug, \
             created_on = COALESCE(t.created_on, CURRENT_DATE), \
             created_by = COALESCE(NULLIF(btrim(t.created_by), ''), 'SYSTEM'), \
             updated_on = CASE \
                 WHEN t.name IS DISTINCT FROM EXCLUDED.name \
                   OR t.slug IS DISTINCT FROM EXCLUDED.slug THEN CURRENT_DATE \
                 ELSE t.updated_on END \
         RETURNING (xmax = 0)"
    );
    let inserted: bool = sqlx::query_scalar(&sql)
        .bind(CONTROL_TENANT_ID)
        .bind(CONTROL_TENANT_NAME)
        .bind(CONTROL_TENANT_SLUG)
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;

    if inserted {
        info!("Inserted control tenant row");
    }
    reset_identity(conn, schema, TENANTS_TABLE).await
}

/// Move identities and legacy rows bound to `from` onto the control tenant
async fn rebind_tenant_rows(conn: &mut PgConnection, schema: &str, from: i64) -> Result<(), sqlx::Error> {
    let sql = format!(
        "UPDATE {} SET tenant_id = $1 WHERE tenant_id = $2",
        qualified(schema, USERS_TABLE)
    );
    sqlx::query(&sql)
        .bind(CONTROL_TENANT_ID)
        .bind(from)
        .execute(&mut *conn)
        .await?;

    for table in baseline::DOMAIN_TABLES {
        let sql = format!(
            "UPDATE {} SET tenant_id = $1, tenant_name = $2 WHERE tenant_id = $3",
            qualified(schema, table.name)
        );
        sqlx::query(&sql)
            .bind(CONTROL_TENANT_ID)
            .bind(CONTROL_TENANT_NAME)
            .bind(from)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Control database only: the SUPERADMIN identity bound to the control
/// tenant. An existing row keeps its password.
pub async fn ensure_bootstrap_admin(
    conn: &mut PgConnection,
    schema: &str,
    username: &str,
    password: &str,
) -> Result<(), sqlx::Error> {
    identity::ensure_identity(
        conn,
        schema,
        &NewUser {
            name: "Administrator",
            username,
            tenant_id: CONTROL_TENANT_ID,
            role: Role::Superadmin,
            password,
        },
    )
    .await?;
    Ok(())
}

fn needs_binding() -> &'static str {
    "(rec.tenant_id IS NULL OR rec.tenant_id = 0 \
      OR rec.tenant_name IS NULL OR btrim(rec.tenant_name) = '')"
}

/// Control database: rows of company tables are matched to registry rows by
/// case-insensitive company name; rows of tables without a company column
/// belong to the control tenant.
pub async fn backfill_control(conn: &mut PgConnection, schema: &str) -> Result<u64, sqlx::Error> {
    let registry = qualified(schema, TENANTS_TABLE);
    let mut touched = 0;

    for table in baseline::DOMAIN_TABLES {
        let target = qualified(schema, table.name);
        let result = if table.has_company {
            let sql = format!(
                "UPDATE {target} AS rec SET tenant_id = reg.id, tenant_name = reg.name \
                 FROM {registry} AS reg \
                 WHERE {} AND lower(btrim(rec.company)) = lower(btrim(reg.name))",
                needs_binding()
            );
            sqlx::query(&sql).execute(&mut *conn).await?
        } else {
            let sql = format!(
                "UPDATE {target} AS rec SET tenant_id = $1, tenant_name = $2 WHERE {}",
                needs_binding()
            );
            sqlx::query(&sql)
                .bind(CONTROL_TENANT_ID)
                .bind(CONTROL_TENANT_NAME)
                .execute(&mut *conn)
                .await?
        };
        touched += result.rows_affected();
    }

    debug!("Backfilled {} control rows", touched);
    Ok(touched)
}

/// Tenant database: every row belongs to the single tenant it hosts
pub async fn backfill_tenant(
    conn: &mut PgConnection,
    schema: &str,
    tenant: &TenantBinding,
) -> Result<u64, sqlx::Error> {
    let mut touched = 0;
    for table in baseline::DOMAIN_TABLES {
        let sql = format!(
            "UPDATE {} AS rec SET tenant_id = $1, tenant_name = $2 WHERE {}",
            qualified(schema, table.name),
            needs_binding()
        );
        touched += sqlx::query(&sql)
            .bind(tenant.id)
            .bind(&tenant.name)
            .execute(&mut *conn)
            .await?
            .rows_affected();
    }
    debug!("Backfilled {} rows for tenant {}", touched, tenant.slug);
    Ok(touched)
}

pub async fn ensure_tenant_indexes(conn: &mut PgConnection, schema: &str) -> Result<(), sqlx::Error> {
    for table in baseline::indexed_tables() {
        sqlx::query(&table.tenant_index_sql(schema)).execute(&mut *conn).await?;
    }
    Ok(())
}
