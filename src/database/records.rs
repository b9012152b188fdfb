//! Generic JSON record access for the tenant-scoped tables.
//!
//! Rows are written through `jsonb_populate_record` so Postgres performs the
//! type conversion, and read back as `row_to_json`.

use serde_json::{Map, Value};
use sqlx::{types::Json, PgConnection};
use thiserror::Error;

use super::manager::DatabaseError;
use super::models::TenantBinding;
use super::naming::{is_control_tenant, quote_identifier, qualified};
use crate::reconcile::baseline::{
    TableSpec, ASSETS, COLLABORATORS, COST_CENTERS, DEPARTMENTS, DOMAIN_TABLES, EXECUTIVES,
    PAYABLES, ROLES,
};

/// Columns the server owns; clients may not set them. `document_ref` is only
/// written by the document upload.
const SERVER_COLUMNS: [&str; 4] = ["id", "tenant_id", "tenant_name", "document_ref"];

/// Payable columns `final_amount` is derived from
const AMOUNT_INPUTS: [&str; 5] = [
    "original_amount",
    "installments",
    "discount",
    "surcharge",
    "payment_type",
];

/// `(original - discount + surcharge)`, floored at zero, per installment
const FINAL_AMOUNT_SQL: &str = "CASE WHEN original_amount IS NULL THEN NULL \
     ELSE GREATEST(0, original_amount - COALESCE(discount, 0) + COALESCE(surcharge, 0)) \
          / GREATEST(COALESCE(installments, 1), 1) END";

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Request body must be a JSON object")]
    NotAnObject,

    #[error("Unknown fields: {}", .0.join(", "))]
    UnknownFields(Vec<String>),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<sqlx::Error> for RecordError {
    fn from(err: sqlx::Error) -> Self {
        // SQLSTATE class 22: data exception (bad date, numeric overflow, ...)
        let data_exception = err
            .as_database_error()
            .and_then(|db| db.code())
            .map(|code| code.starts_with("22"))
            .unwrap_or(false);
        if data_exception {
            let message = err
                .as_database_error()
                .map(|db| db.message().to_string())
                .unwrap_or_default();
            return RecordError::InvalidValue(message);
        }
        RecordError::Database(err.into())
    }
}

/// Record collections exposed under `/api/{kind}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Executives,
    Payables,
    Assets,
    CostCenters,
    Departments,
    Roles,
    Collaborators,
}

impl EntityKind {
    /// Parse the URL path segment
    pub fn from_path(segment: &str) -> Option<Self> {
        match segment {
            "executives" => Some(EntityKind::Executives),
            "payables" => Some(EntityKind::Payables),
            "assets" => Some(EntityKind::Assets),
            "cost-centers" | "cost_centers" => Some(EntityKind::CostCenters),
            "departments" => Some(EntityKind::Departments),
            "roles" => Some(EntityKind::Roles),
            "collaborators" => Some(EntityKind::Collaborators),
            _ => None,
        }
    }

    pub fn table(&self) -> &'static TableSpec {
        match self {
            EntityKind::Executives => &EXECUTIVES,
            EntityKind::Payables => &PAYABLES,
            EntityKind::Assets => &ASSETS,
            EntityKind::CostCenters => &COST_CENTERS,
            EntityKind::Departments => &DEPARTMENTS,
            EntityKind::Roles => &ROLES,
            EntityKind::Collaborators => &COLLABORATORS,
        }
    }
}

/// Validate a client body against the table's columns: must be an object,
/// may only name known columns, server-owned columns are dropped and string
/// values are trimmed.
pub fn prepare_payload(kind: EntityKind, body: Value) -> Result<Map<String, Value>, RecordError> {
    let Value::Object(object) = body else {
        return Err(RecordError::NotAnObject);
    };
    let table = kind.table();

    let mut unknown: Vec<String> = object
        .keys()
        .filter(|k| table.column(k).is_none())
        .cloned()
        .collect();
    if !unknown.is_empty() {
        unknown.sort();
        return Err(RecordError::UnknownFields(unknown));
    }

    let mut payload: Map<String, Value> = object
        .into_iter()
        .filter(|(k, _)| !SERVER_COLUMNS.contains(&k.as_str()))
        .map(|(k, v)| match v {
            Value::String(s) => (k, Value::String(s.trim().to_string())),
            other => (k, other),
        })
        .collect();
    if kind == EntityKind::Payables {
        normalize_payment_type(&mut payload);
    }
    Ok(payload)
}

/// Single-payment spellings become `COTA_UNICA` with one installment;
/// `PARCELA` becomes `PARCELAS`.
fn normalize_payment_type(payload: &mut Map<String, Value>) {
    let Some(raw) = payload.get("payment_type").and_then(Value::as_str) else {
        return;
    };
    match raw.trim().to_uppercase().as_str() {
        "COTA UNICA" | "COTA_UNICA" | "COTAÚNICA" | "COTA ÚNICA" => {
            payload.insert("payment_type".to_string(), Value::from("COTA_UNICA"));
            payload.insert("installments".to_string(), Value::from(1));
        }
        "PARCELA" | "PARCELAS" => {
            payload.insert("payment_type".to_string(), Value::from("PARCELAS"));
        }
        _ => {}
    }
}

/// A client-supplied `final_amount` wins. Otherwise it is derived on create,
/// and on update whenever one of its inputs is written.
fn derives_final_amount(kind: EntityKind, payload: &Map<String, Value>, creating: bool) -> bool {
    if kind != EntityKind::Payables {
        return false;
    }
    let explicit = payload.get("final_amount").map(|v| !v.is_null()).unwrap_or(false);
    !explicit && (creating || AMOUNT_INPUTS.iter().any(|k| payload.contains_key(*k)))
}

async fn refresh_final_amount(
    conn: &mut PgConnection,
    schema: &str,
    row: Value,
) -> Result<Value, RecordError> {
    let Some(id) = row.get("id").and_then(Value::as_i64) else {
        return Ok(row);
    };
    let sql = format!(
        "UPDATE {} AS rec SET final_amount = {} WHERE rec.id = $1 RETURNING row_to_json(rec)",
        qualified(schema, PAYABLES.name),
        FINAL_AMOUNT_SQL
    );
    Ok(sqlx::query_scalar(&sql).bind(id).fetch_one(conn).await?)
}

fn quoted_columns<'a>(keys: impl Iterator<Item = &'a String>) -> Vec<String> {
    keys.map(|k| quote_identifier(k)).collect()
}

/// Rows visible to `tenant`. In the control database the company tables
/// also hold legacy rows of other tenants, so those are narrowed to rows
/// stamped with, or naming, the control tenant.
pub async fn list(
    conn: &mut PgConnection,
    schema: &str,
    kind: EntityKind,
    tenant: &TenantBinding,
) -> Result<Vec<Value>, RecordError> {
    let table = kind.table();
    let source = qualified(schema, table.name);

    let rows = if table.has_company && is_control_tenant(tenant.id, &tenant.slug) {
        let sql = format!(
            "SELECT row_to_json(rec) FROM {} AS rec \
             WHERE rec.tenant_id = $1 OR lower(btrim(rec.company)) = lower(btrim($2)) \
             ORDER BY rec.id",
            source
        );
        sqlx::query_scalar(&sql)
            .bind(tenant.id)
            .bind(&tenant.name)
            .fetch_all(conn)
            .await?
    } else {
        let sql = format!("SELECT row_to_json(rec) FROM {} AS rec ORDER BY rec.id", source);
        sqlx::query_scalar(&sql).fetch_all(conn).await?
    };
    Ok(rows)
}

pub async fn get(
    conn: &mut PgConnection,
    schema: &str,
    kind: EntityKind,
    id: i64,
) -> Result<Option<Value>, RecordError> {
    let sql = format!(
        "SELECT row_to_json(rec) FROM {} AS rec WHERE rec.id = $1",
        qualified(schema, kind.table().name)
    );
    Ok(sqlx::query_scalar(&sql).bind(id).fetch_optional(conn).await?)
}

/// Insert a record stamped with the tenant's `(tenant_id, tenant_name)`
pub async fn create(
    conn: &mut PgConnection,
    schema: &str,
    kind: EntityKind,
    mut payload: Map<String, Value>,
    tenant: &TenantBinding,
) -> Result<Value, RecordError> {
    payload.insert("tenant_id".to_string(), Value::from(tenant.id));
    payload.insert("tenant_name".to_string(), Value::from(tenant.name.clone()));

    let target = qualified(schema, kind.table().name);
    let columns = quoted_columns(payload.keys()).join(", ");
    let sql = format!(
        "INSERT INTO {target} AS rec ({columns}) \
         SELECT {columns} FROM jsonb_populate_record(NULL::{target}, $1) \
         RETURNING row_to_json(rec)"
    );
    let row: Value = sqlx::query_scalar(&sql)
        .bind(Json(&payload))
        .fetch_one(&mut *conn)
        .await?;

    if derives_final_amount(kind, &payload, true) {
        return refresh_final_amount(conn, schema, row).await;
    }
    Ok(row)
}

/// Apply the given columns and fill a missing tenant binding. `None` when absent.
pub async fn update(
    conn: &mut PgConnection,
    schema: &str,
    kind: EntityKind,
    id: i64,
    payload: Map<String, Value>,
    tenant: &TenantBinding,
) -> Result<Option<Value>, RecordError> {
    let target = qualified(schema, kind.table().name);
    let mut assignments: Vec<String> = payload
        .keys()
        .map(|k| {
            let col = quote_identifier(k);
            format!("{col} = src.{col}")
        })
        .collect();
    assignments.push("tenant_id = COALESCE(NULLIF(rec.tenant_id, 0), $3)".to_string());
    assignments.push("tenant_name = COALESCE(NULLIF(btrim(rec.tenant_name), ''), $4)".to_string());

    let sql = format!(
        "UPDATE {target} AS rec SET {} \
         FROM jsonb_populate_record(NULL::{target}, $1) AS src \
         WHERE rec.id = $2 RETURNING row_to_json(rec)",
        assignments.join(", ")
    );
    let row: Option<Value> = sqlx::query_scalar(&sql)
        .bind(Json(&payload))
        .bind(id)
        .bind(tenant.id)
        .bind(&tenant.name)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) if derives_final_amount(kind, &payload, false) => {
            Ok(Some(refresh_final_amount(conn, schema, row).await?))
        }
        other => Ok(other),
    }
}

/// Returns false when no row matched
pub async fn delete(
    conn: &mut PgConnection,
    schema: &str,
    kind: EntityKind,
    id: i64,
) -> Result<bool, RecordError> {
    let sql = format!(
        "DELETE FROM {} WHERE id = $1",
        qualified(schema, kind.table().name)
    );
    let result = sqlx::query(&sql).bind(id).execute(conn).await?;
    Ok(result.rows_affected() > 0)
}

/// Document reference of a payable: `None` when the payable is absent,
/// `Some(None)` when it has no document yet
pub async fn payable_document(
    conn: &mut PgConnection,
    schema: &str,
    id: i64,
) -> Result<Option<Option<String>>, RecordError> {
    let sql = format!(
        "SELECT document_ref FROM {} WHERE id = $1",
        qualified(schema, PAYABLES.name)
    );
    Ok(sqlx::query_scalar(&sql).bind(id).fetch_optional(conn).await?)
}

pub async fn set_payable_document(
    conn: &mut PgConnection,
    schema: &str,
    id: i64,
    reference: &str,
) -> Result<Option<Value>, RecordError> {
    let sql = format!(
        "UPDATE {} AS rec SET document_ref = $2 WHERE rec.id = $1 RETURNING row_to_json(rec)",
        qualified(schema, PAYABLES.name)
    );
    Ok(sqlx::query_scalar(&sql)
        .bind(id)
        .bind(reference)
        .fetch_optional(conn)
        .await?)
}

/// Remove legacy rows whose free-text company names `company`
pub async fn delete_company_rows(
    conn: &mut PgConnection,
    schema: &str,
    company: &str,
) -> Result<u64, RecordError> {
    let mut removed = 0;
    for table in DOMAIN_TABLES.iter().filter(|t| t.has_company) {
        let sql = format!(
            "DELETE FROM {} WHERE lower(btrim(company)) = lower(btrim($1))",
            qualified(schema, table.name)
        );
        removed += sqlx::query(&sql)
            .bind(company)
            .execute(&mut *conn)
            .await?
            .rows_affected();
    }
    Ok(removed)
}
