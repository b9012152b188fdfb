use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use serde_json::Value;

use super::{entity_kind, TenantQuery};
use crate::auth::Claims;
use crate::database::records;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::{fanout, router};

/// GET /api/:kind
///
/// Privileged callers without `tenant_id` get every tenant's records,
/// ordered by tenant name then id.
pub async fn list(
    Extension(claims): Extension<Claims>,
    Path(kind): Path<String>,
    Query(query): Query<TenantQuery>,
) -> ApiResult<Vec<Value>> {
    let kind = entity_kind(&kind)?;
    router::validate_binding(&claims)?;

    if claims.is_privileged() && query.tenant_id.is_none() {
        let rows = fanout::list_across_tenants(
            kind,
            query.company.as_deref(),
            claims.belongs_to_control(),
        )
        .await?;
        return Ok(ApiResponse::success(rows));
    }

    let mut session = router::open_session(&claims, query.tenant_id).await?;
    let (conn, schema, tenant) = session.parts();
    let rows = records::list(conn, schema, kind, tenant).await?;
    Ok(ApiResponse::success(rows))
}

/// GET /api/:kind/:id
pub async fn get(
    Extension(claims): Extension<Claims>,
    Path((kind, id)): Path<(String, i64)>,
    Query(query): Query<TenantQuery>,
) -> ApiResult<Value> {
    let kind = entity_kind(&kind)?;
    let mut session = router::open_session(&claims, query.tenant_id).await?;
    let (conn, schema, _) = session.parts();

    records::get(conn, schema, kind, id)
        .await?
        .map(ApiResponse::success)
        .ok_or_else(|| ApiError::not_found(format!("Record {} not found", id)))
}

/// POST /api/:kind
pub async fn create(
    Extension(claims): Extension<Claims>,
    Path(kind): Path<String>,
    Query(query): Query<TenantQuery>,
    Json(body): Json<Value>,
) -> ApiResult<Value> {
    let kind = entity_kind(&kind)?;
    let payload = records::prepare_payload(kind, body)?;

    let mut session = router::open_session(&claims, query.tenant_id).await?;
    let (conn, schema, tenant) = session.parts();
    let created = records::create(conn, schema, kind, payload, tenant).await?;
    Ok(ApiResponse::created(created))
}

/// PUT /api/:kind/:id
pub async fn update(
    Extension(claims): Extension<Claims>,
    Path((kind, id)): Path<(String, i64)>,
    Query(query): Query<TenantQuery>,
    Json(body): Json<Value>,
) -> ApiResult<Value> {
    let kind = entity_kind(&kind)?;
    let payload = records::prepare_payload(kind, body)?;

    let mut session = router::open_session(&claims, query.tenant_id).await?;
    let (conn, schema, tenant) = session.parts();
    records::update(conn, schema, kind, id, payload, tenant)
        .await?
        .map(ApiResponse::success)
        .ok_or_else(|| ApiError::not_found(format!("Record {} not found", id)))
}

/// DELETE /api/:kind/:id
pub async fn delete(
    Extension(claims): Extension<Claims>,
    Path((kind, id)): Path<(String, i64)>,
    Query(query): Query<TenantQuery>,
) -> ApiResult<()> {
    let kind = entity_kind(&kind)?;
    let mut session = router::open_session(&claims, query.tenant_id).await?;
    let (conn, schema, _) = session.parts();

    if !records::delete(conn, schema, kind, id).await? {
        return Err(ApiError::not_found(format!("Record {} not found", id)));
    }
    Ok(ApiResponse::no_content())
}
