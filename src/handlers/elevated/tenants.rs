use axum::{
    extract::{Path, Query},
    Extension, Json,
};
use serde::Deserialize;

use crate::auth::Claims;
use crate::database::models::{NewTenant, Tenant};
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::tenant_service::{self, TenantChanges};

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub delete_db: bool,
}

/// GET /api/tenants
pub async fn list() -> ApiResult<Vec<Tenant>> {
    Ok(ApiResponse::success(tenant_service::list().await?))
}

/// GET /api/tenants/:id
pub async fn show(Path(id): Path<i64>) -> ApiResult<Tenant> {
    Ok(ApiResponse::success(tenant_service::get(id).await?))
}

/// POST /api/tenants
///
/// Registers the tenant, provisions its database and seeds `ADMIN.<SLUG>`.
/// Provisioning failures answer 502 and leave no registry row behind.
pub async fn create(
    Extension(claims): Extension<Claims>,
    Json(input): Json<NewTenant>,
) -> ApiResult<Tenant> {
    let tenant = tenant_service::create(input, &claims.sub).await?;
    Ok(ApiResponse::created(tenant))
}

/// PUT /api/tenants/:id
pub async fn update(Path(id): Path<i64>, Json(changes): Json<TenantChanges>) -> ApiResult<Tenant> {
    Ok(ApiResponse::success(tenant_service::update(id, changes).await?))
}

/// DELETE /api/tenants/:id[?delete_db=true]
pub async fn delete(Path(id): Path<i64>, Query(query): Query<DeleteQuery>) -> ApiResult<()> {
    tenant_service::delete(id, query.delete_db).await?;
    Ok(ApiResponse::no_content())
}
