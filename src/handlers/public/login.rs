use axum::{extract::State, Json};

use crate::app::AppState;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::auth_service::{self, LoginRequest, LoginResponse};

/// POST /api/login
///
/// Body: `{"username", "password", "tenant_slug"?}`. Returns a bearer token
/// bound to the selected tenant plus the identity's display fields.
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<LoginResponse> {
    let response = auth_service::login(&state.tokens, request).await?;
    Ok(ApiResponse::success(response))
}
