// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::auth::{AuthError, TokenError};
use crate::database::manager::DatabaseError;
use crate::database::records::RecordError;
use crate::services::fanout::{FanoutError, TenantFailure};
use crate::services::media::MediaError;
use crate::services::provisioner::ProvisionError;
use crate::services::router::RouteError;
use crate::services::tenant_service::TenantError;

/// Longest diagnostic returned inside a provisioning failure
pub const DIAGNOSTIC_MAX_CHARS: usize = 240;

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    ValidationError {
        message: String,
        field_errors: Option<HashMap<String, String>>,
    },
    InvalidJson(String),

    // 401 Unauthorized (also: identity lacks the required role)
    Unauthorized(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict
    Conflict(String),

    // 413 Payload Too Large
    PayloadTooLarge(String),

    // 500 Internal Server Error
    InternalServerError(String),

    // 502 Bad Gateway: a tenant database could not be provisioned or reconciled
    ProvisioningFailed(String),

    // 502 Bad Gateway: the blob store failed
    UpstreamFailure(String),

    // 503 Service Unavailable
    ServiceUnavailable(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::ValidationError { .. } => 400,
            ApiError::InvalidJson(_) => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::PayloadTooLarge(_) => 413,
            ApiError::InternalServerError(_) => 500,
            ApiError::ProvisioningFailed(_) => 502,
            ApiError::UpstreamFailure(_) => 502,
            ApiError::ServiceUnavailable(_) => 503,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::ValidationError { message, .. } => message,
            ApiError::InvalidJson(msg) => msg,
            ApiError::Unauthorized(msg) => msg,
            ApiError::NotFound(msg) => msg,
            ApiError::Conflict(msg) => msg,
            ApiError::PayloadTooLarge(msg) => msg,
            ApiError::InternalServerError(msg) => msg,
            ApiError::ProvisioningFailed(msg) => msg,
            ApiError::UpstreamFailure(msg) => msg,
            ApiError::ServiceUnavailable(msg) => msg,
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        match self {
            ApiError::ValidationError { message, field_errors } => {
                let mut response = json!({
                    "error": true,
                    "message": message,
                    "code": "VALIDATION_ERROR"
                });

                if let Some(field_errors) = field_errors {
                    response["field_errors"] = json!(field_errors);
                }

                response
            }
            _ => {
                json!({
                    "error": true,
                    "message": self.message(),
                    "code": self.error_code()
                })
            }
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::ValidationError { .. } => "VALIDATION_ERROR",
            ApiError::InvalidJson(_) => "INVALID_JSON",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::ProvisioningFailed(_) => "PROVISIONING_FAILED",
            ApiError::UpstreamFailure(_) => "UPSTREAM_FAILURE",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }
}

// Static constructor methods
impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn validation_error(
        message: impl Into<String>,
        field_errors: Option<HashMap<String, String>>,
    ) -> Self {
        ApiError::ValidationError {
            message: message.into(),
            field_errors,
        }
    }

    pub fn invalid_json(message: impl Into<String>) -> Self {
        ApiError::InvalidJson(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        ApiError::PayloadTooLarge(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn provisioning_failed(message: impl Into<String>) -> Self {
        ApiError::ProvisioningFailed(message.into())
    }

    pub fn upstream_failure(message: impl Into<String>) -> Self {
        ApiError::UpstreamFailure(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }
}

/// Collapse whitespace runs, substitute `fallback` for an empty message and
/// cap the result at [`DIAGNOSTIC_MAX_CHARS`] characters plus `...`.
pub fn bounded_diagnostic(message: &str, fallback: &str) -> String {
    let collapsed = message.split_whitespace().collect::<Vec<_>>().join(" ");
    let collapsed = if collapsed.is_empty() {
        fallback.to_string()
    } else {
        collapsed
    };

    if collapsed.chars().count() <= DIAGNOSTIC_MAX_CHARS {
        return collapsed;
    }
    let mut truncated: String = collapsed.chars().take(DIAGNOSTIC_MAX_CHARS).collect();
    truncated.push_str("...");
    truncated
}

// Convert other error types to ApiError
impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound(msg) => ApiError::not_found(msg),
            DatabaseError::Conflict(msg) => ApiError::conflict(msg),
            DatabaseError::InvalidDatabaseName(name) => {
                tracing::error!("Rejected database name: {}", name);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
            DatabaseError::ConfigMissing(_) | DatabaseError::InvalidDatabaseUrl => {
                tracing::error!("Database configuration error: {}", err);
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            DatabaseError::Sqlx(sqlx::Error::PoolTimedOut)
            | DatabaseError::Sqlx(sqlx::Error::Io(_)) => {
                tracing::error!("Database connection error: {}", err);
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            DatabaseError::Sqlx(sqlx_err) => {
                // Log the real error but return generic message
                tracing::error!("SQLx error: {}", sqlx_err);
                ApiError::internal_server_error("Database error occurred")
            }
        }
    }
}

impl From<RecordError> for ApiError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::NotAnObject => ApiError::invalid_json("Request body must be a JSON object"),
            RecordError::UnknownFields(fields) => {
                let field_errors = fields
                    .into_iter()
                    .map(|field| (field, "Unknown field".to_string()))
                    .collect();
                ApiError::validation_error("Request contains unknown fields", Some(field_errors))
            }
            RecordError::InvalidValue(msg) => ApiError::validation_error(msg, None),
            RecordError::Database(db) => db.into(),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Encoding(e) => {
                tracing::error!("Token encoding error: {}", e);
                ApiError::internal_server_error("Failed to issue token")
            }
            other => ApiError::unauthorized(other.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials | AuthError::Inactive | AuthError::TenantMismatch => {
                ApiError::unauthorized(err.to_string())
            }
            AuthError::TenantNotFound(_) => ApiError::unauthorized(err.to_string()),
            AuthError::Validation(msg) => ApiError::validation_error(msg, None),
            AuthError::Token(e) => e.into(),
            AuthError::Database(e) => e.into(),
        }
    }
}

impl From<ProvisionError> for ApiError {
    fn from(err: ProvisionError) -> Self {
        tracing::error!("Provisioning failed: {}", err);
        ApiError::provisioning_failed(err.diagnostic())
    }
}

impl From<RouteError> for ApiError {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::InvalidBinding => ApiError::unauthorized(err.to_string()),
            RouteError::UnknownTenant(_) => ApiError::unauthorized(err.to_string()),
            RouteError::TargetNotFound(_) => ApiError::not_found(err.to_string()),
            RouteError::Reconcile { database, diagnostic } => {
                tracing::error!("Request-path reconciliation failed for {}: {}", database, diagnostic);
                ApiError::provisioning_failed(diagnostic)
            }
            RouteError::Database(e) => e.into(),
        }
    }
}

impl From<FanoutError> for ApiError {
    fn from(err: FanoutError) -> Self {
        match err {
            FanoutError::Registry(e) => e.into(),
            FanoutError::Tenant { tenant_id, slug, source } => {
                tracing::error!("Fan-out aborted at tenant {} ({}): {}", tenant_id, slug, source);
                let inner: ApiError = (*source).into();
                let message = format!("tenant {} ({}): {}", tenant_id, slug, inner.message());
                match inner {
                    ApiError::ProvisioningFailed(_) => ApiError::provisioning_failed(message),
                    ApiError::ServiceUnavailable(_) => ApiError::service_unavailable(message),
                    _ => ApiError::internal_server_error(message),
                }
            }
        }
    }
}

impl From<TenantFailure> for ApiError {
    fn from(err: TenantFailure) -> Self {
        match err {
            TenantFailure::Route(e) => e.into(),
            TenantFailure::Records(e) => e.into(),
        }
    }
}

impl From<TenantError> for ApiError {
    fn from(err: TenantError) -> Self {
        match err {
            TenantError::Validation(msg) => ApiError::bad_request(msg),
            TenantError::NotFound(_) => ApiError::not_found(err.to_string()),
            TenantError::Conflict(_) => ApiError::conflict(err.to_string()),
            TenantError::ControlSlugImmutable | TenantError::NotDeletable => {
                ApiError::bad_request(err.to_string())
            }
            TenantError::Provisioning(e) => e.into(),
            TenantError::Database(e) => e.into(),
        }
    }
}

impl From<MediaError> for ApiError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::NotFound(_) => ApiError::not_found(err.to_string()),
            MediaError::TooLarge { .. } => ApiError::payload_too_large(err.to_string()),
            MediaError::NotConfigured => {
                tracing::error!("Blob store is not configured");
                ApiError::upstream_failure("Document storage is not configured")
            }
            other => {
                tracing::error!("Blob store failure: {}", other);
                ApiError::upstream_failure(format!("Document storage failed: {}", other))
            }
        }
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_collapses_whitespace() {
        let msg = bounded_diagnostic("relation \n\t  \"payables\"   does not exist", "Error");
        assert_eq!(msg, "relation \"payables\" does not exist");
    }

    #[test]
    fn diagnostic_falls_back_when_empty() {
        assert_eq!(bounded_diagnostic("   \n ", "OperationalError"), "OperationalError");
    }

    #[test]
    fn diagnostic_is_truncated_with_ellipsis() {
        let long = "x".repeat(500);
        let msg = bounded_diagnostic(&long, "Error");
        assert_eq!(msg.chars().count(), DIAGNOSTIC_MAX_CHARS + 3);
        assert!(msg.ends_with("..."));
    }

    #[test]
    fn control_tenant_guards_are_bad_requests() {
        let err: ApiError = TenantError::ControlSlugImmutable.into();
        assert_eq!(err.status_code(), 400);
        let err: ApiError = TenantError::NotDeletable.into();
        assert_eq!(err.status_code(), 400);
        let err: ApiError = TenantError::Conflict("slug 'acme' is already in use".into()).into();
        assert_eq!(err.status_code(), 409);
    }

    #[test]
    fn provisioning_failure_is_bad_gateway_class() {
        let err = ApiError::provisioning_failed("failed to provision");
        assert_eq!(err.status_code(), 502);
        assert_eq!(err.to_json()["code"], "PROVISIONING_FAILED");
    }
}
