// handlers/protected/mod.rs - bearer token required
//
// Route Prefix: /api/{kind}, /api/payables/{id}/document
// Middleware: auth_middleware (claims in request extensions)
//
// Every handler routes through the tenant router: the caller's own tenant,
// or `?tenant_id=` when the caller is privileged.

pub mod documents;
pub mod records;

use serde::Deserialize;

use crate::database::records::EntityKind;
use crate::error::ApiError;

#[derive(Debug, Default, Deserialize)]
pub struct TenantQuery {
    pub tenant_id: Option<i64>,
    /// Fan-out name filter, list endpoints only
    pub company: Option<String>,
}

pub(crate) fn entity_kind(segment: &str) -> Result<EntityKind, ApiError> {
    EntityKind::from_path(segment)
        .ok_or_else(|| ApiError::not_found(format!("Unknown collection '{}'", segment)))
}
