pub mod password;
pub mod token;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::database::manager::DatabaseError;
use crate::database::models::Role;
use crate::database::naming::CONTROL_TENANT_SLUG;

pub use password::{hash_password, verify_password, PasswordHash};
pub use token::{TokenCodec, TokenError};

/// Identity and tenant binding carried by a token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub tenant_id: i64,
    pub tenant_slug: String,
    /// Unix seconds; fractional values are truncated
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_expiry"
    )]
    pub exp: Option<i64>,
}

/// Integer or float seconds. Any other JSON value means "no expiry".
fn deserialize_expiry<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f.floor() as i64))))
}

impl Claims {
    /// SUPERADMIN role is only honored inside the control tenant
    pub fn is_superadmin(&self) -> bool {
        self.role == Role::Superadmin && self.belongs_to_control()
    }

    /// May read and write across tenants
    pub fn is_privileged(&self) -> bool {
        self.is_superadmin() || self.belongs_to_control()
    }

    pub fn belongs_to_control(&self) -> bool {
        self.tenant_slug.trim().eq_ignore_ascii_case(CONTROL_TENANT_SLUG)
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("User is inactive")]
    Inactive,

    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    #[error("User does not belong to the requested tenant")]
    TenantMismatch,

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::Database(err.into())
    }
}
