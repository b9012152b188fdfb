use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Identity role, stored upper-case in `users.role`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Admin,
    Superadmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
            Role::Superadmin => "SUPERADMIN",
        }
    }

    /// Unknown or empty values degrade to `USER`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "SUPERADMIN" => Role::Superadmin,
            "ADMIN" => Role::Admin,
            _ => Role::User,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: i64,
    pub name: Option<String>,
    pub username: String,
    pub tenant_id: i64,
    pub role: Option<String>,
    pub job_title: Option<String>,
    pub profile: Option<String>,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub password_salt: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub active: i32,
}

impl User {
    pub fn role(&self) -> Role {
        Role::parse(self.role.as_deref().unwrap_or_default())
    }

    pub fn is_active(&self) -> bool {
        self.active != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_roles_leniently() {
        assert_eq!(Role::parse("superadmin"), Role::Superadmin);
        assert_eq!(Role::parse(" ADMIN "), Role::Admin);
        assert_eq!(Role::parse(""), Role::User);
        assert_eq!(Role::parse("owner"), Role::User);
    }
}
