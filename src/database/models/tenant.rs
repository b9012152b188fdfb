use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::naming::{is_control_tenant, physical_database, PhysicalDatabase};

/// One row of the tenant registry
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub created_on: Option<NaiveDate>,
    pub updated_on: Option<NaiveDate>,
    pub created_by: Option<String>,
}

impl Tenant {
    pub fn is_control(&self) -> bool {
        is_control_tenant(self.id, &self.slug)
    }

    pub fn physical_database(&self) -> PhysicalDatabase {
        physical_database(self.id, &self.slug)
    }

    pub fn binding(&self) -> TenantBinding {
        TenantBinding {
            id: self.id,
            slug: self.slug.clone(),
            name: self.name.clone(),
        }
    }
}

/// Registry insert payload
#[derive(Debug, Clone, Deserialize)]
pub struct NewTenant {
    pub name: String,
    pub slug: String,
    pub created_by: Option<String>,
}

/// The `(tenant_id, tenant_name)` pair stamped on records, plus the slug
/// used for database naming
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantBinding {
    pub id: i64,
    pub slug: String,
    pub name: String,
}
