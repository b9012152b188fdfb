pub mod tenant;
pub mod user;

pub use tenant::{NewTenant, Tenant, TenantBinding};
pub use user::{Role, User};
