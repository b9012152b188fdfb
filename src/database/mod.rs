pub mod identity;
pub mod manager;
pub mod models;
pub mod naming;
pub mod records;
pub mod registry;
pub mod session;

pub use manager::{DatabaseError, DatabaseManager};
pub use registry::TenantRegistry;
pub use session::TenantSession;
