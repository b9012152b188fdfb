pub mod auth;
pub mod response;

pub use auth::{auth_middleware, require_superadmin};
pub use response::{ApiResponse, ApiResult};
