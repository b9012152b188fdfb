// handlers/elevated/mod.rs - control-tenant SUPERADMIN only
//
// Route Prefix: /api/tenants
// Middleware: auth_middleware + require_superadmin

pub mod tenants;
