// handlers/mod.rs - three handler tiers
//
// Public (no auth) → Protected (bearer token) → Elevated (control-tenant SUPERADMIN)

pub mod elevated;
pub mod protected;
pub mod public;
