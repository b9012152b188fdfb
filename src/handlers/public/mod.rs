// handlers/public/mod.rs - endpoints reachable without a token
//
// Route Prefix: /health, /api/login
// Middleware: none

pub mod health;
pub mod login;

pub use health::health;
pub use login::login;
