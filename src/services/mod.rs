pub mod auth_service;
pub mod fanout;
pub mod media;
pub mod provisioner;
pub mod router;
pub mod tenant_service;

pub use media::{DisabledMediaStore, HttpMediaStore, MediaStore};
