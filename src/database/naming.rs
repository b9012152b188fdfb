//! Physical database and identifier naming.
//!
//! Every tenant except the control tenant lives in its own Postgres database
//! whose name is derived from `(slug, id)`. The derivation is pure, so the
//! same tenant always maps to the same database even after its display name
//! changes.

use crate::config::config;

/// Postgres truncates identifiers beyond this length
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Used when sanitizing leaves nothing behind
pub const PLACEHOLDER_DB_NAME: &str = "tenant";

pub const CONTROL_TENANT_ID: i64 = 1;
pub const CONTROL_TENANT_SLUG: &str = "executive";
pub const CONTROL_TENANT_NAME: &str = "EXECUTIVE";

/// Where a tenant's data physically lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhysicalDatabase {
    /// The bootstrap database named by `DATABASE_URL`
    Control,
    /// A derived per-tenant database
    Tenant(String),
}

/// Lowercase, map anything outside `[a-z0-9_-]` to `_`, collapse repeated
/// separators, strip leading/trailing separators and bound the length.
pub fn sanitize_db_name(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let mut out = String::with_capacity(lowered.len());

    for c in lowered.chars() {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
            c
        } else {
            '_'
        };
        if (c == '_' || c == '-') && out.ends_with(c) {
            continue;
        }
        out.push(c);
    }

    let trimmed = out.trim_matches(|c| c == '_' || c == '-');
    if trimmed.is_empty() {
        return PLACEHOLDER_DB_NAME.to_string();
    }
    trimmed.chars().take(MAX_IDENTIFIER_LEN).collect()
}

/// Schema/table identifier: `[A-Za-z0-9_]` only, never starting with a digit.
pub fn sanitize_identifier(raw: &str) -> String {
    let mut out: String = raw
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    if out.is_empty() {
        out = PLACEHOLDER_DB_NAME.to_string();
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert_str(0, "t_");
    }
    out.chars().take(MAX_IDENTIFIER_LEN).collect()
}

/// Derived database name for a non-control tenant: `sanitize("{slug}-{id}")`.
pub fn tenant_db_name(tenant_id: i64, slug: &str) -> String {
    sanitize_db_name(&format!("{}-{}", slug.trim(), tenant_id))
}

/// The control tenant is recognised by its reserved id as well as its slug,
/// so it keeps routing to the bootstrap database even if the row is edited.
pub fn is_control_tenant(tenant_id: i64, slug: &str) -> bool {
    tenant_id == CONTROL_TENANT_ID || slug.trim().eq_ignore_ascii_case(CONTROL_TENANT_SLUG)
}

pub fn physical_database(tenant_id: i64, slug: &str) -> PhysicalDatabase {
    if is_control_tenant(tenant_id, slug) {
        PhysicalDatabase::Control
    } else {
        PhysicalDatabase::Tenant(tenant_db_name(tenant_id, slug))
    }
}

/// Schema namespace used inside every physical database
pub fn schema_name() -> String {
    sanitize_identifier(&config().database.schema_name)
}

/// Quote SQL identifier to prevent injection
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"schema"."table"`
pub fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(table))
}
