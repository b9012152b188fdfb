use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, Postgres};

use super::models::TenantBinding;

/// A request-scoped handle on one tenant's physical database.
///
/// Selected once per request by the router and passed down explicitly. The
/// pooled connection goes back to its pool when the session is dropped, on
/// every exit path.
pub struct TenantSession {
    tenant: TenantBinding,
    database: String,
    schema: String,
    conn: PoolConnection<Postgres>,
}

impl TenantSession {
    pub fn new(
        tenant: TenantBinding,
        database: String,
        schema: String,
        conn: PoolConnection<Postgres>,
    ) -> Self {
        Self {
            tenant,
            database,
            schema,
            conn,
        }
    }

    pub fn tenant(&self) -> &TenantBinding {
        &self.tenant
    }

    /// Physical database name
    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Connection plus the schema to qualify statements with
    pub fn parts(&mut self) -> (&mut PgConnection, &str, &TenantBinding) {
        (&mut *self.conn, &self.schema, &self.tenant)
    }
}

impl std::fmt::Debug for TenantSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantSession")
            .field("tenant", &self.tenant)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}
