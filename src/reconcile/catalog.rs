//! Catalog inspection: existence checks for the ensure steps and reflection
//! of the control database's table shapes for provisioning.

use sqlx::{FromRow, PgConnection};

use crate::database::naming::{quote_identifier, qualified};

pub async fn schema_exists(conn: &mut PgConnection, schema: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.schemata WHERE schema_name = $1)",
    )
    .bind(schema)
    .fetch_one(conn)
    .await
}

/// Exact (case-sensitive) table lookup
pub async fn table_exists(
    conn: &mut PgConnection,
    schema: &str,
    table: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
         WHERE table_schema = $1 AND table_name = $2)",
    )
    .bind(schema)
    .bind(table)
    .fetch_one(conn)
    .await
}

/// Column names in ordinal order
pub async fn column_names(
    conn: &mut PgConnection,
    schema: &str,
    table: &str,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT column_name::text FROM information_schema.columns \
         WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
    )
    .bind(schema)
    .bind(table)
    .fetch_all(conn)
    .await
}

/// A column as Postgres reports it
#[derive(Debug, Clone, FromRow)]
pub struct ReflectedColumn {
    pub name: String,
    pub data_type: String,
    pub not_null: bool,
    pub default_expr: Option<String>,
    /// `a` (always), `d` (by default) or empty
    pub identity: String,
}

impl ReflectedColumn {
    pub fn definition(&self) -> String {
        let mut def = format!("{} {}", quote_identifier(&self.name), self.data_type);
        let serial = self
            .default_expr
            .as_deref()
            .map(|d| d.starts_with("nextval("))
            .unwrap_or(false);

        match self.identity.as_str() {
            "a" => def.push_str(" GENERATED ALWAYS AS IDENTITY"),
            "d" => def.push_str(" GENERATED BY DEFAULT AS IDENTITY"),
            // sequences belong to the source database; recreate as identity
            _ if serial => def.push_str(" GENERATED BY DEFAULT AS IDENTITY"),
            _ => {
                if let Some(expr) = &self.default_expr {
                    def.push_str(" DEFAULT ");
                    def.push_str(expr);
                }
            }
        }
        if self.not_null {
            def.push_str(" NOT NULL");
        }
        def
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ReflectedConstraint {
    pub name: String,
    /// `p`, `u` or `f`
    pub kind: String,
    pub definition: String,
    /// Table a foreign key points at
    pub referenced_table: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReflectedTable {
    pub name: String,
    pub columns: Vec<ReflectedColumn>,
    pub constraints: Vec<ReflectedConstraint>,
    pub indexes: Vec<String>,
}

impl ReflectedTable {
    /// `CREATE TABLE IF NOT EXISTS` with primary key and unique constraints inline
    pub fn create_table_sql(&self, schema: &str) -> String {
        let mut parts: Vec<String> = self.columns.iter().map(|c| c.definition()).collect();
        for constraint in self.constraints.iter().filter(|c| c.kind != "f") {
            parts.push(format!(
                "CONSTRAINT {} {}",
                quote_identifier(&constraint.name),
                constraint.definition
            ));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            qualified(schema, &self.name),
            parts.join(", ")
        )
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &ReflectedConstraint> {
        self.constraints.iter().filter(|c| c.kind == "f")
    }

    pub fn add_constraint_sql(&self, schema: &str, constraint: &ReflectedConstraint) -> String {
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} {}",
            qualified(schema, &self.name),
            quote_identifier(&constraint.name),
            constraint.definition
        )
    }

    /// Index definitions made idempotent
    pub fn index_sql(&self) -> Vec<String> {
        self.indexes.iter().map(|def| guard_index_definition(def)).collect()
    }
}

/// Rewrite `CREATE [UNIQUE] INDEX name` into its `IF NOT EXISTS` form
pub fn guard_index_definition(definition: &str) -> String {
    for prefix in ["CREATE UNIQUE INDEX ", "CREATE INDEX "] {
        if let Some(rest) = definition.strip_prefix(prefix) {
            if rest.starts_with("IF NOT EXISTS ") {
                return definition.to_string();
            }
            return format!("{}IF NOT EXISTS {}", prefix, rest);
        }
    }
    definition.to_string()
}

/// Reflect every ordinary table in `schema`, skipping `excluded` tables and
/// dropping foreign keys that reference them.
pub async fn reflect_tables(
    conn: &mut PgConnection,
    schema: &str,
    excluded: &[&str],
) -> Result<Vec<ReflectedTable>, sqlx::Error> {
    let names: Vec<String> = sqlx::query_scalar(
        "SELECT c.relname::text FROM pg_class c \
         JOIN pg_namespace n ON n.oid = c.relnamespace \
         WHERE n.nspname = $1 AND c.relkind IN ('r', 'p') \
         ORDER BY c.relname",
    )
    .bind(schema)
    .fetch_all(&mut *conn)
    .await?;

    let is_excluded = |name: &str| excluded.iter().any(|e| e.eq_ignore_ascii_case(name));

    let mut tables = Vec::new();
    for name in names.into_iter().filter(|n| !is_excluded(n)) {
        let columns: Vec<ReflectedColumn> = sqlx::query_as(
            "SELECT a.attname::text AS name, \
                    format_type(a.atttypid, a.atttypmod) AS data_type, \
                    a.attnotnull AS not_null, \
                    pg_get_expr(d.adbin, d.adrelid) AS default_expr, \
                    a.attidentity::text AS identity \
             FROM pg_attribute a \
             JOIN pg_class c ON c.oid = a.attrelid \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum \
             WHERE n.nspname = $1 AND c.relname = $2 AND a.attnum > 0 AND NOT a.attisdropped \
             ORDER BY a.attnum",
        )
        .bind(schema)
        .bind(&name)
        .fetch_all(&mut *conn)
        .await?;

        let constraints: Vec<ReflectedConstraint> = sqlx::query_as(
            "SELECT con.conname::text AS name, \
                    con.contype::text AS kind, \
                    pg_get_constraintdef(con.oid) AS definition, \
                    ref.relname::text AS referenced_table \
             FROM pg_constraint con \
             JOIN pg_class c ON c.oid = con.conrelid \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             LEFT JOIN pg_class ref ON ref.oid = con.confrelid \
             WHERE n.nspname = $1 AND c.relname = $2 AND con.contype IN ('p', 'u', 'f') \
             ORDER BY con.contype, con.conname",
        )
        .bind(schema)
        .bind(&name)
        .fetch_all(&mut *conn)
        .await?;

        let constraints = constraints
            .into_iter()
            .filter(|c| {
                c.referenced_table
                    .as_deref()
                    .map(|r| !is_excluded(r))
                    .unwrap_or(true)
            })
            .collect();

        // Indexes backing constraints are recreated by the constraints themselves
        let indexes: Vec<String> = sqlx::query_scalar(
            "SELECT i.indexdef FROM pg_indexes i \
             WHERE i.schemaname = $1 AND i.tablename = $2 \
               AND NOT EXISTS ( \
                   SELECT 1 FROM pg_constraint con \
                   JOIN pg_namespace n ON n.oid = con.connamespace \
                   WHERE n.nspname = i.schemaname AND con.conname = i.indexname) \
             ORDER BY i.indexname",
        )
        .bind(schema)
        .bind(&name)
        .fetch_all(&mut *conn)
        .await?;

        tables.push(ReflectedTable {
            name,
            columns,
            constraints,
            indexes,
        });
    }

    Ok(tables)
}

pub async fn constraint_exists(
    conn: &mut PgConnection,
    schema: &str,
    constraint: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM pg_constraint con \
         JOIN pg_namespace n ON n.oid = con.connamespace \
         WHERE n.nspname = $1 AND con.conname = $2)",
    )
    .bind(schema)
    .bind(constraint)
    .fetch_one(conn)
    .await
}
