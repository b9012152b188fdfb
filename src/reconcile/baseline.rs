//! Baseline table shapes every physical database is reconciled towards.

use crate::database::naming::{quote_identifier, qualified};

/// Registry table, present only in the control database
pub const TENANTS_TABLE: &str = "tenants";
pub const USERS_TABLE: &str = "users";

/// Legacy singular registry name dropped from the control database
pub const LEGACY_TENANT_TABLE: &str = "tenant";
/// Legacy wrong-case registry name renamed to [`TENANTS_TABLE`]
pub const LEGACY_TENANTS_TABLE: &str = "Tenants";

#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub sql_type: &'static str,
    pub not_null: bool,
    pub unique: bool,
    pub identity: bool,
    pub default: Option<&'static str>,
}

impl ColumnSpec {
    const fn new(name: &'static str, sql_type: &'static str) -> Self {
        Self {
            name,
            sql_type,
            not_null: false,
            unique: false,
            identity: false,
            default: None,
        }
    }

    const fn id() -> Self {
        let mut col = Self::new("id", "bigint");
        col.identity = true;
        col.not_null = true;
        col
    }

    const fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    const fn default(mut self, expr: &'static str) -> Self {
        self.default = Some(expr);
        self
    }

    /// Column definition used inside `CREATE TABLE`
    fn create_definition(&self) -> String {
        let mut def = format!("{} {}", quote_identifier(self.name), self.sql_type);
        if self.identity {
            def.push_str(" GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY");
            return def;
        }
        if let Some(expr) = self.default {
            def.push_str(" DEFAULT ");
            def.push_str(expr);
        }
        if self.not_null {
            def.push_str(" NOT NULL");
        }
        if self.unique {
            def.push_str(" UNIQUE");
        }
        def
    }

    /// Column definition used by `ADD COLUMN`. Existing rows would violate
    /// NOT NULL, so it is only kept when a default fills them.
    fn add_definition(&self) -> String {
        let mut def = format!("{} {}", quote_identifier(self.name), self.sql_type);
        if let Some(expr) = self.default {
            def.push_str(" DEFAULT ");
            def.push_str(expr);
            if self.not_null {
                def.push_str(" NOT NULL");
            }
        }
        def
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [ColumnSpec],
    /// Carries the `(tenant_id, tenant_name)` pair
    pub tenant_scoped: bool,
    /// Has a free-text `company` column used for legacy backfill
    pub has_company: bool,
}

impl TableSpec {
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }

    pub fn create_table_sql(&self, schema: &str) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| c.create_definition())
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            qualified(schema, self.name),
            columns
        )
    }

    pub fn add_column_sql(&self, schema: &str, column: &ColumnSpec) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {}",
            qualified(schema, self.name),
            column.add_definition()
        )
    }

    pub fn tenant_index_name(&self) -> String {
        format!("ix_{}_tenant_id", self.name)
    }

    pub fn tenant_index_sql(&self, schema: &str) -> String {
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quote_identifier(&self.tenant_index_name()),
            qualified(schema, self.name),
            quote_identifier("tenant_id")
        )
    }
}

const fn c(name: &'static str, sql_type: &'static str) -> ColumnSpec {
    ColumnSpec::new(name, sql_type)
}

pub const TENANTS: TableSpec = TableSpec {
    name: TENANTS_TABLE,
    columns: &[
        ColumnSpec::id(),
        c("name", "varchar(200)").not_null(),
        c("slug", "varchar(100)").not_null().unique(),
        c("created_on", "date").default("CURRENT_DATE"),
        c("updated_on", "date"),
        c("created_by", "varchar(100)"),
    ],
    tenant_scoped: false,
    has_company: false,
};

// `name` must stay the second column; see the users column-order repair
pub const USERS: TableSpec = TableSpec {
    name: USERS_TABLE,
    columns: &[
        ColumnSpec::id(),
        c("name", "varchar(200)"),
        c("username", "varchar(100)").not_null().unique(),
        c("tenant_id", "bigint").not_null().default("1"),
        c("role", "varchar(20)").default("'USER'"),
        c("job_title", "varchar(200)"),
        c("profile", "varchar(100)"),
        c("permission", "varchar(100)"),
        c("phone", "varchar(30)"),
        c("email", "varchar(200)"),
        c("password_salt", "varchar(64)"),
        c("password_hash", "varchar(128)"),
        c("active", "integer").not_null().default("1"),
    ],
    tenant_scoped: false,
    has_company: false,
};

pub const EXECUTIVES: TableSpec = TableSpec {
    name: "executives",
    columns: &[
        ColumnSpec::id(),
        c("executive", "varchar(200)"),
        c("job_title", "varchar(200)"),
        c("profile", "varchar(100)"),
        c("company", "varchar(200)"),
        c("tenant_id", "bigint"),
        c("tenant_name", "varchar(200)"),
    ],
    tenant_scoped: true,
    has_company: true,
};

pub const PAYABLES: TableSpec = TableSpec {
    name: "payables",
    columns: &[
        ColumnSpec::id(),
        c("description", "varchar(500)"),
        c("charge_type", "varchar(100)"),
        c("charge_id", "varchar(100)"),
        c("charge_tag", "varchar(100)"),
        c("creditor", "varchar(200)"),
        c("creditor_type", "varchar(100)"),
        c("original_amount", "numeric(14,2)"),
        c("payment_type", "varchar(30)"),
        c("installments", "integer"),
        c("discount", "numeric(14,2)"),
        c("surcharge", "numeric(14,2)"),
        c("final_amount", "numeric(14,2)"),
        c("debtor_executive_id", "bigint"),
        c("debtor", "varchar(200)"),
        c("payment_status", "varchar(50)"),
        c("charge_status", "varchar(50)"),
        c("due_date", "date"),
        c("document_ref", "varchar(1000)"),
        c("charge_url", "varchar(1000)"),
        c("portal_user", "varchar(200)"),
        c("portal_password", "varchar(200)"),
        c("company", "varchar(200)"),
        c("tenant_id", "bigint"),
        c("tenant_name", "varchar(200)"),
    ],
    tenant_scoped: true,
    has_company: true,
};

pub const ASSETS: TableSpec = TableSpec {
    name: "assets",
    columns: &[
        ColumnSpec::id(),
        c("asset", "varchar(200)"),
        c("internal_code", "varchar(100)"),
        c("plate", "varchar(20)"),
        c("city", "varchar(100)"),
        c("state", "varchar(2)"),
        c("cost_center", "varchar(100)"),
        c("owner", "varchar(200)"),
        c("responsible", "varchar(200)"),
        c("assignee", "varchar(200)"),
        c("company", "varchar(200)"),
        c("tenant_id", "bigint"),
        c("tenant_name", "varchar(200)"),
    ],
    tenant_scoped: true,
    has_company: true,
};

pub const COST_CENTERS: TableSpec = TableSpec {
    name: "cost_centers",
    columns: &[
        ColumnSpec::id(),
        c("internal_code", "varchar(100)"),
        c("class", "varchar(100)"),
        c("name", "varchar(200)"),
        c("city", "varchar(100)"),
        c("state", "varchar(2)"),
        c("company", "varchar(200)").not_null().default("''"),
        c("department", "varchar(200)"),
        c("responsible", "varchar(200)"),
        c("tenant_id", "bigint"),
        c("tenant_name", "varchar(200)"),
    ],
    tenant_scoped: true,
    has_company: true,
};

pub const DEPARTMENTS: TableSpec = TableSpec {
    name: "departments",
    columns: &[
        ColumnSpec::id(),
        c("department", "varchar(200)"),
        c("description", "varchar(1000)"),
        c("tenant_id", "bigint"),
        c("tenant_name", "varchar(200)"),
        c("registered_on", "date").default("CURRENT_DATE"),
        c("registered_by", "varchar(100)"),
    ],
    tenant_scoped: true,
    has_company: false,
};

pub const ROLES: TableSpec = TableSpec {
    name: "roles",
    columns: &[
        ColumnSpec::id(),
        c("role", "varchar(200)"),
        c("description", "varchar(1000)"),
        c("department", "varchar(200)"),
        c("tenant_id", "bigint"),
        c("tenant_name", "varchar(200)"),
        c("registered_on", "date").default("CURRENT_DATE"),
        c("registered_by", "varchar(100)"),
    ],
    tenant_scoped: true,
    has_company: false,
};

pub const COLLABORATORS: TableSpec = TableSpec {
    name: "collaborators",
    columns: &[
        ColumnSpec::id(),
        c("collaborator", "varchar(200)"),
        c("description", "varchar(1000)"),
        c("department", "varchar(200)"),
        c("role", "varchar(200)"),
        c("tenant_id", "bigint"),
        c("tenant_name", "varchar(200)"),
        c("registered_on", "date").default("CURRENT_DATE"),
        c("registered_by", "varchar(100)"),
    ],
    tenant_scoped: true,
    has_company: false,
};

/// Tables holding tenant records, in creation order
pub const DOMAIN_TABLES: &[TableSpec] = &[
    EXECUTIVES,
    PAYABLES,
    ASSETS,
    COST_CENTERS,
    DEPARTMENTS,
    ROLES,
    COLLABORATORS,
];

/// Every table a physical database must have. Tenant databases skip the registry.
pub fn tables_for(control: bool) -> Vec<&'static TableSpec> {
    let mut tables = Vec::with_capacity(DOMAIN_TABLES.len() + 2);
    if control {
        tables.push(&TENANTS);
    }
    tables.push(&USERS);
    tables.extend(DOMAIN_TABLES.iter());
    tables
}

/// Tables that get an index on `tenant_id`
pub fn indexed_tables() -> impl Iterator<Item = &'static TableSpec> {
    std::iter::once(&USERS).chain(DOMAIN_TABLES.iter())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_table_is_guarded_and_schema_qualified() {
        let sql = TENANTS.create_table_sql("EXECUTIVE");
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"EXECUTIVE\".\"tenants\" ("));
        assert!(sql.contains("\"id\" bigint GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY"));
        assert!(sql.contains("\"slug\" varchar(100) NOT NULL UNIQUE"));
    }

    #[test]
    fn added_columns_only_keep_not_null_with_a_default() {
        let active = USERS.column("active").unwrap();
        assert_eq!(
            USERS.add_column_sql("EXECUTIVE", active),
            "ALTER TABLE \"EXECUTIVE\".\"users\" ADD COLUMN IF NOT EXISTS \"active\" integer DEFAULT 1 NOT NULL"
        );

        let name = TENANTS.column("name").unwrap();
        let sql = TENANTS.add_column_sql("EXECUTIVE", name);
        assert!(!sql.contains("NOT NULL"));
    }

    #[test]
    fn users_keep_name_as_second_column() {
        assert_eq!(USERS.columns[1].name, "name");
    }

    #[test]
    fn tenant_databases_never_get_the_registry() {
        assert!(tables_for(false).iter().all(|t| t.name != TENANTS_TABLE));
        assert_eq!(tables_for(true)[0].name, TENANTS_TABLE);
    }

    #[test]
    fn every_domain_table_carries_the_tenant_pair() {
        for table in DOMAIN_TABLES {
            assert!(table.column("tenant_id").is_some(), "{}", table.name);
            assert!(table.column("tenant_name").is_some(), "{}", table.name);
            assert_eq!(table.has_company, table.column("company").is_some(), "{}", table.name);
        }
    }

    #[test]
    fn tenant_index_names() {
        assert_eq!(PAYABLES.tenant_index_name(), "ix_payables_tenant_id");
        assert!(PAYABLES
            .tenant_index_sql("EXECUTIVE")
            .starts_with("CREATE INDEX IF NOT EXISTS \"ix_payables_tenant_id\""));
    }
}
