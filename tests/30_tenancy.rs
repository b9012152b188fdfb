//! Postgres-backed scenarios. Everything shares the process-wide pool cache,
//! so the steps run inside one test on one runtime.

mod common;

use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use serde_json::{json, Value};

use executive_api::bootstrap::{self, Backoff};
use executive_api::config::config;
use executive_api::database::identity::{self, NewUser};
use executive_api::database::manager::DatabaseManager;
use executive_api::database::models::{NewTenant, Role, Tenant};
use executive_api::database::naming::{quote_identifier, qualified, schema_name, tenant_db_name};
use executive_api::database::records::{self, EntityKind};
use executive_api::database::registry::TenantRegistry;
use executive_api::reconcile::{self, catalog, ensure, ReconcileTarget};
use executive_api::services::fanout;
use executive_api::services::router;
use executive_api::services::tenant_service::{self, TenantChanges, TenantError};

async fn create_tenant(name: &str, slug: &str) -> Result<Tenant> {
    let tenant = tenant_service::create(
        NewTenant {
            name: name.to_string(),
            slug: slug.to_string(),
            created_by: None,
        },
        "INTEGRATION",
    )
    .await?;
    Ok(tenant)
}

async fn insert_executive(tenant: &Tenant, executive: &str) -> Result<Value> {
    let mut session = router::open_tenant_session(tenant).await?;
    let (conn, schema, binding) = session.parts();
    let payload = records::prepare_payload(EntityKind::Executives, json!({"executive": executive}))?;
    Ok(records::create(conn, schema, EntityKind::Executives, payload, binding).await?)
}

async fn executive_names(tenant: &Tenant) -> Result<Vec<String>> {
    let mut session = router::open_tenant_session(tenant).await?;
    let (conn, schema, binding) = session.parts();
    let rows = records::list(conn, schema, EntityKind::Executives, binding).await?;
    Ok(rows
        .iter()
        .filter_map(|r| r["executive"].as_str().map(str::to_string))
        .collect())
}

/// Create → login as ADMIN.<SLUG> → token bound to the new tenant
async fn provisioned_tenant_admin_can_log_in(tenant: &Tenant) -> Result<()> {
    assert!(tenant.id > 1);
    let database = tenant_db_name(tenant.id, &tenant.slug);
    assert!(DatabaseManager::database_exists(&database).await?);
    // provisioning records the reconciliation watermark
    assert!(reconcile::is_reconciled(&database));

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({
                "username": format!("ADMIN.{}", tenant.slug.to_uppercase()),
                "password": config().security.tenant_admin_default_password,
            })
            .to_string(),
        ))?;
    let (status, body) = common::send(common::app(), request).await?;
    assert_eq!(status, StatusCode::OK, "{body}");

    let token = body["data"]["token"].as_str().context("token")?;
    let claims = common::codec().verify(token)?;
    assert_eq!(claims.tenant_id, tenant.id);
    assert_eq!(claims.tenant_slug, tenant.slug);
    assert_eq!(body["data"]["superadmin"], false);
    Ok(())
}

async fn tenants_are_isolated(a: &Tenant, b: &Tenant) -> Result<()> {
    let created = insert_executive(a, "Only In A").await?;
    assert_eq!(created["tenant_id"], a.id);
    assert_eq!(created["tenant_name"], a.name.as_str());

    assert!(executive_names(a).await?.contains(&"Only In A".to_string()));
    assert!(!executive_names(b).await?.contains(&"Only In A".to_string()));
    Ok(())
}

async fn fan_out_orders_by_tenant_name(alpha: &Tenant, beta: &Tenant) -> Result<()> {
    insert_executive(beta, "Beta Boss").await?;
    insert_executive(alpha, "Alpha Boss").await?;

    let rows = fanout::list_across_tenants(EntityKind::Executives, None, true).await?;
    let position = |name: &str| rows.iter().position(|r| r["executive"] == name);
    let alpha_at = position("Alpha Boss").context("alpha row")?;
    let beta_at = position("Beta Boss").context("beta row")?;
    assert!(alpha_at < beta_at, "Alpha must sort before Beta");

    let only_alpha =
        fanout::list_across_tenants(EntityKind::Executives, Some(&alpha.slug), true).await?;
    assert!(only_alpha.iter().all(|r| r["tenant_id"] == alpha.id));
    Ok(())
}

async fn reconciliation_is_idempotent(tenant: &Tenant) -> Result<()> {
    let schema = schema_name();
    let pool = DatabaseManager::tenant_pool(&tenant_db_name(tenant.id, &tenant.slug)).await?;
    let mut conn = pool.acquire().await?;
    let target = ReconcileTarget::Tenant(tenant.binding());

    reconcile::reconcile_database(&mut conn, &schema, &target).await?;
    let first = catalog::column_names(&mut conn, &schema, "payables").await?;
    reconcile::reconcile_database(&mut conn, &schema, &target).await?;
    let second = catalog::column_names(&mut conn, &schema, "payables").await?;

    assert_eq!(first, second);
    assert!(!catalog::table_exists(&mut conn, &schema, "tenants").await?);
    Ok(())
}

async fn control_backfill_matches_company_name(tenant: &Tenant) -> Result<()> {
    let schema = schema_name();
    let pool = DatabaseManager::control_pool().await?;
    let mut conn = pool.acquire().await?;
    let table = qualified(&schema, "executives");

    let id: i64 = sqlx::query_scalar(&format!(
        "INSERT INTO {} (executive, company) VALUES ('Legacy Row', $1) RETURNING id::bigint",
        table
    ))
    .bind(tenant.name.to_uppercase())
    .fetch_one(&mut *conn)
    .await?;

    ensure::backfill_control(&mut conn, &schema).await?;

    let (tenant_id, tenant_name): (Option<i64>, Option<String>) = sqlx::query_as(&format!(
        "SELECT tenant_id::bigint, tenant_name FROM {} WHERE id = $1",
        table
    ))
    .bind(id)
    .fetch_one(&mut *conn)
    .await?;
    assert_eq!(tenant_id, Some(tenant.id));
    assert_eq!(tenant_name.as_deref(), Some(tenant.name.as_str()));
    Ok(())
}

async fn control_tenant_is_not_deletable() -> Result<()> {
    assert!(matches!(
        tenant_service::delete(1, false).await,
        Err(TenantError::NotDeletable)
    ));
    assert!(matches!(
        tenant_service::delete(1, true).await,
        Err(TenantError::NotDeletable)
    ));
    Ok(())
}

async fn duplicate_slug_conflicts(existing: &Tenant) -> Result<()> {
    let err = create_tenant("Copycat", &existing.slug).await.unwrap_err();
    let err = err.downcast::<TenantError>()?;
    assert!(matches!(err, TenantError::Conflict(_)), "{err:?}");
    Ok(())
}

async fn tenant_backfill_stamps_unbound_rows(tenant: &Tenant) -> Result<()> {
    let schema = schema_name();
    let pool = DatabaseManager::tenant_pool(&tenant_db_name(tenant.id, &tenant.slug)).await?;
    let mut conn = pool.acquire().await?;
    let table = qualified(&schema, "executives");

    let id: i64 = sqlx::query_scalar(&format!(
        "INSERT INTO {} (executive, tenant_name) VALUES ('Unbound Row', '  ') RETURNING id::bigint",
        table
    ))
    .fetch_one(&mut *conn)
    .await?;

    let touched = ensure::backfill_tenant(&mut conn, &schema, &tenant.binding()).await?;
    assert!(touched >= 1);

    let (tenant_id, tenant_name): (Option<i64>, Option<String>) = sqlx::query_as(&format!(
        "SELECT tenant_id::bigint, tenant_name FROM {} WHERE id = $1",
        table
    ))
    .bind(id)
    .fetch_one(&mut *conn)
    .await?;
    assert_eq!(tenant_id, Some(tenant.id));
    assert_eq!(tenant_name.as_deref(), Some(tenant.name.as_str()));

    // already bound rows are left alone
    assert_eq!(ensure::backfill_tenant(&mut conn, &schema, &tenant.binding()).await?, 0);
    Ok(())
}

async fn payable_amounts_are_derived(tenant: &Tenant) -> Result<()> {
    let mut session = router::open_tenant_session(tenant).await?;
    let (conn, schema, binding) = session.parts();

    let payload = records::prepare_payload(
        EntityKind::Payables,
        json!({
            "description": "Office rent",
            "original_amount": 100,
            "discount": 10,
            "surcharge": 5,
            "installments": 3,
            "payment_type": "parcela",
            "document_ref": "media:forged"
        }),
    )?;
    let created = records::create(&mut *conn, schema, EntityKind::Payables, payload, binding).await?;
    let final_amount = created["final_amount"].as_f64().context("final_amount")?;
    assert!((final_amount - 31.67).abs() < 0.001, "{created}");
    assert_eq!(created["payment_type"], "PARCELAS");
    assert!(created["document_ref"].is_null());

    let id = created["id"].as_i64().context("id")?;
    let payload = records::prepare_payload(EntityKind::Payables, json!({"payment_type": "Cota Unica"}))?;
    let updated = records::update(&mut *conn, schema, EntityKind::Payables, id, payload, binding)
        .await?
        .context("updated payable")?;
    assert_eq!(updated["installments"], 1);
    let final_amount = updated["final_amount"].as_f64().context("final_amount")?;
    assert!((final_amount - 95.0).abs() < 0.001, "{updated}");

    let payload = records::prepare_payload(EntityKind::Payables, json!({"final_amount": 12.5}))?;
    let pinned = records::update(&mut *conn, schema, EntityKind::Payables, id, payload, binding)
        .await?
        .context("pinned payable")?;
    assert_eq!(pinned["final_amount"].as_f64(), Some(12.5));
    Ok(())
}

/// Build a layout in a throwaway schema of the control database, reconcile
/// it as the control target, then drop the schema again.
async fn in_scratch_schema<F, Fut>(prefix: &str, body: F) -> Result<()>
where
    F: FnOnce(String) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let schema = common::scratch_schema(prefix);
    let outcome = body(schema.clone()).await;

    let pool = DatabaseManager::control_pool().await?;
    sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", quote_identifier(&schema)))
        .execute(&pool)
        .await?;
    outcome
}

async fn control_rows(conn: &mut sqlx::PgConnection, schema: &str) -> Result<Vec<(i64, String, String)>> {
    Ok(sqlx::query_as(&format!(
        "SELECT id::bigint, name::text, slug::text FROM {} ORDER BY id",
        qualified(schema, "tenants")
    ))
    .fetch_all(conn)
    .await?)
}

async fn control_tenant_row_is_repaired() -> Result<()> {
    in_scratch_schema("control_repair", |schema| async move {
        let pool = DatabaseManager::control_pool().await?;
        let mut conn = pool.acquire().await?;
        let tenants = qualified(&schema, "tenants");
        let users = qualified(&schema, "users");
        let control = || (1, "EXECUTIVE".to_string(), "executive".to_string());

        reconcile::reconcile_database(&mut conn, &schema, &ReconcileTarget::Control).await?;
        assert_eq!(control_rows(&mut conn, &schema).await?, vec![control()]);

        // id 1 renamed away while another row took the control slug
        sqlx::query(&format!("UPDATE {tenants} SET name = 'Old Home', slug = 'oldhome' WHERE id = 1"))
            .execute(&mut *conn)
            .await?;
        sqlx::query(&format!("INSERT INTO {tenants} (id, name, slug) VALUES (7, 'Shadow', 'executive')"))
            .execute(&mut *conn)
            .await?;
        sqlx::query(&format!("INSERT INTO {users} (username, tenant_id) VALUES ('SHADOW.USER', 7)"))
            .execute(&mut *conn)
            .await?;

        reconcile::reconcile_database(&mut conn, &schema, &ReconcileTarget::Control).await?;
        assert_eq!(control_rows(&mut conn, &schema).await?, vec![control()]);
        let bound: i64 = sqlx::query_scalar(&format!(
            "SELECT tenant_id::bigint FROM {users} WHERE username = 'SHADOW.USER'"
        ))
        .fetch_one(&mut *conn)
        .await?;
        assert_eq!(bound, 1);

        // id 1 missing, control slug on another id: that row becomes id 1
        sqlx::query(&format!("DELETE FROM {tenants} WHERE id = 1"))
            .execute(&mut *conn)
            .await?;
        sqlx::query(&format!("INSERT INTO {tenants} (id, name, slug) VALUES (9, 'Exec Copy', 'executive')"))
            .execute(&mut *conn)
            .await?;

        reconcile::reconcile_database(&mut conn, &schema, &ReconcileTarget::Control).await?;
        assert_eq!(control_rows(&mut conn, &schema).await?, vec![control()]);

        let next: i64 = sqlx::query_scalar(&format!(
            "INSERT INTO {tenants} (name, slug) VALUES ('Next', 'next') RETURNING id::bigint"
        ))
        .fetch_one(&mut *conn)
        .await?;
        assert!(next > 1);
        Ok(())
    })
    .await
}

async fn legacy_control_layout_is_repaired() -> Result<()> {
    in_scratch_schema("legacy_repair", |schema| async move {
        let pool = DatabaseManager::control_pool().await?;
        let mut conn = pool.acquire().await?;

        for sql in [
            format!("CREATE SCHEMA {}", quote_identifier(&schema)),
            format!("CREATE TABLE {} (id bigint)", qualified(&schema, "tenant")),
            format!(
                "CREATE TABLE {} (id bigint GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY, \
                 name varchar(200) NOT NULL, slug varchar(100) NOT NULL UNIQUE)",
                qualified(&schema, "Tenants")
            ),
            format!(
                "INSERT INTO {} (id, name, slug) VALUES (5, 'Legacy Co', 'legacy')",
                qualified(&schema, "Tenants")
            ),
            format!(
                "CREATE TABLE {} (id bigint GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY, \
                 username varchar(100) NOT NULL UNIQUE, tenant_id bigint NOT NULL DEFAULT 1, \
                 nickname varchar(50), name varchar(200))",
                qualified(&schema, "users")
            ),
            format!(
                "INSERT INTO {} (id, username, tenant_id, nickname, name) \
                 VALUES (40, 'LEGACY.USER', 5, 'lu', 'Legacy User')",
                qualified(&schema, "users")
            ),
        ] {
            sqlx::query(&sql).execute(&mut *conn).await?;
        }

        reconcile::reconcile_database(&mut conn, &schema, &ReconcileTarget::Control).await?;

        assert!(!catalog::table_exists(&mut conn, &schema, "tenant").await?);
        assert!(!catalog::table_exists(&mut conn, &schema, "Tenants").await?);
        let rows = control_rows(&mut conn, &schema).await?;
        assert_eq!(
            rows,
            vec![
                (1, "EXECUTIVE".to_string(), "executive".to_string()),
                (5, "Legacy Co".to_string(), "legacy".to_string()),
            ]
        );

        let columns = catalog::column_names(&mut conn, &schema, "users").await?;
        assert_eq!(columns.get(1).map(String::as_str), Some("name"));
        assert!(columns.contains(&"nickname".to_string()));

        let users = qualified(&schema, "users");
        let (name, nickname, tenant_id): (Option<String>, Option<String>, i64) = sqlx::query_as(&format!(
            "SELECT name::text, nickname::text, tenant_id::bigint FROM {users} WHERE id = 40"
        ))
        .fetch_one(&mut *conn)
        .await?;
        assert_eq!(name.as_deref(), Some("Legacy User"));
        assert_eq!(nickname.as_deref(), Some("lu"));
        assert_eq!(tenant_id, 5);

        let next: i64 = sqlx::query_scalar(&format!(
            "INSERT INTO {users} (username) VALUES ('AFTER.REBUILD') RETURNING id::bigint"
        ))
        .fetch_one(&mut *conn)
        .await?;
        assert!(next > 40);

        // a second pass finds nothing left to repair
        reconcile::reconcile_database(&mut conn, &schema, &ReconcileTarget::Control).await?;
        assert_eq!(catalog::column_names(&mut conn, &schema, "users").await?, columns);
        Ok(())
    })
    .await
}

async fn slug_rename_moves_admin_identity() -> Result<()> {
    let first = common::unique_slug("gamma");
    let second = common::unique_slug("delta");
    let third = common::unique_slug("omega");
    let gamma = create_tenant(&format!("Gamma {}", first), &first).await?;

    let outcome = async {
        let schema = schema_name();
        let control = DatabaseManager::control_pool().await?;
        let mut conn = control.acquire().await?;

        let renamed = tenant_service::update(
            gamma.id,
            TenantChanges {
                slug: Some(second.clone()),
                ..Default::default()
            },
        )
        .await?;
        assert_eq!(renamed.slug, second);
        assert!(DatabaseManager::database_exists(&tenant_db_name(gamma.id, &second)).await?);
        assert!(
            identity::find_by_username(&mut conn, &schema, &identity::tenant_admin_username(&first))
                .await?
                .is_none()
        );
        let admin = identity::find_by_username(&mut conn, &schema, &identity::tenant_admin_username(&second))
            .await?
            .context("renamed admin")?;
        assert_eq!(admin.tenant_id, gamma.id);

        // an identity already holding the next admin name is taken over
        let holder = identity::create_user(
            &mut conn,
            &schema,
            &NewUser {
                name: "Holder",
                username: &identity::tenant_admin_username(&third),
                tenant_id: 1,
                role: Role::User,
                password: "placeholder",
            },
        )
        .await?;
        let moved = tenant_service::update(
            gamma.id,
            TenantChanges {
                slug: Some(third.clone()),
                ..Default::default()
            },
        )
        .await?;
        assert_eq!(moved.slug, third);
        let admin = identity::find_by_username(&mut conn, &schema, &identity::tenant_admin_username(&third))
            .await?
            .context("bound admin")?;
        assert_eq!(admin.id, holder.id);
        assert_eq!(admin.tenant_id, gamma.id);
        assert_eq!(admin.role(), Role::Admin);

        let registry = TenantRegistry::connect().await?;
        assert_eq!(registry.get(gamma.id).await?.context("gamma")?.slug, third);
        anyhow::Ok(())
    }
    .await;

    tenant_service::delete(gamma.id, true).await?;
    for slug in [&first, &second] {
        DatabaseManager::drop_database(&tenant_db_name(gamma.id, slug)).await?;
    }
    outcome
}

async fn failed_provisioning_removes_the_registry_row() -> Result<()> {
    let slug = common::unique_slug("broken");
    let schema = schema_name();
    let control = DatabaseManager::control_pool().await?;

    // burn one id so the next registration's database name is known up front
    let reserved: i64 = sqlx::query_scalar("SELECT nextval(pg_get_serial_sequence($1, 'id'))")
        .bind(qualified(&schema, "tenants"))
        .fetch_one(&control)
        .await?;
    let database = tenant_db_name(reserved + 1, &slug);

    // a view squatting on a baseline table name cannot be indexed or altered
    DatabaseManager::create_database_if_absent(&database).await?;
    let squatted = DatabaseManager::tenant_pool(&database).await?;
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_identifier(&schema)))
        .execute(&squatted)
        .await?;
    sqlx::query(&format!(
        "CREATE VIEW {} AS SELECT 1::bigint AS id",
        qualified(&schema, "payables")
    ))
    .execute(&squatted)
    .await?;

    let result = create_tenant("Broken Co", &slug).await;
    let dropped = DatabaseManager::drop_database(&database).await;

    let err = result.err().context("provisioning should fail")?;
    let err = err.downcast::<TenantError>()?;
    assert!(matches!(err, TenantError::Provisioning(_)), "{err:?}");

    let registry = TenantRegistry::connect().await?;
    assert!(registry.find_by_slug(&slug).await?.is_none());
    dropped?;
    Ok(())
}

#[tokio::test]
async fn tenant_lifecycle_scenarios() -> Result<()> {
    if !common::database_configured() {
        return Ok(());
    }

    let mut backoff = Backoff::new(Duration::from_secs(30));
    bootstrap::prepare_control(&mut backoff).await?;

    let beta_slug = common::unique_slug("beta");
    let alpha_slug = common::unique_slug("alpha");
    // Beta registers first, so it has the lower id
    let beta = create_tenant(&format!("Beta {}", beta_slug), &beta_slug).await?;
    let alpha = create_tenant(&format!("Alpha {}", alpha_slug), &alpha_slug).await?;

    let outcome = async {
        provisioned_tenant_admin_can_log_in(&alpha).await?;
        tenants_are_isolated(&alpha, &beta).await?;
        fan_out_orders_by_tenant_name(&alpha, &beta).await?;
        reconciliation_is_idempotent(&beta).await?;
        control_backfill_matches_company_name(&beta).await?;
        tenant_backfill_stamps_unbound_rows(&beta).await?;
        payable_amounts_are_derived(&alpha).await?;
        control_tenant_is_not_deletable().await?;
        duplicate_slug_conflicts(&alpha).await?;
        control_tenant_row_is_repaired().await?;
        legacy_control_layout_is_repaired().await?;
        slug_rename_moves_admin_identity().await?;
        failed_provisioning_removes_the_registry_row().await?;
        anyhow::Ok(())
    }
    .await;

    for tenant in [&alpha, &beta] {
        tenant_service::delete(tenant.id, true).await?;
    }
    assert!(matches!(
        tenant_service::get(alpha.id).await,
        Err(TenantError::NotFound(_))
    ));

    outcome
}
