mod common;

use anyhow::Result;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use serde_json::json;

use executive_api::auth::TokenCodec;
use executive_api::database::models::Role;

fn get(uri: &str, authorization: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(value) = authorization {
        builder = builder.header(header::AUTHORIZATION, value);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn records_require_a_token() -> Result<()> {
    let (status, body) = common::send(common::app(), get("/api/executives", None)).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
    Ok(())
}

#[tokio::test]
async fn token_signed_with_another_secret_is_rejected() -> Result<()> {
    let foreign = TokenCodec::new("some-other-secret", 12)
        .issue("JOHN", Role::Admin, 4, "acme")?;
    let auth = format!("Bearer {}", foreign);

    let (status, _) = common::send(common::app(), get("/api/executives", Some(&auth))).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn expired_token_is_rejected() -> Result<()> {
    let mut claims = common::claims(Role::Admin, 4, "acme");
    claims.exp = Some(chrono::Utc::now().timestamp() - 60);

    let (status, body) = common::send(
        common::app(),
        get("/api/executives", Some(&common::bearer(&claims))),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Token expired");
    Ok(())
}

#[tokio::test]
async fn tenant_admin_cannot_reach_tenant_management() -> Result<()> {
    let admin = common::claims(Role::Admin, 4, "acme");
    let (status, _) = common::send(
        common::app(),
        get("/api/tenants", Some(&common::bearer(&admin))),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn superadmin_role_outside_control_tenant_is_not_elevated() -> Result<()> {
    let stray = common::claims(Role::Superadmin, 4, "acme");
    let (status, _) = common::send(
        common::app(),
        get("/api/tenants/4", Some(&common::bearer(&stray))),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn unknown_collection_is_not_found() -> Result<()> {
    let user = common::claims(Role::User, 4, "acme");
    let (status, body) = common::send(
        common::app(),
        get("/api/widgets", Some(&common::bearer(&user))),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
    Ok(())
}

#[tokio::test]
async fn unknown_record_fields_are_rejected_before_routing() -> Result<()> {
    let user = common::claims(Role::User, 4, "acme");
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/assets")
        .header(header::AUTHORIZATION, common::bearer(&user))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"asset": "Truck", "wheels": 6}).to_string()))?;

    let (status, body) = common::send(common::app(), request).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(body["field_errors"]["wheels"], "Unknown field");
    Ok(())
}

#[tokio::test]
async fn login_requires_username_and_password() -> Result<()> {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"username": "  ", "password": ""}).to_string()))?;

    let (status, body) = common::send(common::app(), request).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    Ok(())
}
