#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use executive_api::app::{build_router, AppState};
use executive_api::auth::{Claims, TokenCodec};
use executive_api::database::models::Role;
use executive_api::services::media::{DisabledMediaStore, MediaStore};

pub const TEST_SECRET: &str = "integration-test-secret";

pub fn codec() -> TokenCodec {
    TokenCodec::new(TEST_SECRET, 12)
}

pub fn state_with_media(media: Arc<dyn MediaStore>) -> AppState {
    AppState::new(codec(), media)
}

/// Router with a fixed token secret and no blob store
pub fn app() -> Router {
    build_router(state_with_media(Arc::new(DisabledMediaStore)))
}

pub fn claims(role: Role, tenant_id: i64, slug: &str) -> Claims {
    Claims {
        sub: format!("{}.tester", slug.to_uppercase()),
        role,
        tenant_id,
        tenant_slug: slug.to_string(),
        exp: Some(chrono::Utc::now().timestamp() + 3600),
    }
}

pub fn bearer(claims: &Claims) -> String {
    let token = codec().mint(claims).expect("mint test token");
    format!("Bearer {}", token)
}

/// Send one request through the router and decode the JSON body (Null when empty)
pub async fn send(app: Router, request: Request<Body>) -> Result<(StatusCode, Value)> {
    let response = app.oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, body))
}

/// Postgres-backed tests run only when DATABASE_URL points at a server
pub fn database_configured() -> bool {
    match std::env::var("DATABASE_URL") {
        Ok(url) if !url.trim().is_empty() => true,
        _ => {
            eprintln!("DATABASE_URL not set; skipping database test");
            false
        }
    }
}

/// Slug unique to this test run
pub fn unique_slug(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &suffix[..8])
}

/// Throwaway schema name for reconciling a hand-built layout
pub fn scratch_schema(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &suffix[..8])
}
