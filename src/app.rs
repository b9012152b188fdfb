use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::auth::TokenCodec;
use crate::config::{config, AppConfig, Environment};
use crate::handlers::{elevated, protected, public};
use crate::middleware::{auth_middleware, require_superadmin};
use crate::services::media::{DisabledMediaStore, HttpMediaStore, MediaError, MediaStore};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenCodec>,
    pub media: Arc<dyn MediaStore>,
}

impl AppState {
    pub fn new(tokens: TokenCodec, media: Arc<dyn MediaStore>) -> Self {
        Self {
            tokens: Arc::new(tokens),
            media,
        }
    }

    /// Token codec and blob store from the global configuration. Without a
    /// `MEDIA_BASE_URL` document endpoints answer `UPSTREAM_FAILURE`.
    pub fn from_config() -> Result<Self, MediaError> {
        let media: Arc<dyn MediaStore> = match HttpMediaStore::from_config() {
            Ok(store) => Arc::new(store),
            Err(MediaError::NotConfigured) => {
                warn!("MEDIA_BASE_URL is not set; document storage is disabled");
                Arc::new(DisabledMediaStore)
            }
            Err(e) => return Err(e),
        };
        Ok(Self::new(TokenCodec::from_config(), media))
    }
}

/// The full HTTP surface: public, protected and elevated tiers
pub fn build_router(state: AppState) -> Router {
    let config = config();

    let public_routes = Router::new()
        .route("/health", get(public::health))
        .route("/api/login", post(public::login));

    let protected_routes = Router::new()
        .route(
            "/api/payables/:id/document",
            get(protected::documents::download).post(protected::documents::upload),
        )
        .route(
            "/api/:kind",
            get(protected::records::list).post(protected::records::create),
        )
        .route(
            "/api/:kind/:id",
            get(protected::records::get)
                .put(protected::records::update)
                .delete(protected::records::delete),
        )
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    // route_layer order: the last one added runs first
    let elevated_routes = Router::new()
        .route(
            "/api/tenants",
            get(elevated::tenants::list).post(elevated::tenants::create),
        )
        .route(
            "/api/tenants/:id",
            get(elevated::tenants::show)
                .put(elevated::tenants::update)
                .delete(elevated::tenants::delete),
        )
        .route_layer(from_fn(require_superadmin))
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    let mut app = Router::new()
        .merge(public_routes)
        .merge(elevated_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(config.api.max_request_size_bytes))
        .layer(cors_layer(config))
        .with_state(state);

    if config.api.enable_request_logging {
        app = app.layer(TraceLayer::new_for_http());
    }
    app
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    if !config.security.enable_cors {
        return CorsLayer::new();
    }
    if matches!(config.environment, Environment::Development)
        || config.security.cors_origins.iter().any(|o| o == "*")
    {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .security
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
}
