use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub security: SecurityConfig,
    pub storage: StorageConfig,
    pub startup: StartupConfig,
    pub fanout: FanoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Schema namespace holding every table inside each physical database
    pub schema_name: String,
    /// Database used for CREATE/DROP DATABASE; defaults to the control database
    pub admin_database: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
    pub enable_request_logging: bool,
    pub max_request_size_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
    pub auth_secret: String,
    pub token_expiry_hours: u64,
    pub tenant_admin_default_password: String,
    pub bootstrap_admin_username: String,
    pub bootstrap_admin_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub media_base_url: String,
    pub timeout_secs: u64,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupConfig {
    pub db_wait_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutConfig {
    pub concurrency: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Database overrides
        if let Ok(v) = env::var("DB_SCHEMA") {
            if !v.trim().is_empty() {
                self.database.schema_name = v.trim().to_string();
            }
        }
        if let Ok(v) = env::var("POSTGRES_ADMIN_DB") {
            let v = v.trim();
            self.database.admin_database = if v.is_empty() { None } else { Some(v.to_string()) };
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }

        // API overrides
        if let Some(v) = env::var("API_PORT").ok().or_else(|| env::var("PORT").ok()) {
            self.api.port = v.parse().unwrap_or(self.api.port);
        }
        if let Ok(v) = env::var("API_ENABLE_REQUEST_LOGGING") {
            self.api.enable_request_logging = v.parse().unwrap_or(self.api.enable_request_logging);
        }
        if let Ok(v) = env::var("API_MAX_REQUEST_SIZE_BYTES") {
            self.api.max_request_size_bytes = v.parse().unwrap_or(self.api.max_request_size_bytes);
        }

        // Security overrides
        if let Ok(v) = env::var("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = v.parse().unwrap_or(self.security.enable_cors);
        }
        if let Ok(v) = env::var("CORS_ORIGINS") {
            let extra: Vec<String> = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if extra.iter().any(|o| o == "*") {
                self.security.cors_origins = vec!["*".to_string()];
            } else {
                for origin in extra {
                    if !self.security.cors_origins.contains(&origin) {
                        self.security.cors_origins.push(origin);
                    }
                }
            }
        }
        if let Ok(v) = env::var("AUTH_SECRET") {
            self.security.auth_secret = v;
        }
        if let Ok(v) = env::var("SECURITY_TOKEN_EXPIRY_HOURS") {
            self.security.token_expiry_hours = v.parse().unwrap_or(self.security.token_expiry_hours);
        }
        if let Ok(v) = env::var("TENANT_ADMIN_DEFAULT_PASSWORD") {
            self.security.tenant_admin_default_password = v;
        }
        if let Ok(v) = env::var("BOOTSTRAP_ADMIN_USERNAME") {
            if !v.trim().is_empty() {
                self.security.bootstrap_admin_username = v.trim().to_uppercase();
            }
        }
        if let Ok(v) = env::var("BOOTSTRAP_ADMIN_PASSWORD") {
            self.security.bootstrap_admin_password = v;
        }

        // Storage overrides
        if let Ok(v) = env::var("MEDIA_BASE_URL") {
            self.storage.media_base_url = v.trim_end_matches('/').to_string();
        }
        if let Ok(v) = env::var("MEDIA_TIMEOUT_SECS") {
            self.storage.timeout_secs = v.parse().unwrap_or(self.storage.timeout_secs);
        }
        if let Ok(v) = env::var("MEDIA_MAX_UPLOAD_BYTES") {
            self.storage.max_upload_bytes = v.parse().unwrap_or(self.storage.max_upload_bytes);
        }

        // Startup / fan-out overrides
        if let Ok(v) = env::var("STARTUP_DB_WAIT_SECONDS") {
            self.startup.db_wait_seconds = v.parse().unwrap_or(self.startup.db_wait_seconds);
        }
        if let Ok(v) = env::var("FANOUT_CONCURRENCY") {
            self.fanout.concurrency = v.parse::<usize>().unwrap_or(self.fanout.concurrency).max(1);
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                schema_name: "EXECUTIVE".to_string(),
                admin_database: None,
                max_connections: 10,
                connection_timeout: 30,
            },
            api: ApiConfig {
                port: 8000,
                enable_request_logging: true,
                max_request_size_bytes: 110 * 1024 * 1024, // uploads up to the storage cap
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec![
                    "http://localhost:5173".to_string(),
                    "http://127.0.0.1:5173".to_string(),
                    "http://localhost:5174".to_string(),
                    "http://127.0.0.1:5174".to_string(),
                ],
                auth_secret: "dev-secret-change-me".to_string(),
                token_expiry_hours: 12,
                tenant_admin_default_password: "admin".to_string(),
                bootstrap_admin_username: "ADMINISTRATOR".to_string(),
                bootstrap_admin_password: "admin".to_string(),
            },
            storage: StorageConfig {
                media_base_url: "http://localhost:3000".to_string(),
                timeout_secs: 60,
                max_upload_bytes: 100 * 1024 * 1024,
            },
            startup: StartupConfig { db_wait_seconds: 60 },
            fanout: FanoutConfig { concurrency: 4 },
        }
    }

    fn staging() -> Self {
        let mut config = Self::development();
        config.environment = Environment::Staging;
        config.database.max_connections = 20;
        config.database.connection_timeout = 10;
        config.security.cors_origins = vec!["https://staging.example.com".to_string()];
        config
    }

    fn production() -> Self {
        let mut config = Self::development();
        config.environment = Environment::Production;
        config.database.max_connections = 50;
        config.database.connection_timeout = 5;
        config.api.enable_request_logging = false;
        config.security.cors_origins = vec!["https://app.example.com".to_string()];
        config.fanout.concurrency = 8;
        config
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[macro_export]
macro_rules! is_development {
    () => {
        matches!($crate::config::CONFIG.environment, $crate::config::Environment::Development)
    };
}
