//! Configuration management for Scimgate

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::env;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server host
    pub host: String,
    /// HTTP server port
    pub port: u16,
    /// `production` or `development`; selects the default log format
    pub environment: String,
    /// Per-request deadline in seconds
    pub request_timeout_secs: u64,
    /// Maximum accepted request body size in bytes
    pub body_limit_bytes: usize,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Bearer authentication configuration
    pub auth: AuthConfig,
    /// CORS configuration
    pub cors: CorsConfig,
    /// Structured logger defaults
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Bearer authentication configuration.
///
/// `shared_secret` is the static token path; `jwt_secret` enables the
/// signed-token path. At least one must be set in production.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub shared_secret: Option<String>,
    pub jwt_secret: Option<String>,
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Allowed origins; `["*"]` means any
    pub allowed_origins: Vec<String>,
}

/// Structured logger defaults, overridable at runtime via the admin API.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    /// `json` or `pretty`
    pub format: String,
    /// Per-category minimum levels, e.g. `{"scim.patch": "DEBUG"}`
    pub category_levels: HashMap<String, String>,
    pub include_payloads: bool,
    pub include_stacks: bool,
    pub max_payload_size_bytes: usize,
    /// Ring-buffer capacity
    pub buffer_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let environment =
            env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let is_production = environment == "production";

        let auth = AuthConfig {
            shared_secret: env::var("SCIM_SHARED_SECRET").ok().filter(|s| !s.is_empty()),
            jwt_secret: env::var("JWT_SECRET").ok().filter(|s| !s.is_empty()),
            oauth_client_id: env::var("OAUTH_CLIENT_ID").ok(),
            oauth_client_secret: env::var("OAUTH_CLIENT_SECRET").ok(),
        };
        if is_production && auth.shared_secret.is_none() && auth.jwt_secret.is_none() {
            anyhow::bail!("SCIM_SHARED_SECRET (or JWT_SECRET) is required in production");
        }

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("Invalid PORT")?,
            environment,
            request_timeout_secs: env::var("REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
            body_limit_bytes: env::var("BODY_LIMIT_BYTES")
                .unwrap_or_else(|_| "1048576".to_string())
                .parse()
                .unwrap_or(1_048_576),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite:scimgate.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            auth,
            cors: CorsConfig {
                allowed_origins: env::var("CORS_ORIGINS")
                    .map(|s| {
                        s.split(',')
                            .map(|o| o.trim().to_string())
                            .filter(|o| !o.is_empty())
                            .collect()
                    })
                    .unwrap_or_else(|_| vec!["*".to_string()]),
            },
            log: LogConfig {
                level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
                format: env::var("LOG_FORMAT").unwrap_or_else(|_| {
                    if is_production { "json" } else { "pretty" }.to_string()
                }),
                category_levels: env::var("LOG_CATEGORY_LEVELS")
                    .ok()
                    .and_then(|s| serde_json::from_str(&s).ok())
                    .unwrap_or_default(),
                include_payloads: env::var("LOG_INCLUDE_PAYLOADS")
                    .map(|s| s.to_lowercase() == "true")
                    .unwrap_or(true),
                include_stacks: env::var("LOG_INCLUDE_STACKS")
                    .map(|s| s.to_lowercase() == "true")
                    .unwrap_or(!is_production),
                max_payload_size_bytes: env::var("LOG_MAX_PAYLOAD_SIZE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(8 * 1024),
                buffer_capacity: env::var("LOG_BUFFER_CAPACITY")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(500),
            },
        })
    }

    /// Listen address for the HTTP server
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
