//! Common test utilities
//!
//! Tests run against an in-memory SQLite database and drive the full
//! router (middleware included) through `tower::ServiceExt::oneshot`,
//! so every request exercises auth, correlation, tenant resolution and
//! the central error mapping.

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use scimgate::config::{AuthConfig, Config, CorsConfig, DatabaseConfig, LogConfig};
use scimgate::logging::Logger;
use scimgate::migration;
use scimgate::server::{build_router, AppState};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::collections::HashMap;
use std::str::FromStr;
use tower::ServiceExt;

pub const TEST_SECRET: &str = "test-shared-secret";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub logger: Logger,
}

fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        environment: "development".to_string(),
        request_timeout_secs: 60,
        body_limit_bytes: 1_048_576,
        database: DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        },
        auth: AuthConfig {
            shared_secret: Some(TEST_SECRET.to_string()),
            jwt_secret: None,
            oauth_client_id: None,
            oauth_client_secret: None,
        },
        cors: CorsConfig {
            allowed_origins: vec!["*".to_string()],
        },
        log: LogConfig {
            level: "DEBUG".to_string(),
            format: "pretty".to_string(),
            category_levels: HashMap::new(),
            include_payloads: true,
            include_stacks: true,
            max_payload_size_bytes: 8 * 1024,
            buffer_capacity: 500,
        },
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .expect("in-memory sqlite pool");
        migration::run_migrations(&pool).await.expect("migrations");

        let logger = Logger::for_tests();
        let (state, _buffer_handle) = AppState::build(test_config(), pool, logger.clone());
        state
            .endpoint_service
            .ensure_default()
            .await
            .expect("default endpoint");

        let router = build_router(state.clone());
        Self {
            router,
            state,
            logger,
        }
    }

    /// Send a request with the test bearer token.
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
    ) -> (StatusCode, HeaderMap, Value) {
        self.request_with_headers(method, path, body, &[]).await
    }

    pub async fn request_with_headers(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
        extra_headers: &[(&str, &str)],
    ) -> (StatusCode, HeaderMap, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("authorization", format!("Bearer {}", TEST_SECRET));
        for (name, value) in extra_headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(value) => builder
                .header("content-type", "application/scim+json")
                .body(Body::from(value.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    /// Send a request with no Authorization header.
    pub async fn request_unauthenticated(
        &self,
        method: &str,
        path: &str,
    ) -> (StatusCode, HeaderMap, Value) {
        let request = Request::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("response body")
            .to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
        };
        (status, headers, json)
    }

    pub async fn get(&self, path: &str) -> (StatusCode, HeaderMap, Value) {
        self.request("GET", path, None).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> (StatusCode, HeaderMap, Value) {
        self.request("POST", path, Some(body)).await
    }

    pub async fn put(&self, path: &str, body: &Value) -> (StatusCode, HeaderMap, Value) {
        self.request("PUT", path, Some(body)).await
    }

    pub async fn patch(&self, path: &str, body: &Value) -> (StatusCode, HeaderMap, Value) {
        self.request("PATCH", path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> (StatusCode, HeaderMap, Value) {
        self.request("DELETE", path, None).await
    }

    /// Create a tenant through the admin API; returns its id.
    pub async fn create_endpoint(&self, name: &str, config: Value) -> String {
        let (status, _, body) = self
            .post(
                "/scim/admin/endpoints",
                &serde_json::json!({"name": name, "config": config}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "endpoint create: {:?}", body);
        body["id"].as_str().expect("endpoint id").to_string()
    }
}

/// Minimal percent-encoding for filter expressions in query strings.
pub fn encode_query(raw: &str) -> String {
    raw.replace(' ', "%20")
        .replace('"', "%22")
        .replace('+', "%2B")
        .replace('[', "%5B")
        .replace(']', "%5D")
}

/// A minimal SCIM user payload.
pub fn user_payload(user_name: &str) -> Value {
    serde_json::json!({
        "schemas": ["urn:ietf:params:scim:schemas:core:2.0:User"],
        "userName": user_name,
        "active": true
    })
}

/// A minimal SCIM group payload.
pub fn group_payload(display_name: &str, members: Value) -> Value {
    serde_json::json!({
        "schemas": ["urn:ietf:params:scim:schemas:core:2.0:Group"],
        "displayName": display_name,
        "members": members
    })
}

/// A PatchOp envelope around the given operations.
pub fn patch_body(operations: Value) -> Value {
    serde_json::json!({
        "schemas": ["urn:ietf:params:scim:api:messages:2.0:PatchOp"],
        "Operations": operations
    })
}
