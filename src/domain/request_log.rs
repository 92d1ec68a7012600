//! Request audit-log domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Persisted per-request audit record. Read-only after write.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RequestLog {
    pub id: i64,
    pub method: String,
    pub url: String,
    pub status: i64,
    #[serde(rename = "durationMs")]
    pub duration_ms: i64,
    #[serde(rename = "requestHeaders")]
    pub request_headers: String,
    #[serde(rename = "requestBody")]
    pub request_body: Option<String>,
    #[serde(rename = "responseHeaders")]
    pub response_headers: String,
    #[serde(rename = "responseBody")]
    pub response_body: Option<String>,
    #[serde(rename = "errorMessage")]
    pub error_message: Option<String>,
    #[serde(rename = "errorStack")]
    pub error_stack: Option<String>,
    /// Derived human-friendly label (userName, displayName, …)
    pub identifier: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// Record handed to the buffer by the request pipeline.
#[derive(Debug, Clone)]
pub struct NewRequestLog {
    pub method: String,
    pub url: String,
    pub status: i64,
    pub duration_ms: i64,
    pub request_headers: String,
    pub request_body: Option<String>,
    pub response_headers: String,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub error_stack: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Query filters for `/admin/activity` and `/admin/logs`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestLogQuery {
    pub method: Option<String>,
    pub status: Option<i64>,
    #[serde(rename = "urlContains")]
    pub url_contains: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    #[serde(rename = "hasError")]
    pub has_error: Option<bool>,
    /// Substring match against URL, bodies, headers and errorMessage
    pub search: Option<String>,
    /// Admin and root endpoints are hidden unless set
    #[serde(rename = "includeAdmin", default)]
    pub include_admin: bool,
    /// Suppress Entra health-check probes (see storage gateway)
    #[serde(rename = "hideKeepalive", default)]
    pub hide_keepalive: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
