//! Request-scoped correlation context
//!
//! Correlation is carried as an explicit value on every handler call
//! rather than through a task-local, so it survives every await point by
//! construction. The pipeline middleware builds one per request and
//! stores it in the request extensions.

use std::time::Instant;

/// Authenticated caller attached by the auth middleware.
#[derive(Debug, Clone)]
pub struct AuthPrincipal {
    /// `shared-secret` or `jwt`
    pub auth_type: String,
    pub client_id: Option<String>,
}

/// Correlation scope for one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub endpoint_id: Option<String>,
    pub principal: Option<AuthPrincipal>,
    pub started_at: Instant,
}

impl RequestContext {
    pub fn new(request_id: String, method: String, path: String) -> Self {
        Self {
            request_id,
            method,
            path,
            endpoint_id: None,
            principal: None,
            started_at: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}
