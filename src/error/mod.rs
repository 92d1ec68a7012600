//! Unified error handling for Scimgate
//!
//! Every domain error maps to exactly one SCIM Error response
//! (RFC 7644 §3.12) with the matching HTTP status and `scimType`.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid syntax: {0}")]
    InvalidSyntax(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("No target: {0}")]
    NoTarget(String),

    #[error("Mutability violation: {0}")]
    Mutability(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Transaction timeout: {0}")]
    TransactionTimeout(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// HTTP status for this error kind.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::InvalidSyntax(_)
            | AppError::InvalidFilter(_)
            | AppError::InvalidPath(_)
            | AppError::InvalidValue(_)
            | AppError::NoTarget(_)
            | AppError::Mutability(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::TransactionTimeout(_) | AppError::Database(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// SCIM `scimType` keyword, where RFC 7644 defines one for the kind.
    pub fn scim_type(&self) -> Option<&'static str> {
        match self {
            AppError::NotFound(_) => Some("noTarget"),
            AppError::Conflict(_) => Some("uniqueness"),
            AppError::InvalidSyntax(_) => Some("invalidSyntax"),
            AppError::InvalidFilter(_) => Some("invalidFilter"),
            AppError::InvalidPath(_) => Some("invalidPath"),
            AppError::InvalidValue(_) => Some("invalidValue"),
            AppError::NoTarget(_) => Some("noTarget"),
            AppError::Mutability(_) => Some("mutability"),
            _ => None,
        }
    }

    /// Human detail for the response body. Storage and internal errors are
    /// not echoed verbatim to clients.
    pub fn detail(&self) -> String {
        match self {
            AppError::Database(e) => {
                if is_lock_contention(e) {
                    "The storage writer timed out; the transaction was aborted".to_string()
                } else {
                    "A database error occurred".to_string()
                }
            }
            AppError::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

/// SCIM Error response body (RFC 7644 §3.12)
#[derive(Serialize)]
struct ScimErrorBody {
    schemas: Vec<String>,
    status: String,
    #[serde(rename = "scimType", skip_serializing_if = "Option::is_none")]
    scim_type: Option<String>,
    detail: String,
}

pub const ERROR_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:Error";

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Database(e) => tracing::error!("Database error: {:?}", e),
            AppError::Internal(e) => tracing::error!("Internal error: {:?}", e),
            AppError::TransactionTimeout(msg) => tracing::error!("Transaction timeout: {}", msg),
            _ => {}
        }

        let status = self.status();
        let body = ScimErrorBody {
            schemas: vec![ERROR_SCHEMA.to_string()],
            status: status.as_u16().to_string(),
            scim_type: self.scim_type().map(|s| s.to_string()),
            detail: self.detail(),
        };

        let mut response = (status, Json(body)).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/scim+json;charset=utf-8"),
        );
        response
    }
}

/// SQLite reports writer contention as `database is locked` / `busy`.
fn is_lock_contention(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => {
            let msg = db.message().to_lowercase();
            msg.contains("locked") || msg.contains("busy")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::NotFound("User abc not found".to_string());
        assert_eq!(err.to_string(), "Not found: User abc not found");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::Conflict("dup".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::InvalidFilter("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Unauthorized("no".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::TransactionTimeout("slow".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_scim_type_mapping() {
        assert_eq!(
            AppError::Conflict("dup".into()).scim_type(),
            Some("uniqueness")
        );
        assert_eq!(AppError::NotFound("x".into()).scim_type(), Some("noTarget"));
        assert_eq!(
            AppError::InvalidSyntax("x".into()).scim_type(),
            Some("invalidSyntax")
        );
        assert_eq!(AppError::Unauthorized("x".into()).scim_type(), None);
    }

    #[test]
    fn test_internal_detail_is_masked() {
        let err: AppError = anyhow::anyhow!("secret stack details").into();
        assert_eq!(err.detail(), "An internal error occurred");
    }
}
