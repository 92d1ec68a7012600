//! Storage gateway: repository traits and their SQLite implementations
//!
//! All uniqueness constraints are composite with `endpoint_id`; write
//! paths hold the single writer only for the duration of the statement
//! or transaction that needs it.

pub mod endpoint;
pub mod group;
pub mod request_log;
pub mod user;

pub use endpoint::{EndpointRepository, EndpointRepositoryImpl};
pub use group::{GroupRepository, GroupRepositoryImpl};
pub use request_log::{RequestLogRepository, RequestLogRepositoryImpl};
pub use user::{UserRepository, UserRepositoryImpl};

use crate::error::AppError;

/// Translate a SQLite unique-index violation into the SCIM uniqueness
/// conflict; everything else passes through as a storage error.
pub(crate) fn map_unique_violation(e: sqlx::Error, what: &str) -> AppError {
    if let sqlx::Error::Database(db) = &e {
        if db.message().contains("UNIQUE constraint failed") {
            return AppError::Conflict(format!("{} already exists", what));
        }
    }
    AppError::Database(e)
}
