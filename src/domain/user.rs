//! User domain model
//!
//! First-class attributes live in their own columns; everything else the
//! client sent stays in `raw_payload` (JSON text) with the first-class
//! keys stripped so the two can never drift.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct UserRecord {
    /// Internal storage id
    pub id: String,
    /// Externally visible id, server-assigned
    pub scim_id: String,
    pub endpoint_id: String,
    pub external_id: Option<String>,
    pub user_name: String,
    /// Case-folded for the RFC 7643 §2.1 uniqueness probe
    pub user_name_lower: String,
    pub active: bool,
    /// Normalized JSON text of non-first-class attributes
    pub raw_payload: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub scim_id: String,
    pub endpoint_id: String,
    pub external_id: Option<String>,
    pub user_name: String,
    pub active: bool,
    pub raw_payload: String,
}
