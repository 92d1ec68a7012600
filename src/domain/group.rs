//! Group domain model

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct GroupRecord {
    pub id: String,
    pub scim_id: String,
    pub endpoint_id: String,
    pub external_id: Option<String>,
    pub display_name: String,
    /// Case-folded for the indexed uniqueness probe
    pub display_name_lower: String,
    pub raw_payload: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewGroup {
    pub scim_id: String,
    pub endpoint_id: String,
    pub external_id: Option<String>,
    pub display_name: String,
    pub raw_payload: String,
}

/// Stored membership row. `member_id` is the scim_id of a User in the
/// same endpoint when the value resolved; unresolved memberships keep
/// only the opaque `value`.
#[derive(Debug, Clone, FromRow)]
pub struct GroupMemberRecord {
    pub group_id: String,
    pub member_id: Option<String>,
    pub value: String,
    pub display: Option<String>,
    pub member_type: Option<String>,
}

/// Member entry as sent by the client.
#[derive(Debug, Clone)]
pub struct MemberInput {
    pub value: String,
    pub display: Option<String>,
    pub member_type: Option<String>,
}

/// Membership row ready for insertion: `member_id` has been resolved
/// against the endpoint's users (outside the write transaction).
#[derive(Debug, Clone)]
pub struct MemberSpec {
    pub member_id: Option<String>,
    pub value: String,
    pub display: Option<String>,
    pub member_type: Option<String>,
}

impl MemberInput {
    /// Parse a single `members` element; entries without a string `value`
    /// are rejected by the caller.
    pub fn from_value(v: &Value) -> Option<Self> {
        let value = v.get("value")?.as_str()?.to_string();
        Some(Self {
            value,
            display: v.get("display").and_then(Value::as_str).map(String::from),
            member_type: v.get("type").and_then(Value::as_str).map(String::from),
        })
    }
}
