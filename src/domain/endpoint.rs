//! Endpoint (tenant) domain model
//!
//! An endpoint is an isolated namespace of Users and Groups with its own
//! behavior flags. Resource-uniqueness constraints are always scoped by
//! `endpoint.id`; `name` is unique process-wide.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;

/// Tenant record. `config` is an open JSON map of behavior flags stored
/// as TEXT; unknown keys are preserved for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Endpoint {
    pub id: String,
    pub name: String,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    pub description: Option<String>,
    #[serde(skip)]
    pub config: String,
    pub active: bool,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl Endpoint {
    pub fn config(&self) -> EndpointConfig {
        EndpointConfig::from_json_text(&self.config)
    }
}

/// Parsed endpoint behavior flags.
///
/// Flag values may be boolean true/false or the strings `"True"`/`"False"`
/// (case-insensitive), matching what Entra operators paste into configs.
#[derive(Debug, Clone, Default)]
pub struct EndpointConfig(Map<String, Value>);

impl EndpointConfig {
    pub fn from_json_text(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Self(map),
            _ => Self::default(),
        }
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        let entry = self
            .0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v);
        match entry {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
                "true" => true,
                "false" => false,
                _ => default,
            },
            _ => default,
        }
    }

    /// Enables dot-notation path resolution in PATCH.
    pub fn verbose_patch_supported(&self) -> bool {
        self.flag("VerbosePatchSupported", false)
    }

    /// Allows N>1 members in a single `add members` op.
    pub fn multi_op_add_members(&self) -> bool {
        self.flag("MultiOpPatchRequestAddMultipleMembersToGroup", false)
    }

    /// Allows N>1 members in a single `remove members` op.
    pub fn multi_op_remove_members(&self) -> bool {
        self.flag("MultiOpPatchRequestRemoveMultipleMembersFromGroup", false)
    }

    /// Allows `remove path=members` with no filter (defaults to true).
    pub fn allow_remove_all_members(&self) -> bool {
        self.flag("PatchOpAllowRemoveAllMembers", true)
    }
}

/// Input for creating an endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct CreateEndpointInput {
    pub name: String,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub config: Option<Value>,
}

/// PATCH-style partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateEndpointInput {
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub config: Option<Value>,
    pub active: Option<bool>,
}

/// Counts of owned resources and recent request activity.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStats {
    pub users: i64,
    pub groups: i64,
    #[serde(rename = "recentRequests")]
    pub recent_requests: i64,
}

/// `name` must be usable as a URL path segment.
pub fn is_url_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_from(v: Value) -> EndpointConfig {
        EndpointConfig::from_json_text(&v.to_string())
    }

    #[test]
    fn test_flag_boolean_values() {
        let config = config_from(json!({"VerbosePatchSupported": true}));
        assert!(config.verbose_patch_supported());
        let config = config_from(json!({"VerbosePatchSupported": false}));
        assert!(!config.verbose_patch_supported());
    }

    #[test]
    fn test_flag_string_values_case_insensitive() {
        let config = config_from(json!({"verbosepatchsupported": "True"}));
        assert!(config.verbose_patch_supported());
        let config = config_from(json!({"VERBOSEPATCHSUPPORTED": "FALSE"}));
        assert!(!config.verbose_patch_supported());
    }

    #[test]
    fn test_remove_all_members_defaults_true() {
        let config = config_from(json!({}));
        assert!(config.allow_remove_all_members());
        let config = config_from(json!({"PatchOpAllowRemoveAllMembers": "false"}));
        assert!(!config.allow_remove_all_members());
    }

    #[test]
    fn test_multi_member_flags_default_false() {
        let config = config_from(json!({}));
        assert!(!config.multi_op_add_members());
        assert!(!config.multi_op_remove_members());
    }

    #[test]
    fn test_unknown_keys_preserved() {
        let config = config_from(json!({"SomeFutureFlag": 42, "VerbosePatchSupported": true}));
        assert_eq!(config.as_value()["SomeFutureFlag"], 42);
    }

    #[test]
    fn test_garbage_config_text_is_empty_config() {
        let config = EndpointConfig::from_json_text("not json");
        assert!(!config.verbose_patch_supported());
        assert!(config.allow_remove_all_members());
    }

    #[test]
    fn test_url_safe_name() {
        assert!(is_url_safe_name("tenant-1"));
        assert!(is_url_safe_name("Contoso_Prod"));
        assert!(!is_url_safe_name(""));
        assert!(!is_url_safe_name("has space"));
        assert!(!is_url_safe_name("slash/name"));
    }
}
