//! SCIM 2.0 protocol types (RFC 7643 / 7644)
//!
//! Resources themselves travel as open `serde_json::Value` trees; this
//! module holds the fixed protocol envelopes around them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const USER_SCHEMA: &str = "urn:ietf:params:scim:schemas:core:2.0:User";
pub const GROUP_SCHEMA: &str = "urn:ietf:params:scim:schemas:core:2.0:Group";
pub const ENTERPRISE_USER_SCHEMA: &str =
    "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User";
pub const LIST_RESPONSE_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:ListResponse";
pub const PATCH_OP_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:PatchOp";
pub const SEARCH_REQUEST_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:SearchRequest";

/// Default page size when the client sends no `count`.
pub const DEFAULT_PAGE_SIZE: i64 = 100;
/// Server cap on `count`.
pub const MAX_PAGE_SIZE: i64 = 200;

/// SCIM ListResponse (RFC 7644 §3.4.2)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    pub schemas: Vec<String>,
    #[serde(rename = "totalResults")]
    pub total_results: i64,
    #[serde(rename = "startIndex")]
    pub start_index: i64,
    #[serde(rename = "itemsPerPage")]
    pub items_per_page: i64,
    #[serde(rename = "Resources")]
    pub resources: Vec<Value>,
}

impl ListResponse {
    pub fn new(resources: Vec<Value>, total_results: i64, start_index: i64) -> Self {
        Self {
            schemas: vec![LIST_RESPONSE_SCHEMA.to_string()],
            total_results,
            start_index,
            items_per_page: resources.len() as i64,
            resources,
        }
    }
}

/// SCIM PatchOp envelope (RFC 7644 §3.5.2)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchOp {
    #[serde(default)]
    pub schemas: Vec<String>,
    #[serde(rename = "Operations", default)]
    pub operations: Vec<PatchOperation>,
}

impl PatchOp {
    /// Schema-URN check is case-insensitive (RFC 7643 §2.1).
    pub fn has_patch_schema(&self) -> bool {
        self.schemas
            .iter()
            .any(|s| s.eq_ignore_ascii_case(PATCH_OP_SCHEMA))
    }
}

/// Individual patch operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// `.search` request body (RFC 7644 §3.4.3)
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub schemas: Vec<String>,
    pub filter: Option<String>,
    #[serde(rename = "startIndex")]
    pub start_index: Option<i64>,
    pub count: Option<i64>,
    pub attributes: Option<Vec<String>>,
    #[serde(rename = "excludedAttributes")]
    pub excluded_attributes: Option<Vec<String>>,
}

/// Build a `meta` sub-object for a resource.
pub fn meta_object(
    resource_type: &str,
    created: DateTime<Utc>,
    last_modified: DateTime<Utc>,
    location: &str,
) -> Value {
    json!({
        "resourceType": resource_type,
        "created": created.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "lastModified": last_modified.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "location": location,
        "version": weak_etag(last_modified),
    })
}

/// Weak ETag derived from the last-modified instant. Updates always bump
/// the timestamp, so equality is a sufficient version check.
pub fn weak_etag(last_modified: DateTime<Utc>) -> String {
    format!("W/\"{}\"", last_modified.timestamp_millis())
}

/// ServiceProviderConfig discovery document (RFC 7643 §5)
pub fn service_provider_config(base: &str) -> Value {
    json!({
        "schemas": ["urn:ietf:params:scim:schemas:core:2.0:ServiceProviderConfig"],
        "documentationUri": "https://datatracker.ietf.org/doc/html/rfc7644",
        "patch": { "supported": true },
        "bulk": { "supported": false, "maxOperations": 0, "maxPayloadSize": 0 },
        "filter": { "supported": true, "maxResults": MAX_PAGE_SIZE },
        "changePassword": { "supported": false },
        "sort": { "supported": false },
        "etag": { "supported": true },
        "authenticationSchemes": [{
            "name": "OAuth Bearer Token",
            "description": "Authentication scheme using the OAuth Bearer Token Standard",
            "specUri": "http://www.rfc-editor.org/info/rfc6750",
            "type": "oauthbearertoken",
            "primary": true
        }],
        "meta": {
            "resourceType": "ServiceProviderConfig",
            "location": format!("{}/ServiceProviderConfig", base)
        }
    })
}

/// `/Schemas` discovery document: User, Group, Enterprise extension.
pub fn schemas_document(base: &str) -> Value {
    let attr = |name: &str, typ: &str, multi: bool, required: bool, uniq: &str| {
        json!({
            "name": name,
            "type": typ,
            "multiValued": multi,
            "required": required,
            "caseExact": false,
            "mutability": "readWrite",
            "returned": "default",
            "uniqueness": uniq,
        })
    };

    json!({
        "schemas": [LIST_RESPONSE_SCHEMA],
        "totalResults": 3,
        "startIndex": 1,
        "itemsPerPage": 3,
        "Resources": [
            {
                "schemas": ["urn:ietf:params:scim:schemas:core:2.0:Schema"],
                "id": USER_SCHEMA,
                "name": "User",
                "description": "User Account",
                "attributes": [
                    attr("userName", "string", false, true, "server"),
                    attr("externalId", "string", false, false, "server"),
                    attr("active", "boolean", false, false, "none"),
                    attr("displayName", "string", false, false, "none"),
                    attr("name", "complex", false, false, "none"),
                    attr("emails", "complex", true, false, "none"),
                    attr("phoneNumbers", "complex", true, false, "none"),
                    attr("addresses", "complex", true, false, "none"),
                ],
                "meta": { "resourceType": "Schema", "location": format!("{}/Schemas/{}", base, USER_SCHEMA) }
            },
            {
                "schemas": ["urn:ietf:params:scim:schemas:core:2.0:Schema"],
                "id": GROUP_SCHEMA,
                "name": "Group",
                "description": "Group",
                "attributes": [
                    attr("displayName", "string", false, true, "server"),
                    attr("externalId", "string", false, false, "server"),
                    attr("members", "complex", true, false, "none"),
                ],
                "meta": { "resourceType": "Schema", "location": format!("{}/Schemas/{}", base, GROUP_SCHEMA) }
            },
            {
                "schemas": ["urn:ietf:params:scim:schemas:core:2.0:Schema"],
                "id": ENTERPRISE_USER_SCHEMA,
                "name": "EnterpriseUser",
                "description": "Enterprise User",
                "attributes": [
                    attr("employeeNumber", "string", false, false, "none"),
                    attr("department", "string", false, false, "none"),
                    attr("manager", "complex", false, false, "none"),
                ],
                "meta": { "resourceType": "Schema", "location": format!("{}/Schemas/{}", base, ENTERPRISE_USER_SCHEMA) }
            }
        ]
    })
}

/// `/ResourceTypes` discovery document.
pub fn resource_types_document(base: &str) -> Value {
    json!({
        "schemas": [LIST_RESPONSE_SCHEMA],
        "totalResults": 2,
        "startIndex": 1,
        "itemsPerPage": 2,
        "Resources": [
            {
                "schemas": ["urn:ietf:params:scim:schemas:core:2.0:ResourceType"],
                "id": "User",
                "name": "User",
                "endpoint": "/Users",
                "schema": USER_SCHEMA,
                "schemaExtensions": [
                    { "schema": ENTERPRISE_USER_SCHEMA, "required": false }
                ],
                "meta": { "resourceType": "ResourceType", "location": format!("{}/ResourceTypes/User", base) }
            },
            {
                "schemas": ["urn:ietf:params:scim:schemas:core:2.0:ResourceType"],
                "id": "Group",
                "name": "Group",
                "endpoint": "/Groups",
                "schema": GROUP_SCHEMA,
                "meta": { "resourceType": "ResourceType", "location": format!("{}/ResourceTypes/Group", base) }
            }
        ]
    })
}

/// Case-insensitive check that a payload declares the required schema URN.
pub fn has_schema(payload: &Value, urn: &str) -> bool {
    payload
        .get("schemas")
        .and_then(Value::as_array)
        .map(|schemas| {
            schemas
                .iter()
                .filter_map(Value::as_str)
                .any(|s| s.eq_ignore_ascii_case(urn))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_response_shape() {
        let resp = ListResponse::new(vec![json!({"id": "a"}), json!({"id": "b"})], 10, 3);
        assert_eq!(resp.total_results, 10);
        assert_eq!(resp.start_index, 3);
        assert_eq!(resp.items_per_page, 2);
        assert_eq!(resp.schemas, vec![LIST_RESPONSE_SCHEMA.to_string()]);
    }

    #[test]
    fn test_has_schema_case_insensitive() {
        let payload = json!({"schemas": ["URN:IETF:PARAMS:SCIM:SCHEMAS:CORE:2.0:USER"]});
        assert!(has_schema(&payload, USER_SCHEMA));
        assert!(!has_schema(&payload, GROUP_SCHEMA));
        assert!(!has_schema(&json!({}), USER_SCHEMA));
    }

    #[test]
    fn test_patch_op_schema_check() {
        let patch: PatchOp = serde_json::from_value(json!({
            "schemas": ["urn:ietf:params:scim:api:messages:2.0:PATCHOP"],
            "Operations": [{"op": "replace", "path": "active", "value": false}]
        }))
        .unwrap();
        assert!(patch.has_patch_schema());
        assert_eq!(patch.operations.len(), 1);
    }

    #[test]
    fn test_weak_etag_changes_with_timestamp() {
        let t1 = Utc::now();
        let t2 = t1 + chrono::Duration::milliseconds(5);
        assert_ne!(weak_etag(t1), weak_etag(t2));
        assert!(weak_etag(t1).starts_with("W/\""));
    }

    #[test]
    fn test_meta_object_millisecond_precision() {
        let t = Utc::now();
        let meta = meta_object("User", t, t, "/scim/v2/Users/x");
        let created = meta["created"].as_str().unwrap();
        // RFC 3339 with milliseconds: 2026-01-01T00:00:00.000Z
        assert!(created.contains('.'));
        assert!(created.ends_with('Z'));
        assert_eq!(meta["location"], "/scim/v2/Users/x");
    }

    #[test]
    fn test_service_provider_config_flags() {
        let doc = service_provider_config("/scim/v2");
        assert_eq!(doc["patch"]["supported"], true);
        assert_eq!(doc["bulk"]["supported"], false);
        assert_eq!(doc["etag"]["supported"], true);
        assert_eq!(doc["sort"]["supported"], false);
        assert_eq!(doc["changePassword"]["supported"], false);
        assert_eq!(doc["filter"]["supported"], true);
    }
}
