//! SCIM Group resource service
//!
//! Membership is materialized relationally. Member values are resolved
//! against the endpoint's users BEFORE the write transaction opens;
//! values that do not resolve (including cross-endpoint references) are
//! stored by opaque value only. The transactional body is: update
//! columns, delete memberships, insert memberships, bounded by an
//! explicit timeout so a stuck writer surfaces as a 500, never as
//! partially visible state.

use crate::domain::scim::{self, ListResponse, PatchOp, PatchOperation};
use crate::domain::{Endpoint, GroupRecord, MemberInput, MemberSpec, NewGroup};
use crate::error::{AppError, Result};
use crate::logging::{LogCategory, Logger, RequestContext};
use crate::repository::{GroupRepository, UserRepository};
use crate::scim::filter::{self, ResourceKind};
use crate::scim::patch::{apply_operation, parse_path, PatchFlags, PatchPath};
use crate::scim::value::{coerce_booleans, get_ci, get_ci_mut, set_ci, strip_keys};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const RESERVED_KEYS: &[&str] = &["id", "meta", "displayName", "externalId", "members"];

/// Upper bound on the membership write transaction.
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct GroupService<G: GroupRepository, U: UserRepository> {
    groups: Arc<G>,
    users: Arc<U>,
    logger: Logger,
}

impl<G: GroupRepository, U: UserRepository> GroupService<G, U> {
    pub fn new(groups: Arc<G>, users: Arc<U>, logger: Logger) -> Self {
        Self {
            groups,
            users,
            logger,
        }
    }

    pub async fn create(
        &self,
        ctx: &RequestContext,
        endpoint: &Endpoint,
        mut payload: Value,
        base_path: &str,
    ) -> Result<Value> {
        if !payload.is_object() {
            return Err(AppError::InvalidSyntax(
                "Group payload must be a JSON object".to_string(),
            ));
        }
        if !scim::has_schema(&payload, scim::GROUP_SCHEMA) {
            return Err(AppError::InvalidSyntax(format!(
                "Missing required schema {}",
                scim::GROUP_SCHEMA
            )));
        }
        coerce_booleans(&mut payload);

        let display_name = required_display_name(&payload)?;
        let external_id = get_ci(&payload, "externalId")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from);

        if self
            .groups
            .find_conflict(
                &endpoint.id,
                &display_name.to_lowercase(),
                external_id.as_deref(),
                None,
            )
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(format!(
                "A group with displayName '{}' or this externalId already exists",
                display_name
            )));
        }

        let members = members_from_payload(&payload)?;
        // Resolution happens before the write transaction.
        let specs = self.resolve_members(&endpoint.id, members).await?;

        strip_keys(&mut payload, RESERVED_KEYS);
        let new_group = NewGroup {
            scim_id: Uuid::new_v4().to_string(),
            endpoint_id: endpoint.id.clone(),
            external_id,
            display_name: display_name.clone(),
            raw_payload: payload.to_string(),
        };
        let record = tokio::time::timeout(WRITE_TIMEOUT, self.groups.create(&new_group, &specs))
            .await
            .map_err(|_| write_timeout())??;

        self.logger.emit(
            crate::logging::LogLevel::Info,
            LogCategory::ScimGroup,
            Some(ctx),
            format!("Group '{}' created", display_name),
            None,
            Some(json!({"scimId": record.scim_id, "members": specs.len()})),
            None,
        );
        self.assemble(&record, base_path).await
    }

    pub async fn get(
        &self,
        endpoint: &Endpoint,
        scim_id: &str,
        base_path: &str,
    ) -> Result<Value> {
        let record = self.fetch(endpoint, scim_id).await?;
        self.assemble(&record, base_path).await
    }

    pub async fn list(
        &self,
        ctx: &RequestContext,
        endpoint: &Endpoint,
        filter_str: Option<&str>,
        start_index: Option<i64>,
        count: Option<i64>,
        base_path: &str,
    ) -> Result<ListResponse> {
        let expr = match filter_str {
            Some(raw) => {
                let parsed = filter::parse_filter(raw).inspect_err(|_| {
                    self.logger.warn(
                        LogCategory::ScimFilter,
                        Some(ctx),
                        format!("Unparseable filter '{}'", raw),
                    );
                })?;
                Some(parsed)
            }
            None => None,
        };
        let pushdown = expr
            .as_ref()
            .and_then(|e| filter::try_pushdown(e, ResourceKind::Group));

        let records = self.groups.list(&endpoint.id, pushdown.as_ref()).await?;
        let mut resources = Vec::with_capacity(records.len());
        for record in records {
            let resource = self.assemble(&record, base_path).await?;
            if expr
                .as_ref()
                .map(|e| filter::matches(e, &resource))
                .unwrap_or(true)
            {
                resources.push(resource);
            }
        }
        Ok(super::user::paginate(resources, start_index, count))
    }

    pub async fn replace(
        &self,
        ctx: &RequestContext,
        endpoint: &Endpoint,
        scim_id: &str,
        mut payload: Value,
        base_path: &str,
    ) -> Result<Value> {
        let existing = self.fetch(endpoint, scim_id).await?;
        if !scim::has_schema(&payload, scim::GROUP_SCHEMA) {
            return Err(AppError::InvalidSyntax(format!(
                "Missing required schema {}",
                scim::GROUP_SCHEMA
            )));
        }
        coerce_booleans(&mut payload);

        let display_name = required_display_name(&payload)?;
        let external_id = get_ci(&payload, "externalId")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from);

        self.assert_unique(endpoint, &display_name, external_id.as_deref(), scim_id)
            .await?;

        let members = members_from_payload(&payload)?;
        let specs = self.resolve_members(&endpoint.id, members).await?;

        strip_keys(&mut payload, RESERVED_KEYS);
        let updated = GroupRecord {
            external_id,
            display_name: display_name.clone(),
            raw_payload: payload.to_string(),
            updated_at: chrono::Utc::now(),
            ..existing
        };
        let record = tokio::time::timeout(WRITE_TIMEOUT, self.groups.update(&updated, &specs))
            .await
            .map_err(|_| write_timeout())??;

        self.logger.info(
            LogCategory::ScimGroup,
            Some(ctx),
            format!("Group {} replaced", scim_id),
        );
        self.assemble(&record, base_path).await
    }

    /// PATCH returns the canonical resource with 200, not 204; Entra
    /// expects the body.
    pub async fn patch(
        &self,
        ctx: &RequestContext,
        endpoint: &Endpoint,
        scim_id: &str,
        patch: PatchOp,
        base_path: &str,
    ) -> Result<Value> {
        let existing = self.fetch(endpoint, scim_id).await?;
        if !patch.has_patch_schema() {
            return Err(AppError::InvalidSyntax(format!(
                "Missing required schema {}",
                scim::PATCH_OP_SCHEMA
            )));
        }
        let config = endpoint.config();
        let flags = PatchFlags {
            verbose_dot: config.verbose_patch_supported(),
        };

        // Working view: raw payload + first-class columns + materialized
        // members. Ops apply in order; later ops see earlier effects.
        let mut resource: Value =
            serde_json::from_str(&existing.raw_payload).unwrap_or_else(|_| json!({}));
        set_ci(&mut resource, "displayName", json!(existing.display_name));
        if let Some(external_id) = &existing.external_id {
            set_ci(&mut resource, "externalId", json!(external_id));
        }
        let stored_members = self.groups.members_of(&existing.id).await?;
        let members_json: Vec<Value> = stored_members
            .iter()
            .map(|m| {
                let mut v = json!({"value": m.value});
                if let Some(display) = &m.display {
                    v["display"] = json!(display);
                }
                if let Some(t) = &m.member_type {
                    v["type"] = json!(t);
                }
                v
            })
            .collect();
        set_ci(&mut resource, "members", Value::Array(members_json));

        for operation in &patch.operations {
            self.apply_group_operation(&mut resource, operation, &flags, &config)
                .inspect_err(|e| {
                    self.logger.warn(
                        LogCategory::ScimPatch,
                        Some(ctx),
                        format!("Group PATCH rejected: {}", e.detail()),
                    );
                })?;
        }
        coerce_booleans(&mut resource);

        let display_name = required_display_name(&resource)?;
        let external_id = get_ci(&resource, "externalId")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from);
        self.assert_unique(endpoint, &display_name, external_id.as_deref(), scim_id)
            .await?;

        let members = members_from_payload(&resource)?;
        let specs = self.resolve_members(&endpoint.id, members).await?;

        strip_keys(&mut resource, RESERVED_KEYS);
        let updated = GroupRecord {
            external_id,
            display_name,
            raw_payload: resource.to_string(),
            updated_at: chrono::Utc::now(),
            ..existing
        };
        let record = tokio::time::timeout(WRITE_TIMEOUT, self.groups.update(&updated, &specs))
            .await
            .map_err(|_| write_timeout())??;

        self.logger.emit(
            crate::logging::LogLevel::Info,
            LogCategory::ScimPatch,
            Some(ctx),
            format!("Group {} patched", scim_id),
            None,
            Some(json!({"operations": patch.operations.len()})),
            None,
        );
        self.assemble(&record, base_path).await
    }

    pub async fn delete(
        &self,
        ctx: &RequestContext,
        endpoint: &Endpoint,
        scim_id: &str,
    ) -> Result<()> {
        if !self.groups.delete(&endpoint.id, scim_id).await? {
            return Err(AppError::NotFound(format!("Group {} not found", scim_id)));
        }
        self.logger.info(
            LogCategory::ScimGroup,
            Some(ctx),
            format!("Group {} deleted", scim_id),
        );
        Ok(())
    }

    /// Pre-transactional gate checks plus the actual mutation for one op.
    fn apply_group_operation(
        &self,
        resource: &mut Value,
        operation: &PatchOperation,
        flags: &PatchFlags,
        config: &crate::domain::EndpointConfig,
    ) -> Result<()> {
        let parsed = operation
            .path
            .as_deref()
            .map(|p| parse_path(p, flags))
            .transpose()?;

        let targets_members = matches!(
            &parsed,
            Some(PatchPath::Simple(name)) if name.eq_ignore_ascii_case("members")
        );
        let targets_members_filtered = matches!(
            &parsed,
            Some(PatchPath::ValuePath { attr, .. }) if attr.eq_ignore_ascii_case("members")
        );

        let op_kind = operation.op.to_ascii_lowercase();
        if targets_members {
            let batch = operation
                .value
                .as_ref()
                .map(member_batch_len)
                .unwrap_or(0);
            match op_kind.as_str() {
                "add" if batch > 1 && !config.multi_op_add_members() => {
                    return Err(AppError::InvalidValue(
                        "Adding multiple members in a single operation is not enabled for this endpoint".to_string(),
                    ));
                }
                "remove" => {
                    match &operation.value {
                        // Entra-style remove-by-value list
                        Some(value) => {
                            let batch = member_batch_len(value);
                            if batch > 1 && !config.multi_op_remove_members() {
                                return Err(AppError::InvalidValue(
                                    "Removing multiple members in a single operation is not enabled for this endpoint".to_string(),
                                ));
                            }
                            remove_members_by_value(resource, value);
                            return Ok(());
                        }
                        None => {
                            if !config.allow_remove_all_members() {
                                return Err(AppError::InvalidValue(
                                    "Removing all members is not enabled for this endpoint"
                                        .to_string(),
                                ));
                            }
                            set_ci(resource, "members", json!([]));
                            return Ok(());
                        }
                    }
                }
                _ => {}
            }
        } else if targets_members_filtered && op_kind == "remove" {
            // `remove path=members[value eq "X"]` is exact; falls through
            // to the generic applier.
        }

        apply_operation(resource, operation, flags)
    }

    async fn fetch(&self, endpoint: &Endpoint, scim_id: &str) -> Result<GroupRecord> {
        self.groups
            .find_by_scim_id(&endpoint.id, scim_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Group {} not found", scim_id)))
    }

    async fn assert_unique(
        &self,
        endpoint: &Endpoint,
        display_name: &str,
        external_id: Option<&str>,
        exclude_scim_id: &str,
    ) -> Result<()> {
        if self
            .groups
            .find_conflict(
                &endpoint.id,
                &display_name.to_lowercase(),
                external_id,
                Some(exclude_scim_id),
            )
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(format!(
                "A group with displayName '{}' or this externalId already exists",
                display_name
            )));
        }
        Ok(())
    }

    /// Collapse duplicate values and resolve which ones are users of this
    /// endpoint. Runs outside any write transaction.
    async fn resolve_members(
        &self,
        endpoint_id: &str,
        members: Vec<MemberInput>,
    ) -> Result<Vec<MemberSpec>> {
        let mut seen = HashSet::new();
        let deduped: Vec<MemberInput> = members
            .into_iter()
            .filter(|m| seen.insert(m.value.clone()))
            .collect();

        let values: Vec<String> = deduped.iter().map(|m| m.value.clone()).collect();
        let resolved: HashSet<String> = self
            .users
            .filter_existing_scim_ids(endpoint_id, &values)
            .await?
            .into_iter()
            .collect();

        Ok(deduped
            .into_iter()
            .map(|m| MemberSpec {
                member_id: resolved.contains(&m.value).then(|| m.value.clone()),
                value: m.value,
                display: m.display,
                member_type: m.member_type,
            })
            .collect())
    }

    pub async fn assemble(&self, record: &GroupRecord, base_path: &str) -> Result<Value> {
        let mut resource: Value =
            serde_json::from_str(&record.raw_payload).unwrap_or_else(|_| json!({}));
        if get_ci(&resource, "schemas").is_none() {
            set_ci(&mut resource, "schemas", json!([scim::GROUP_SCHEMA]));
        }
        set_ci(&mut resource, "id", json!(record.scim_id));
        set_ci(&mut resource, "displayName", json!(record.display_name));
        if let Some(external_id) = &record.external_id {
            set_ci(&mut resource, "externalId", json!(external_id));
        }

        let members = self.groups.members_of(&record.id).await?;
        let members_json: Vec<Value> = members
            .into_iter()
            .map(|m| {
                let mut v = json!({"value": m.value});
                if let Some(display) = m.display {
                    v["display"] = json!(display);
                }
                if let Some(t) = m.member_type {
                    v["type"] = json!(t);
                }
                if let Some(member_id) = m.member_id {
                    v["$ref"] = json!(format!("{}/Users/{}", base_path, member_id));
                }
                v
            })
            .collect();
        set_ci(&mut resource, "members", Value::Array(members_json));
        coerce_booleans(&mut resource);
        set_ci(
            &mut resource,
            "meta",
            scim::meta_object(
                "Group",
                record.created_at,
                record.updated_at,
                &format!("{}/Groups/{}", base_path, record.scim_id),
            ),
        );
        Ok(resource)
    }
}

fn write_timeout() -> AppError {
    AppError::TransactionTimeout(
        "Group membership write exceeded the transaction deadline".to_string(),
    )
}

fn required_display_name(payload: &Value) -> Result<String> {
    get_ci(payload, "displayName")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .ok_or_else(|| AppError::InvalidValue("displayName is required".to_string()))
}

/// Length of a `members` op value for the multi-member gates.
fn member_batch_len(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.len(),
        Value::Object(_) => 1,
        _ => 0,
    }
}

/// Entra-style `remove path=members value=[{"value": "id"}, …]`.
fn remove_members_by_value(resource: &mut Value, value: &Value) {
    let doomed: HashSet<String> = match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| get_ci(item, "value").and_then(Value::as_str))
            .map(String::from)
            .collect(),
        Value::Object(_) => get_ci(value, "value")
            .and_then(Value::as_str)
            .map(String::from)
            .into_iter()
            .collect(),
        _ => HashSet::new(),
    };
    if doomed.is_empty() {
        return;
    }
    if let Some(Value::Array(members)) = get_ci_mut(resource, "members") {
        members.retain(|m| {
            get_ci(m, "value")
                .and_then(Value::as_str)
                .map(|v| !doomed.contains(v))
                .unwrap_or(true)
        });
    }
}

/// Parse the `members` array out of a payload; entries must carry a
/// string `value`.
fn members_from_payload(payload: &Value) -> Result<Vec<MemberInput>> {
    let Some(members) = get_ci(payload, "members") else {
        return Ok(Vec::new());
    };
    let Value::Array(items) = members else {
        return Err(AppError::InvalidValue(
            "members must be an array".to_string(),
        ));
    };
    items
        .iter()
        .map(|item| {
            MemberInput::from_value(item).ok_or_else(|| {
                AppError::InvalidValue("Each member requires a string 'value'".to_string())
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_batch_len() {
        assert_eq!(member_batch_len(&json!([{"value": "a"}, {"value": "b"}])), 2);
        assert_eq!(member_batch_len(&json!({"value": "a"})), 1);
        assert_eq!(member_batch_len(&json!("oops")), 0);
    }

    #[test]
    fn test_remove_members_by_value() {
        let mut resource = json!({"members": [
            {"value": "u1"}, {"value": "u2"}, {"value": "u3"}
        ]});
        remove_members_by_value(&mut resource, &json!([{"value": "u1"}, {"value": "u3"}]));
        assert_eq!(resource["members"], json!([{"value": "u2"}]));
    }

    #[test]
    fn test_members_from_payload_rejects_bad_entries() {
        assert!(members_from_payload(&json!({"members": [{"display": "x"}]})).is_err());
        assert!(members_from_payload(&json!({"members": "nope"})).is_err());
        assert_eq!(members_from_payload(&json!({})).unwrap().len(), 0);
    }

    #[test]
    fn test_required_display_name() {
        assert_eq!(
            required_display_name(&json!({"DISPLAYNAME": "Eng"})).unwrap(),
            "Eng"
        );
        assert!(required_display_name(&json!({})).is_err());
    }
}
