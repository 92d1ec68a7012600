//! SCIM User resource service
//!
//! First-class attributes (`userName`, `externalId`, `active`) travel as
//! typed columns; `raw_payload` carries the rest of the client payload
//! with those keys stripped. A client-supplied `id` is dropped on the
//! floor and never echoes back.

use crate::domain::scim::{self, ListResponse, PatchOp, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::domain::{Endpoint, NewUser, UserRecord};
use crate::error::{AppError, Result};
use crate::logging::{LogCategory, Logger, RequestContext};
use crate::repository::UserRepository;
use crate::scim::filter::{self, FilterExpr, ResourceKind};
use crate::scim::patch::{apply_operations, PatchFlags};
use crate::scim::value::{coerce_booleans, get_ci, set_ci, strip_keys};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Keys that live in DB columns or are server-managed; never stored in
/// `raw_payload`.
const RESERVED_KEYS: &[&str] = &["id", "meta", "userName", "externalId", "active"];

pub struct UserService<R: UserRepository> {
    repo: Arc<R>,
    logger: Logger,
}

impl<R: UserRepository> UserService<R> {
    pub fn new(repo: Arc<R>, logger: Logger) -> Self {
        Self { repo, logger }
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
                "User payload must be a JSON object".to_string(),
            ));
        }
        if !scim::has_schema(&payload, scim::USER_SCHEMA) {
            return Err(AppError::InvalidSyntax(format!(
                "Missing required schema {}",
                scim::USER_SCHEMA
            )));
        }
        coerce_booleans(&mut payload);

        let user_name = required_user_name(&payload)?;
        let external_id = optional_string(&payload, "externalId");
        let active = get_ci(&payload, "active")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        if let Some(conflict) = self
            .repo
            .find_conflict(
                &endpoint.id,
                &user_name.to_lowercase(),
                external_id.as_deref(),
                None,
            )
            .await?
        {
            self.logger.warn(
                LogCategory::ScimUser,
                Some(ctx),
                format!(
                    "Create rejected: userName '{}' collides with user {}",
                    user_name, conflict.scim_id
                ),
            );
            return Err(AppError::Conflict(format!(
                "A user with userName '{}' or this externalId already exists",
                user_name
            )));
        }

        strip_keys(&mut payload, RESERVED_KEYS);
        let record = self
            .repo
            .create(&NewUser {
                scim_id: Uuid::new_v4().to_string(),
                endpoint_id: endpoint.id.clone(),
                external_id,
                user_name: user_name.clone(),
                active,
                raw_payload: payload.to_string(),
            })
            .await?;

        self.logger.emit(
            crate::logging::LogLevel::Info,
            LogCategory::ScimUser,
            Some(ctx),
            format!("User '{}' created", user_name),
            None,
            Some(json!({"scimId": record.scim_id, "userName": user_name})),
            None,
        );
        Ok(self.assemble(&record, base_path))
    }

    pub async fn get(
        &self,
        endpoint: &Endpoint,
        scim_id: &str,
        base_path: &str,
    ) -> Result<Value> {
        let record = self.fetch(endpoint, scim_id).await?;
        Ok(self.assemble(&record, base_path))
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
            .and_then(|e| filter::try_pushdown(e, ResourceKind::User));
        if let Some(expr) = &expr {
            self.logger.emit(
                crate::logging::LogLevel::Debug,
                LogCategory::ScimFilter,
                Some(ctx),
                "Filter evaluated",
                None,
                Some(json!({
                    "pushdown": pushdown.is_some(),
                    "expr": format!("{:?}", expr),
                })),
                None,
            );
        }

        let records = self.repo.list(&endpoint.id, pushdown.as_ref()).await?;
        let resources = self.project_filtered(records, expr.as_ref(), base_path);
        Ok(paginate(resources, start_index, count))
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
        if !scim::has_schema(&payload, scim::USER_SCHEMA) {
            return Err(AppError::InvalidSyntax(format!(
                "Missing required schema {}",
                scim::USER_SCHEMA
            )));
        }
        coerce_booleans(&mut payload);

        let user_name = required_user_name(&payload)?;
        let external_id = optional_string(&payload, "externalId");
        let active = get_ci(&payload, "active")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        self.assert_unique(endpoint, &user_name, external_id.as_deref(), scim_id)
            .await?;

        strip_keys(&mut payload, RESERVED_KEYS);
        let record = self
            .repo
            .update(&UserRecord {
                external_id,
                user_name,
                active,
                raw_payload: payload.to_string(),
                updated_at: chrono::Utc::now(),
                ..existing
            })
            .await?;

        self.logger.info(
            LogCategory::ScimUser,
            Some(ctx),
            format!("User {} replaced", scim_id),
        );
        Ok(self.assemble(&record, base_path))
    }

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

        // Patch against the full view minus server-managed fields.
        let mut resource = parse_raw(&existing.raw_payload);
        set_ci(&mut resource, "userName", json!(existing.user_name));
        if let Some(external_id) = &existing.external_id {
            set_ci(&mut resource, "externalId", json!(external_id));
        }
        set_ci(&mut resource, "active", json!(existing.active));

        let flags = PatchFlags {
            verbose_dot: endpoint.config().verbose_patch_supported(),
        };
        apply_operations(&mut resource, &patch.operations, &flags).inspect_err(|e| {
            self.logger.warn(
                LogCategory::ScimPatch,
                Some(ctx),
                format!("PATCH rejected: {}", e.detail()),
            );
        })?;
        coerce_booleans(&mut resource);

        let user_name = required_user_name(&resource)?;
        let external_id = optional_string(&resource, "externalId");
        let active = get_ci(&resource, "active")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        self.assert_unique(endpoint, &user_name, external_id.as_deref(), scim_id)
            .await?;

        strip_keys(&mut resource, RESERVED_KEYS);
        let record = self
            .repo
            .update(&UserRecord {
                external_id,
                user_name,
                active,
                raw_payload: resource.to_string(),
                updated_at: chrono::Utc::now(),
                ..existing
            })
            .await?;

        self.logger.emit(
            crate::logging::LogLevel::Info,
            LogCategory::ScimPatch,
            Some(ctx),
            format!("User {} patched", scim_id),
            None,
            Some(json!({"operations": patch.operations.len()})),
            None,
        );
        Ok(self.assemble(&record, base_path))
    }

    pub async fn delete(
        &self,
        ctx: &RequestContext,
        endpoint: &Endpoint,
        scim_id: &str,
    ) -> Result<()> {
        if !self.repo.delete(&endpoint.id, scim_id).await? {
            return Err(AppError::NotFound(format!("User {} not found", scim_id)));
        }
        self.logger.info(
            LogCategory::ScimUser,
            Some(ctx),
            format!("User {} deleted", scim_id),
        );
        Ok(())
    }

    async fn fetch(&self, endpoint: &Endpoint, scim_id: &str) -> Result<UserRecord> {
        self.repo
            .find_by_scim_id(&endpoint.id, scim_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", scim_id)))
    }

    async fn assert_unique(
        &self,
        endpoint: &Endpoint,
        user_name: &str,
        external_id: Option<&str>,
        exclude_scim_id: &str,
    ) -> Result<()> {
        if self
            .repo
            .find_conflict(
                &endpoint.id,
                &user_name.to_lowercase(),
                external_id,
                Some(exclude_scim_id),
            )
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(format!(
                "A user with userName '{}' or this externalId already exists",
                user_name
            )));
        }
        Ok(())
    }

    fn project_filtered(
        &self,
        records: Vec<UserRecord>,
        expr: Option<&FilterExpr>,
        base_path: &str,
    ) -> Vec<Value> {
        records
            .into_iter()
            .map(|record| self.assemble(&record, base_path))
            .filter(|resource| expr.map(|e| filter::matches(e, resource)).unwrap_or(true))
            .collect()
    }

    /// Assemble the canonical resource from columns + rawPayload + meta.
    pub fn assemble(&self, record: &UserRecord, base_path: &str) -> Value {
        let mut resource = parse_raw(&record.raw_payload);
        if get_ci(&resource, "schemas").is_none() {
            set_ci(&mut resource, "schemas", json!([scim::USER_SCHEMA]));
        }
        set_ci(&mut resource, "id", json!(record.scim_id));
        set_ci(&mut resource, "userName", json!(record.user_name));
        if let Some(external_id) = &record.external_id {
            set_ci(&mut resource, "externalId", json!(external_id));
        }
        set_ci(&mut resource, "active", json!(record.active));
        coerce_booleans(&mut resource);
        set_ci(
            &mut resource,
            "meta",
            scim::meta_object(
                "User",
                record.created_at,
                record.updated_at,
                &format!("{}/Users/{}", base_path, record.scim_id),
            ),
        );
        resource
    }
}

fn parse_raw(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| json!({}))
}

fn required_user_name(payload: &Value) -> Result<String> {
    get_ci(payload, "userName")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .ok_or_else(|| AppError::InvalidValue("userName is required".to_string()))
}

fn optional_string(payload: &Value, key: &str) -> Option<String> {
    get_ci(payload, key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// 1-indexed pagination with the server-side page cap.
pub fn paginate(resources: Vec<Value>, start_index: Option<i64>, count: Option<i64>) -> ListResponse {
    let total = resources.len() as i64;
    let start = start_index.unwrap_or(1).max(1);
    let count = count.unwrap_or(DEFAULT_PAGE_SIZE).clamp(0, MAX_PAGE_SIZE);
    let page: Vec<Value> = resources
        .into_iter()
        .skip((start - 1) as usize)
        .take(count as usize)
        .collect();
    ListResponse::new(page, total, start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paginate_one_indexed() {
        let items: Vec<Value> = (0..5).map(|i| json!({"n": i})).collect();
        let page = paginate(items, Some(2), Some(2));
        assert_eq!(page.total_results, 5);
        assert_eq!(page.start_index, 2);
        assert_eq!(page.items_per_page, 2);
        assert_eq!(page.resources[0]["n"], 1);
    }

    #[test]
    fn test_paginate_count_zero() {
        let items: Vec<Value> = (0..3).map(|i| json!({"n": i})).collect();
        let page = paginate(items, None, Some(0));
        assert_eq!(page.total_results, 3);
        assert!(page.resources.is_empty());
    }

    #[test]
    fn test_paginate_caps_count() {
        let items: Vec<Value> = (0..300).map(|i| json!({"n": i})).collect();
        let page = paginate(items, None, Some(10_000));
        assert_eq!(page.resources.len(), MAX_PAGE_SIZE as usize);
        assert_eq!(page.total_results, 300);
    }

    #[test]
    fn test_paginate_defaults() {
        let items: Vec<Value> = (0..150).map(|i| json!({"n": i})).collect();
        let page = paginate(items, None, None);
        assert_eq!(page.resources.len(), DEFAULT_PAGE_SIZE as usize);
        assert_eq!(page.start_index, 1);
    }

    #[test]
    fn test_required_user_name() {
        assert_eq!(
            required_user_name(&json!({"USERNAME": "a@x.com"})).unwrap(),
            "a@x.com"
        );
        assert!(required_user_name(&json!({"userName": ""})).is_err());
        assert!(required_user_name(&json!({})).is_err());
    }
}
