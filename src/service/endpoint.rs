//! Endpoint (tenant) lifecycle service

use crate::domain::endpoint::is_url_safe_name;
use crate::domain::{CreateEndpointInput, Endpoint, EndpointStats, UpdateEndpointInput};
use crate::error::{AppError, Result};
use crate::logging::{LogCategory, Logger, RequestContext};
use crate::repository::EndpointRepository;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Name of the endpoint that backs the unscoped `/scim/v2` routes.
pub const DEFAULT_ENDPOINT_NAME: &str = "default";

pub struct EndpointService<E: EndpointRepository> {
    repo: Arc<E>,
    logger: Logger,
}

impl<E: EndpointRepository> EndpointService<E> {
    pub fn new(repo: Arc<E>, logger: Logger) -> Self {
        Self { repo, logger }
    }

    pub async fn create(
        &self,
        ctx: &RequestContext,
        input: CreateEndpointInput,
    ) -> Result<Endpoint> {
        if !is_url_safe_name(&input.name) {
            return Err(AppError::InvalidValue(format!(
                "Endpoint name '{}' must be a URL-safe identifier",
                input.name
            )));
        }
        let config = match &input.config {
            None => "{}".to_string(),
            Some(v @ Value::Object(_)) => v.to_string(),
            Some(_) => {
                return Err(AppError::InvalidValue(
                    "Endpoint config must be an object".to_string(),
                ))
            }
        };
        if self.repo.find_by_name(&input.name).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "An endpoint named '{}' already exists",
                input.name
            )));
        }

        let now = Utc::now();
        let endpoint = self
            .repo
            .create(&Endpoint {
                id: Uuid::new_v4().to_string(),
                name: input.name,
                display_name: input.display_name,
                description: input.description,
                config,
                active: true,
                created_at: now,
                updated_at: now,
            })
            .await?;

        self.logger.info(
            LogCategory::Endpoint,
            Some(ctx),
            format!("Endpoint '{}' created", endpoint.name),
        );
        Ok(endpoint)
    }

    pub async fn get(&self, id: &str) -> Result<Endpoint> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Endpoint {} not found", id)))
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Endpoint> {
        self.repo
            .find_by_name(name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Endpoint '{}' not found", name)))
    }

    pub async fn list(&self) -> Result<Vec<Endpoint>> {
        self.repo.list().await
    }

    /// PATCH-style partial update; the config document is replaced
    /// atomically, never merged.
    pub async fn update(
        &self,
        ctx: &RequestContext,
        id: &str,
        input: UpdateEndpointInput,
    ) -> Result<Endpoint> {
        let mut endpoint = self.get(id).await?;
        if let Some(display_name) = input.display_name {
            endpoint.display_name = Some(display_name);
        }
        if let Some(description) = input.description {
            endpoint.description = Some(description);
        }
        if let Some(config) = input.config {
            match config {
                Value::Object(_) => endpoint.config = config.to_string(),
                _ => {
                    return Err(AppError::InvalidValue(
                        "Endpoint config must be an object".to_string(),
                    ))
                }
            }
        }
        if let Some(active) = input.active {
            endpoint.active = active;
        }
        endpoint.updated_at = Utc::now();

        let endpoint = self.repo.update(&endpoint).await?;
        self.logger.info(
            LogCategory::Endpoint,
            Some(ctx),
            format!("Endpoint '{}' updated", endpoint.name),
        );
        Ok(endpoint)
    }

    /// Cascading delete: the endpoint and all owned resources go in one
    /// transaction.
    pub async fn delete(&self, ctx: &RequestContext, id: &str) -> Result<()> {
        self.repo.delete_cascade(id).await?;
        self.logger.info(
            LogCategory::Endpoint,
            Some(ctx),
            format!("Endpoint {} deleted (cascade)", id),
        );
        Ok(())
    }

    pub async fn stats(&self, id: &str) -> Result<EndpointStats> {
        // 404 on unknown id, not zeroed stats
        self.get(id).await?;
        self.repo.stats(id).await
    }

    /// Ensure the default endpoint behind the unscoped routes exists.
    pub async fn ensure_default(&self) -> Result<Endpoint> {
        if let Some(endpoint) = self.repo.find_by_name(DEFAULT_ENDPOINT_NAME).await? {
            return Ok(endpoint);
        }
        let now = Utc::now();
        let endpoint = self
            .repo
            .create(&Endpoint {
                id: Uuid::new_v4().to_string(),
                name: DEFAULT_ENDPOINT_NAME.to_string(),
                display_name: Some("Default endpoint".to_string()),
                description: None,
                config: "{}".to_string(),
                active: true,
                created_at: now,
                updated_at: now,
            })
            .await?;
        self.logger.info(
            LogCategory::Endpoint,
            None,
            "Default endpoint created".to_string(),
        );
        Ok(endpoint)
    }
}
