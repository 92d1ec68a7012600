//! Endpoint (tenant) repository

use crate::domain::{Endpoint, EndpointStats};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EndpointRepository: Send + Sync {
    async fn create(&self, endpoint: &Endpoint) -> Result<Endpoint>;
    async fn find_by_id(&self, id: &str) -> Result<Option<Endpoint>>;
    async fn find_by_name(&self, name: &str) -> Result<Option<Endpoint>>;
    async fn list(&self) -> Result<Vec<Endpoint>>;
    async fn update(&self, endpoint: &Endpoint) -> Result<Endpoint>;
    /// Removes the endpoint and every owned user, group and membership
    /// in one transaction.
    async fn delete_cascade(&self, id: &str) -> Result<()>;
    async fn stats(&self, id: &str) -> Result<EndpointStats>;
}

pub struct EndpointRepositoryImpl {
    pool: SqlitePool,
}

impl EndpointRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const COLUMNS: &str =
    "id, name, display_name, description, config, active, created_at, updated_at";

#[async_trait]
impl EndpointRepository for EndpointRepositoryImpl {
    async fn create(&self, endpoint: &Endpoint) -> Result<Endpoint> {
        sqlx::query(
            r#"
            INSERT INTO endpoints (id, name, display_name, description, config, active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&endpoint.id)
        .bind(&endpoint.name)
        .bind(&endpoint.display_name)
        .bind(&endpoint.description)
        .bind(&endpoint.config)
        .bind(endpoint.active)
        .bind(endpoint.created_at)
        .bind(endpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| super::map_unique_violation(e, "An endpoint with this name"))?;

        self.find_by_id(&endpoint.id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Endpoint not found after create")))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Endpoint>> {
        let endpoint = sqlx::query_as::<_, Endpoint>(&format!(
            "SELECT {} FROM endpoints WHERE id = ?",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(endpoint)
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Endpoint>> {
        let endpoint = sqlx::query_as::<_, Endpoint>(&format!(
            "SELECT {} FROM endpoints WHERE name = ?",
            COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(endpoint)
    }

    async fn list(&self) -> Result<Vec<Endpoint>> {
        let endpoints = sqlx::query_as::<_, Endpoint>(&format!(
            "SELECT {} FROM endpoints ORDER BY created_at ASC, rowid ASC",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(endpoints)
    }

    async fn update(&self, endpoint: &Endpoint) -> Result<Endpoint> {
        let result = sqlx::query(
            r#"
            UPDATE endpoints
            SET display_name = ?, description = ?, config = ?, active = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&endpoint.display_name)
        .bind(&endpoint.description)
        .bind(&endpoint.config)
        .bind(endpoint.active)
        .bind(endpoint.updated_at)
        .bind(&endpoint.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Endpoint {} not found",
                endpoint.id
            )));
        }
        self.find_by_id(&endpoint.id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Endpoint not found after update")))
    }

    async fn delete_cascade(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM group_members WHERE group_id IN (SELECT id FROM groups WHERE endpoint_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM groups WHERE endpoint_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM users WHERE endpoint_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM endpoints WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(AppError::NotFound(format!("Endpoint {} not found", id)));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn stats(&self, id: &str) -> Result<EndpointStats> {
        let users: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE endpoint_id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        let groups: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM groups WHERE endpoint_id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        let since = Utc::now() - chrono::Duration::hours(24);
        let recent: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM request_logs WHERE url LIKE ? AND created_at >= ?",
        )
        .bind(format!("%/endpoints/{}/%", id))
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(EndpointStats {
            users: users.0,
            groups: groups.0,
            recent_requests: recent.0,
        })
    }
}
