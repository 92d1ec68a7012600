//! User repository

use crate::domain::{NewUser, UserRecord};
use crate::error::{AppError, Result};
use crate::scim::filter::CompiledFilter;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: &NewUser) -> Result<UserRecord>;
    async fn find_by_scim_id(&self, endpoint_id: &str, scim_id: &str)
        -> Result<Option<UserRecord>>;
    /// First user in the endpoint colliding on `userNameLower` or, when
    /// given, `externalId`; `exclude_scim_id` skips the resource itself
    /// on PUT/PATCH re-assertion.
    async fn find_conflict<'a>(
        &self,
        endpoint_id: &str,
        user_name_lower: &str,
        external_id: Option<&'a str>,
        exclude_scim_id: Option<&'a str>,
    ) -> Result<Option<UserRecord>>;
    /// Ordered by `createdAt` then insertion rowid; `pushdown` narrows
    /// the scan to an indexed probe when the filter allows it.
    async fn list<'a>(
        &self,
        endpoint_id: &str,
        pushdown: Option<&'a CompiledFilter>,
    ) -> Result<Vec<UserRecord>>;
    async fn update(&self, user: &UserRecord) -> Result<UserRecord>;
    async fn delete(&self, endpoint_id: &str, scim_id: &str) -> Result<bool>;
    /// Which of `values` are scim_ids of users in the endpoint.
    async fn filter_existing_scim_ids(
        &self,
        endpoint_id: &str,
        values: &[String],
    ) -> Result<Vec<String>>;
}

pub struct UserRepositoryImpl {
    pool: SqlitePool,
}

impl UserRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const COLUMNS: &str = "id, scim_id, endpoint_id, external_id, user_name, user_name_lower, \
                       active, raw_payload, created_at, updated_at";

#[async_trait]
impl UserRepository for UserRepositoryImpl {
    async fn create(&self, user: &NewUser) -> Result<UserRecord> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO users (id, scim_id, endpoint_id, external_id, user_name, user_name_lower,
                               active, raw_payload, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&user.scim_id)
        .bind(&user.endpoint_id)
        .bind(&user.external_id)
        .bind(&user.user_name)
        .bind(user.user_name.to_lowercase())
        .bind(user.active)
        .bind(&user.raw_payload)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| super::map_unique_violation(e, "A user with this userName or externalId"))?;

        self.find_by_scim_id(&user.endpoint_id, &user.scim_id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("User not found after create")))
    }

    async fn find_by_scim_id(
        &self,
        endpoint_id: &str,
        scim_id: &str,
    ) -> Result<Option<UserRecord>> {
        let user = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {} FROM users WHERE endpoint_id = ? AND scim_id = ?",
            COLUMNS
        ))
        .bind(endpoint_id)
        .bind(scim_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_conflict<'a>(
        &self,
        endpoint_id: &str,
        user_name_lower: &str,
        external_id: Option<&'a str>,
        exclude_scim_id: Option<&'a str>,
    ) -> Result<Option<UserRecord>> {
        let mut sql = format!(
            "SELECT {} FROM users WHERE endpoint_id = ? AND (user_name_lower = ?",
            COLUMNS
        );
        if external_id.is_some() {
            sql.push_str(" OR external_id = ?");
        }
        sql.push(')');
        if exclude_scim_id.is_some() {
            sql.push_str(" AND scim_id != ?");
        }
        sql.push_str(" LIMIT 1");

        let mut query = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(endpoint_id)
            .bind(user_name_lower);
        if let Some(external_id) = external_id {
            query = query.bind(external_id);
        }
        if let Some(exclude) = exclude_scim_id {
            query = query.bind(exclude);
        }

        Ok(query.fetch_optional(&self.pool).await?)
    }

    async fn list<'a>(
        &self,
        endpoint_id: &str,
        pushdown: Option<&'a CompiledFilter>,
    ) -> Result<Vec<UserRecord>> {
        let mut sql = format!("SELECT {} FROM users WHERE endpoint_id = ?", COLUMNS);
        if let Some(filter) = pushdown {
            sql.push_str(" AND ");
            sql.push_str(&filter.where_clause);
        }
        sql.push_str(" ORDER BY created_at ASC, rowid ASC");

        let mut query = sqlx::query_as::<_, UserRecord>(&sql).bind(endpoint_id);
        if let Some(filter) = pushdown {
            for binding in &filter.bindings {
                query = query.bind(binding);
            }
        }
        Ok(query.fetch_all(&self.pool).await?)
    }

    async fn update(&self, user: &UserRecord) -> Result<UserRecord> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET external_id = ?, user_name = ?, user_name_lower = ?, active = ?,
                raw_payload = ?, updated_at = ?
            WHERE endpoint_id = ? AND scim_id = ?
            "#,
        )
        .bind(&user.external_id)
        .bind(&user.user_name)
        .bind(user.user_name.to_lowercase())
        .bind(user.active)
        .bind(&user.raw_payload)
        .bind(user.updated_at)
        .bind(&user.endpoint_id)
        .bind(&user.scim_id)
        .execute(&self.pool)
        .await
        .map_err(|e| super::map_unique_violation(e, "A user with this userName or externalId"))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "User {} not found",
                user.scim_id
            )));
        }
        self.find_by_scim_id(&user.endpoint_id, &user.scim_id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("User not found after update")))
    }

    async fn delete(&self, endpoint_id: &str, scim_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE endpoint_id = ? AND scim_id = ?")
            .bind(endpoint_id)
            .bind(scim_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn filter_existing_scim_ids(
        &self,
        endpoint_id: &str,
        values: &[String],
    ) -> Result<Vec<String>> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        let sql = format!(
            "SELECT scim_id FROM users WHERE endpoint_id = ? AND scim_id IN ({})",
            placeholders
        );
        let mut query = sqlx::query_as::<_, (String,)>(&sql).bind(endpoint_id);
        for value in values {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
