//! Group repository
//!
//! Membership writes are a single transactional unit: update columns,
//! delete existing memberships, insert the new set. Member resolution
//! against the users table happens in the service, before the write
//! transaction opens, to keep the single-writer lock hold short.

use crate::domain::{GroupMemberRecord, GroupRecord, MemberSpec, NewGroup};
use crate::error::{AppError, Result};
use crate::scim::filter::CompiledFilter;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GroupRepository: Send + Sync {
    async fn create(&self, group: &NewGroup, members: &[MemberSpec]) -> Result<GroupRecord>;
    async fn find_by_scim_id(
        &self,
        endpoint_id: &str,
        scim_id: &str,
    ) -> Result<Option<GroupRecord>>;
    async fn find_conflict<'a>(
        &self,
        endpoint_id: &str,
        display_name_lower: &str,
        external_id: Option<&'a str>,
        exclude_scim_id: Option<&'a str>,
    ) -> Result<Option<GroupRecord>>;
    async fn list<'a>(
        &self,
        endpoint_id: &str,
        pushdown: Option<&'a CompiledFilter>,
    ) -> Result<Vec<GroupRecord>>;
    /// Columns and membership set replaced in one transaction.
    async fn update(&self, group: &GroupRecord, members: &[MemberSpec]) -> Result<GroupRecord>;
    async fn delete(&self, endpoint_id: &str, scim_id: &str) -> Result<bool>;
    async fn members_of(&self, group_id: &str) -> Result<Vec<GroupMemberRecord>>;
}

pub struct GroupRepositoryImpl {
    pool: SqlitePool,
}

impl GroupRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const COLUMNS: &str = "id, scim_id, endpoint_id, external_id, display_name, display_name_lower, \
                       raw_payload, created_at, updated_at";

async fn insert_members(
    tx: &mut Transaction<'_, Sqlite>,
    group_id: &str,
    members: &[MemberSpec],
) -> Result<()> {
    for member in members {
        sqlx::query(
            r#"
            INSERT INTO group_members (group_id, member_id, value, display, member_type)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(group_id)
        .bind(&member.member_id)
        .bind(&member.value)
        .bind(&member.display)
        .bind(&member.member_type)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl GroupRepository for GroupRepositoryImpl {
    async fn create(&self, group: &NewGroup, members: &[MemberSpec]) -> Result<GroupRecord> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO groups (id, scim_id, endpoint_id, external_id, display_name,
                                display_name_lower, raw_payload, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&group.scim_id)
        .bind(&group.endpoint_id)
        .bind(&group.external_id)
        .bind(&group.display_name)
        .bind(group.display_name.to_lowercase())
        .bind(&group.raw_payload)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| super::map_unique_violation(e, "A group with this displayName or externalId"))?;

        insert_members(&mut tx, &id, members).await?;
        tx.commit().await?;

        self.find_by_scim_id(&group.endpoint_id, &group.scim_id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Group not found after create")))
    }

    async fn find_by_scim_id(
        &self,
        endpoint_id: &str,
        scim_id: &str,
    ) -> Result<Option<GroupRecord>> {
        let group = sqlx::query_as::<_, GroupRecord>(&format!(
            "SELECT {} FROM groups WHERE endpoint_id = ? AND scim_id = ?",
            COLUMNS
        ))
        .bind(endpoint_id)
        .bind(scim_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(group)
    }

    async fn find_conflict<'a>(
        &self,
        endpoint_id: &str,
        display_name_lower: &str,
        external_id: Option<&'a str>,
        exclude_scim_id: Option<&'a str>,
    ) -> Result<Option<GroupRecord>> {
        let mut sql = format!(
            "SELECT {} FROM groups WHERE endpoint_id = ? AND (display_name_lower = ?",
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

        let mut query = sqlx::query_as::<_, GroupRecord>(&sql)
            .bind(endpoint_id)
            .bind(display_name_lower);
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
    ) -> Result<Vec<GroupRecord>> {
        let mut sql = format!("SELECT {} FROM groups WHERE endpoint_id = ?", COLUMNS);
        if let Some(filter) = pushdown {
            sql.push_str(" AND ");
            sql.push_str(&filter.where_clause);
        }
        sql.push_str(" ORDER BY created_at ASC, rowid ASC");

        let mut query = sqlx::query_as::<_, GroupRecord>(&sql).bind(endpoint_id);
        if let Some(filter) = pushdown {
            for binding in &filter.bindings {
                query = query.bind(binding);
            }
        }
        Ok(query.fetch_all(&self.pool).await?)
    }

    async fn update(&self, group: &GroupRecord, members: &[MemberSpec]) -> Result<GroupRecord> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE groups
            SET external_id = ?, display_name = ?, display_name_lower = ?,
                raw_payload = ?, updated_at = ?
            WHERE endpoint_id = ? AND scim_id = ?
            "#,
        )
        .bind(&group.external_id)
        .bind(&group.display_name)
        .bind(group.display_name.to_lowercase())
        .bind(&group.raw_payload)
        .bind(group.updated_at)
        .bind(&group.endpoint_id)
        .bind(&group.scim_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| super::map_unique_violation(e, "A group with this displayName or externalId"))?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(AppError::NotFound(format!(
                "Group {} not found",
                group.scim_id
            )));
        }

        sqlx::query("DELETE FROM group_members WHERE group_id = ?")
            .bind(&group.id)
            .execute(&mut *tx)
            .await?;
        insert_members(&mut tx, &group.id, members).await?;
        tx.commit().await?;

        self.find_by_scim_id(&group.endpoint_id, &group.scim_id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Group not found after update")))
    }

    async fn delete(&self, endpoint_id: &str, scim_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let group = sqlx::query_as::<_, (String,)>(
            "SELECT id FROM groups WHERE endpoint_id = ? AND scim_id = ?",
        )
        .bind(endpoint_id)
        .bind(scim_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((group_id,)) = group else {
            tx.rollback().await?;
            return Ok(false);
        };

        sqlx::query("DELETE FROM group_members WHERE group_id = ?")
            .bind(&group_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM groups WHERE id = ?")
            .bind(&group_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn members_of(&self, group_id: &str) -> Result<Vec<GroupMemberRecord>> {
        let members = sqlx::query_as::<_, GroupMemberRecord>(
            "SELECT group_id, member_id, value, display, member_type
             FROM group_members WHERE group_id = ? ORDER BY rowid ASC",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(members)
    }
}
