//! Database migrations
//!
//! Idempotent DDL executed at startup. The `display_name_lower` backfill
//! runs unconditionally so databases written before the derived column
//! was introduced get their uniqueness probe populated.

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::info;

const DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS endpoints (
        id            TEXT PRIMARY KEY,
        name          TEXT NOT NULL UNIQUE,
        display_name  TEXT,
        description   TEXT,
        config        TEXT NOT NULL DEFAULT '{}',
        active        INTEGER NOT NULL DEFAULT 1,
        created_at    TEXT NOT NULL,
        updated_at    TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id              TEXT PRIMARY KEY,
        scim_id         TEXT NOT NULL,
        endpoint_id     TEXT NOT NULL,
        external_id     TEXT,
        user_name       TEXT NOT NULL,
        user_name_lower TEXT NOT NULL,
        active          INTEGER NOT NULL DEFAULT 1,
        raw_payload     TEXT NOT NULL DEFAULT '{}',
        created_at      TEXT NOT NULL,
        updated_at      TEXT NOT NULL
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_users_endpoint_scim
     ON users(endpoint_id, scim_id)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_users_endpoint_username
     ON users(endpoint_id, user_name_lower)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_users_endpoint_external
     ON users(endpoint_id, external_id) WHERE external_id IS NOT NULL",
    r#"
    CREATE TABLE IF NOT EXISTS groups (
        id                 TEXT PRIMARY KEY,
        scim_id            TEXT NOT NULL,
        endpoint_id        TEXT NOT NULL,
        external_id        TEXT,
        display_name       TEXT NOT NULL,
        display_name_lower TEXT NOT NULL DEFAULT '',
        raw_payload        TEXT NOT NULL DEFAULT '{}',
        created_at         TEXT NOT NULL,
        updated_at         TEXT NOT NULL
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_groups_endpoint_scim
     ON groups(endpoint_id, scim_id)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_groups_endpoint_external
     ON groups(endpoint_id, external_id) WHERE external_id IS NOT NULL",
    r#"
    CREATE TABLE IF NOT EXISTS group_members (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        group_id    TEXT NOT NULL,
        member_id   TEXT,
        value       TEXT NOT NULL,
        display     TEXT,
        member_type TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_group_members_group ON group_members(group_id)",
    r#"
    CREATE TABLE IF NOT EXISTS request_logs (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        method           TEXT NOT NULL,
        url              TEXT NOT NULL,
        status           INTEGER NOT NULL,
        duration_ms      INTEGER NOT NULL,
        request_headers  TEXT NOT NULL DEFAULT '{}',
        request_body     TEXT,
        response_headers TEXT NOT NULL DEFAULT '{}',
        response_body    TEXT,
        error_message    TEXT,
        error_stack      TEXT,
        identifier       TEXT,
        created_at       TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_request_logs_created ON request_logs(created_at)",
];

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    for statement in DDL {
        sqlx::query(statement).execute(pool).await?;
    }

    // Backfill for rows written before display_name_lower existed, then
    // enforce the uniqueness index it feeds.
    sqlx::query(
        "UPDATE groups SET display_name_lower = lower(display_name)
         WHERE display_name_lower IS NULL OR display_name_lower = ''",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_groups_endpoint_displayname
         ON groups(endpoint_id, display_name_lower)",
    )
    .execute(pool)
    .await?;

    info!("Database migrations applied");
    Ok(())
}

/// Drop all tables. Used by the `reset` CLI command.
pub async fn reset_database(pool: &SqlitePool) -> Result<()> {
    for table in [
        "group_members",
        "groups",
        "users",
        "request_logs",
        "endpoints",
    ] {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
            .execute(pool)
            .await?;
    }
    info!("Database reset: all tables dropped");
    Ok(())
}
