//! Request-log repository
//!
//! Batch appends run in one transaction and report the rowids they
//! wrote, giving the identifier backfill a stable batch handle. The
//! keepalive suppression happens in SQL so pagination counts stay
//! accurate.

use crate::domain::{NewRequestLog, RequestLog, RequestLogQuery};
use crate::error::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RequestLogRepository: Send + Sync {
    /// Insert a batch in one transaction; returns the rowids in batch order.
    async fn append_batch(&self, batch: &[NewRequestLog]) -> Result<Vec<i64>>;
    async fn set_identifier(&self, id: i64, identifier: &str) -> Result<()>;
    /// Filtered page plus the total row count under the same filters.
    async fn list(&self, query: &RequestLogQuery) -> Result<(Vec<RequestLog>, i64)>;
    async fn clear(&self) -> Result<u64>;
}

pub struct RequestLogRepositoryImpl {
    pool: SqlitePool,
}

impl RequestLogRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

enum Bind {
    Text(String),
    Int(i64),
    Timestamp(chrono::DateTime<chrono::Utc>),
}

/// Entra's liveness probes: GET /Users?filter=… that resolved to no
/// identifier and did not fail.
const KEEPALIVE_PREDICATE: &str = "(method = 'GET' AND url LIKE '%/Users%' \
     AND url LIKE '%?filter=%' AND identifier IS NULL AND status < 400)";

fn build_where(query: &RequestLogQuery) -> (String, Vec<Bind>) {
    let mut conditions: Vec<String> = Vec::new();
    let mut binds: Vec<Bind> = Vec::new();

    if let Some(method) = &query.method {
        conditions.push("method = ?".to_string());
        binds.push(Bind::Text(method.to_uppercase()));
    }
    if let Some(status) = query.status {
        conditions.push("status = ?".to_string());
        binds.push(Bind::Int(status));
    }
    if let Some(fragment) = &query.url_contains {
        conditions.push("url LIKE ?".to_string());
        binds.push(Bind::Text(format!("%{}%", fragment)));
    }
    if let Some(since) = query.since {
        conditions.push("created_at >= ?".to_string());
        binds.push(Bind::Timestamp(since));
    }
    if let Some(until) = query.until {
        conditions.push("created_at <= ?".to_string());
        binds.push(Bind::Timestamp(until));
    }
    match query.has_error {
        Some(true) => conditions.push("error_message IS NOT NULL".to_string()),
        Some(false) => conditions.push("error_message IS NULL".to_string()),
        None => {}
    }
    if let Some(needle) = &query.search {
        conditions.push(
            "(url LIKE ? OR request_body LIKE ? OR response_body LIKE ? \
              OR request_headers LIKE ? OR error_message LIKE ?)"
                .to_string(),
        );
        let pattern = format!("%{}%", needle);
        for _ in 0..5 {
            binds.push(Bind::Text(pattern.clone()));
        }
    }
    if !query.include_admin {
        conditions.push("url NOT LIKE '%/scim/admin%'".to_string());
        conditions.push("url != '/'".to_string());
        conditions.push("url NOT LIKE '/health%'".to_string());
    }
    if query.hide_keepalive {
        conditions.push(format!("NOT {}", KEEPALIVE_PREDICATE));
    }

    let clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };
    (clause, binds)
}

const COLUMNS: &str = "id, method, url, status, duration_ms, request_headers, request_body, \
                       response_headers, response_body, error_message, error_stack, identifier, \
                       created_at";

#[async_trait]
impl RequestLogRepository for RequestLogRepositoryImpl {
    async fn append_batch(&self, batch: &[NewRequestLog]) -> Result<Vec<i64>> {
        let mut ids = Vec::with_capacity(batch.len());
        let mut tx = self.pool.begin().await?;
        for record in batch {
            let result = sqlx::query(
                r#"
                INSERT INTO request_logs (method, url, status, duration_ms, request_headers,
                                          request_body, response_headers, response_body,
                                          error_message, error_stack, identifier, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?)
                "#,
            )
            .bind(&record.method)
            .bind(&record.url)
            .bind(record.status)
            .bind(record.duration_ms)
            .bind(&record.request_headers)
            .bind(&record.request_body)
            .bind(&record.response_headers)
            .bind(&record.response_body)
            .bind(&record.error_message)
            .bind(&record.error_stack)
            .bind(record.created_at)
            .execute(&mut *tx)
            .await?;
            ids.push(result.last_insert_rowid());
        }
        tx.commit().await?;
        Ok(ids)
    }

    async fn set_identifier(&self, id: i64, identifier: &str) -> Result<()> {
        sqlx::query("UPDATE request_logs SET identifier = ? WHERE id = ?")
            .bind(identifier)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self, query: &RequestLogQuery) -> Result<(Vec<RequestLog>, i64)> {
        let (clause, binds) = build_where(query);

        let count_sql = format!("SELECT COUNT(*) FROM request_logs{}", clause);
        let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
        for bind in &binds {
            count_query = match bind {
                Bind::Text(s) => count_query.bind(s.clone()),
                Bind::Int(n) => count_query.bind(*n),
                Bind::Timestamp(t) => count_query.bind(*t),
            };
        }
        let (total,) = count_query.fetch_one(&self.pool).await?;

        let limit = query.limit.unwrap_or(100).clamp(0, 1000);
        let offset = query.offset.unwrap_or(0).max(0);
        let rows_sql = format!(
            "SELECT {} FROM request_logs{} ORDER BY id DESC LIMIT ? OFFSET ?",
            COLUMNS, clause
        );
        let mut rows_query = sqlx::query_as::<_, RequestLog>(&rows_sql);
        for bind in &binds {
            rows_query = match bind {
                Bind::Text(s) => rows_query.bind(s.clone()),
                Bind::Int(n) => rows_query.bind(*n),
                Bind::Timestamp(t) => rows_query.bind(*t),
            };
        }
        let rows = rows_query
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok((rows, total))
    }

    async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM request_logs")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
