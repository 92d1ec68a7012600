//! Request-log (activity) queries

use crate::api::ScimJson;
use crate::domain::RequestLogQuery;
use crate::error::Result;
use crate::repository::request_log::RequestLogRepository;
use crate::server::AppState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// GET /scim/admin/activity and GET /scim/admin/logs
///
/// Filters: method, status, urlContains, since, until, hasError, search,
/// includeAdmin (default false), hideKeepalive, limit, offset.
pub async fn list_activity(
    State(state): State<AppState>,
    Query(query): Query<RequestLogQuery>,
) -> Result<Response> {
    let (items, total) = state.request_logs.list(&query).await?;
    Ok(ScimJson(json!({
        "total": total,
        "count": items.len(),
        "items": items,
    }))
    .into_response())
}

/// DELETE /scim/admin/logs: purge persisted request logs
pub async fn clear_activity(State(state): State<AppState>) -> Result<Response> {
    let removed = state.request_logs.clear().await?;
    state.logger.info(
        crate::logging::LogCategory::Database,
        None,
        format!("Cleared {} request-log rows", removed),
    );
    Ok(StatusCode::NO_CONTENT.into_response())
}
