//! Logger administration: live configuration, ring-buffer queries,
//! SSE streaming and log download.

use crate::api::{ScimBody, ScimJson};
use crate::error::{AppError, Result};
use crate::logging::{LogCategory, LogFormat, LogLevel, RecentQuery};
use crate::server::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// GET /scim/admin/log-config
pub async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    ScimJson(state.logger.config())
}

/// Partial update body for PUT /scim/admin/log-config.
#[derive(Debug, Default, Deserialize)]
pub struct LogConfigUpdate {
    pub level: Option<String>,
    #[serde(rename = "categoryLevels")]
    pub category_levels: Option<HashMap<String, String>>,
    #[serde(rename = "endpointLevels")]
    pub endpoint_levels: Option<HashMap<String, String>>,
    #[serde(rename = "includePayloads")]
    pub include_payloads: Option<bool>,
    #[serde(rename = "includeStackTraces")]
    pub include_stacks: Option<bool>,
    #[serde(rename = "maxPayloadSizeBytes")]
    pub max_payload_size_bytes: Option<usize>,
    pub format: Option<String>,
}

fn parse_level(raw: &str) -> Result<LogLevel> {
    LogLevel::parse(raw)
        .ok_or_else(|| AppError::InvalidValue(format!("Unknown log level '{}'", raw)))
}

fn parse_category(raw: &str) -> Result<LogCategory> {
    LogCategory::parse(raw)
        .ok_or_else(|| AppError::InvalidValue(format!("Unknown log category '{}'", raw)))
}

/// PUT /scim/admin/log-config
pub async fn put_config(
    State(state): State<AppState>,
    ScimBody(update): ScimBody<LogConfigUpdate>,
) -> Result<Response> {
    // Validate up front so a bad key leaves the config untouched.
    let level = update.level.as_deref().map(parse_level).transpose()?;
    let mut category_levels = None;
    if let Some(raw) = &update.category_levels {
        let mut parsed = HashMap::new();
        for (category, level) in raw {
            parse_category(category)?;
            parsed.insert(category.to_ascii_lowercase(), parse_level(level)?);
        }
        category_levels = Some(parsed);
    }
    let mut endpoint_levels = None;
    if let Some(raw) = &update.endpoint_levels {
        let mut parsed = HashMap::new();
        for (endpoint, level) in raw {
            parsed.insert(endpoint.clone(), parse_level(level)?);
        }
        endpoint_levels = Some(parsed);
    }
    let format = match update.format.as_deref() {
        None => None,
        Some("json") => Some(LogFormat::Json),
        Some("pretty") => Some(LogFormat::Pretty),
        Some(other) => {
            return Err(AppError::InvalidValue(format!(
                "Unknown log format '{}'",
                other
            )))
        }
    };

    state.logger.update_config(|config| {
        if let Some(level) = level {
            config.level = level;
        }
        if let Some(category_levels) = category_levels {
            config.category_levels = category_levels;
        }
        if let Some(endpoint_levels) = endpoint_levels {
            config.endpoint_levels = endpoint_levels;
        }
        if let Some(include_payloads) = update.include_payloads {
            config.include_payloads = include_payloads;
        }
        if let Some(include_stacks) = update.include_stacks {
            config.include_stacks = include_stacks;
        }
        if let Some(max) = update.max_payload_size_bytes {
            config.max_payload_size_bytes = max;
        }
        if let Some(format) = format {
            config.format = format;
        }
    });
    Ok(ScimJson(state.logger.config()).into_response())
}

/// PUT /scim/admin/log-config/level/{level}
pub async fn put_global_level(
    State(state): State<AppState>,
    Path(level): Path<String>,
) -> Result<Response> {
    let level = parse_level(&level)?;
    state.logger.update_config(|config| config.level = level);
    Ok(ScimJson(state.logger.config()).into_response())
}

/// PUT /scim/admin/log-config/category/{category}/{level}
pub async fn put_category_level(
    State(state): State<AppState>,
    Path((category, level)): Path<(String, String)>,
) -> Result<Response> {
    let parsed_category = parse_category(&category)?;
    let level = parse_level(&level)?;
    state.logger.update_config(|config| {
        config
            .category_levels
            .insert(parsed_category.as_str().to_string(), level);
    });
    Ok(ScimJson(state.logger.config()).into_response())
}

/// PUT /scim/admin/log-config/endpoint/{id}/{level}
pub async fn put_endpoint_level(
    State(state): State<AppState>,
    Path((endpoint_id, level)): Path<(String, String)>,
) -> Result<Response> {
    let level = parse_level(&level)?;
    state.logger.update_config(|config| {
        config.endpoint_levels.insert(endpoint_id.clone(), level);
    });
    Ok(ScimJson(state.logger.config()).into_response())
}

/// DELETE /scim/admin/log-config/endpoint/{id}
pub async fn delete_endpoint_level(
    State(state): State<AppState>,
    Path(endpoint_id): Path<String>,
) -> Result<Response> {
    state.logger.update_config(|config| {
        config.endpoint_levels.remove(&endpoint_id);
    });
    Ok(ScimJson(state.logger.config()).into_response())
}

/// GET /scim/admin/log-config/recent
pub async fn recent(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> impl IntoResponse {
    let entries = state.logger.recent(&query);
    ScimJson(json!({
        "count": entries.len(),
        "bufferSize": state.logger.buffer_len(),
        "entries": entries,
    }))
}

/// DELETE /scim/admin/log-config/recent
pub async fn clear_recent(State(state): State<AppState>) -> impl IntoResponse {
    state.logger.clear();
    StatusCode::NO_CONTENT
}

/// GET /scim/admin/log-config/stream (Server-Sent Events)
///
/// Emits a `connected` event carrying the active filters, then one
/// `data:` frame per matching entry. The broadcast subscription drops
/// entries for this client only if it lags; disconnecting drops the
/// receiver and thereby unsubscribes.
pub async fn stream(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let min_level = query.level.as_deref().and_then(LogLevel::parse);
    let category = query.category.as_deref().and_then(LogCategory::parse);
    let request_id = query.request_id.clone();
    let endpoint_id = query.endpoint_id.clone();

    let connected = tokio_stream::once(Ok::<_, Infallible>(
        Event::default().event("connected").data(
            json!({
                "filters": {
                    "level": query.level,
                    "category": query.category,
                    "requestId": query.request_id,
                    "endpointId": query.endpoint_id,
                }
            })
            .to_string(),
        ),
    ));

    let live = BroadcastStream::new(state.logger.subscribe()).filter_map(move |received| {
        match received {
            Ok(entry) => {
                if let Some(min) = min_level {
                    if entry.level < min {
                        return None;
                    }
                }
                if let Some(cat) = category {
                    if entry.category != cat {
                        return None;
                    }
                }
                if let Some(ref rid) = request_id {
                    if entry.request_id.as_deref() != Some(rid.as_str()) {
                        return None;
                    }
                }
                if let Some(ref eid) = endpoint_id {
                    if entry.endpoint_id.as_deref() != Some(eid.as_str()) {
                        return None;
                    }
                }
                serde_json::to_string(&entry)
                    .ok()
                    .map(|payload| Ok(Event::default().data(payload)))
            }
            // Lagged receiver: skip what was missed, keep streaming.
            Err(_) => None,
        }
    });

    Sse::new(connected.chain(live)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keep-alive"),
    )
}

#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    pub format: Option<String>,
    pub limit: Option<usize>,
    pub level: Option<String>,
    pub category: Option<String>,
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
    #[serde(rename = "endpointId")]
    pub endpoint_id: Option<String>,
}

/// GET /scim/admin/log-config/download
pub async fn download(
    State(state): State<AppState>,
    Query(params): Query<DownloadParams>,
) -> Result<Response> {
    let query = RecentQuery {
        // Default to the whole buffer for downloads.
        limit: Some(params.limit.unwrap_or(usize::MAX)),
        level: params.level,
        category: params.category,
        request_id: params.request_id,
        endpoint_id: params.endpoint_id,
    };
    let entries = state.logger.recent(&query);
    let timestamp = Utc::now().format("%Y%m%d-%H%M%S");

    let (body, content_type, extension) = match params.format.as_deref() {
        None | Some("json") => (
            serde_json::to_string_pretty(&entries)
                .map_err(|e| AppError::Internal(e.into()))?,
            "application/json",
            "json",
        ),
        Some("ndjson") => {
            let mut lines = String::new();
            for entry in &entries {
                lines.push_str(
                    &serde_json::to_string(entry).map_err(|e| AppError::Internal(e.into()))?,
                );
                lines.push('\n');
            }
            (lines, "application/x-ndjson", "ndjson")
        }
        Some(other) => {
            return Err(AppError::InvalidValue(format!(
                "Unknown download format '{}'",
                other
            )))
        }
    };

    let mut response = (StatusCode::OK, body).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    let disposition = format!(
        "attachment; filename=\"scimgate-logs-{}.{}\"",
        timestamp, extension
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}
