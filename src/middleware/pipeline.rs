//! Outermost request pipeline stage
//!
//! Adopts or assigns `X-Request-Id` (echoed on the response), installs
//! the correlation context, captures request/response payloads for the
//! audit buffer, emits the http log entries, and flags slow requests.
//! SSE responses pass through unbuffered.

use crate::domain::NewRequestLog;
use crate::logging::{LogCategory, LogLevel, RequestContext};
use crate::server::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Handling beyond this takes a WARN entry.
const SLOW_REQUEST_MS: u64 = 2_000;

/// Cap on captured payload text stored per audit row.
const CAPTURE_LIMIT_BYTES: usize = 64 * 1024;

pub async fn pipeline_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let method = request.method().to_string();
    let url = request
        .uri()
        .path_and_query()
        .map(|pq| pq.to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let path = request.uri().path().to_string();

    let ctx = RequestContext::new(request_id.clone(), method.clone(), path);
    let request_headers = headers_to_json(request.headers());

    // Buffer the request body for the audit record. DefaultBodyLimit
    // has already bounded its size.
    let (parts, body) = request.into_parts();
    let request_bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .unwrap_or_default();
    let request_body = capture_text(&request_bytes);
    let mut request = Request::from_parts(parts, Body::from(request_bytes));
    request.extensions_mut().insert(ctx.clone());

    state.logger.emit(
        LogLevel::Debug,
        LogCategory::Http,
        Some(&ctx),
        format!("--> {} {}", method, url),
        None,
        None,
        None,
    );

    let response = next.run(request).await;

    let status = response.status();
    let duration_ms = ctx.elapsed_ms();

    if duration_ms > SLOW_REQUEST_MS {
        state.logger.warn(
            LogCategory::Http,
            Some(&ctx),
            format!("Slow request: {} {} took {}ms", method, url, duration_ms),
        );
    }

    let level = if status.is_server_error() {
        LogLevel::Error
    } else if status.is_client_error() {
        LogLevel::Warn
    } else {
        LogLevel::Info
    };
    state.logger.emit(
        level,
        LogCategory::Http,
        Some(&ctx),
        format!("<-- {} {} {}", method, url, status.as_u16()),
        Some(duration_ms),
        None,
        None,
    );

    // SSE responses pass through unbuffered; capturing an unbounded
    // stream is not possible.
    let is_event_stream = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("text/event-stream"))
        .unwrap_or(false);

    let (mut parts, body) = response.into_parts();
    parts.headers.insert(
        REQUEST_ID_HEADER,
        HeaderValue::from_str(&request_id)
            .unwrap_or_else(|_| HeaderValue::from_static("invalid")),
    );

    if is_event_stream {
        audit(
            &state,
            method,
            url,
            status.as_u16(),
            duration_ms,
            request_headers,
            request_body,
            headers_to_json(&parts.headers),
            None,
        );
        return Response::from_parts(parts, body);
    }

    let response_bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .unwrap_or_default();
    let response_body = capture_text(&response_bytes);

    audit(
        &state,
        method,
        url,
        status.as_u16(),
        duration_ms,
        request_headers,
        request_body,
        headers_to_json(&parts.headers),
        response_body.clone(),
    );

    Response::from_parts(parts, Body::from(response_bytes))
}

#[allow(clippy::too_many_arguments)]
fn audit(
    state: &AppState,
    method: String,
    url: String,
    status: u16,
    duration_ms: u64,
    request_headers: String,
    request_body: Option<String>,
    response_headers: String,
    response_body: Option<String>,
) {
    let error_message = if status >= 400 {
        response_body
            .as_deref()
            .and_then(|b| serde_json::from_str::<Value>(b).ok())
            .and_then(|v| v.get("detail").and_then(Value::as_str).map(String::from))
            .or_else(|| Some(format!("HTTP {}", status)))
    } else {
        None
    };

    state.request_log_buffer.enqueue(NewRequestLog {
        method,
        url,
        status: status as i64,
        duration_ms: duration_ms as i64,
        request_headers,
        request_body,
        response_headers,
        response_body,
        error_message,
        error_stack: None,
        created_at: Utc::now(),
    });
}

/// Headers as a JSON object string, authorization redacted.
fn headers_to_json(headers: &HeaderMap) -> String {
    let mut map = serde_json::Map::new();
    for (name, value) in headers {
        let value = if *name == header::AUTHORIZATION {
            "[REDACTED]".to_string()
        } else {
            value.to_str().unwrap_or("<binary>").to_string()
        };
        map.insert(name.as_str().to_string(), json!(value));
    }
    Value::Object(map).to_string()
}

fn capture_text(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(bytes);
    if text.len() > CAPTURE_LIMIT_BYTES {
        let mut cut = CAPTURE_LIMIT_BYTES;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        Some(text[..cut].to_string())
    } else {
        Some(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_to_json_redacts_authorization() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer x"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let encoded = headers_to_json(&headers);
        let parsed: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(parsed["authorization"], "[REDACTED]");
        assert_eq!(parsed["content-type"], "application/json");
    }

    #[test]
    fn test_capture_text_limits() {
        assert_eq!(capture_text(b""), None);
        assert_eq!(capture_text(b"abc").as_deref(), Some("abc"));
        let big = vec![b'x'; CAPTURE_LIMIT_BYTES + 10];
        assert_eq!(capture_text(&big).unwrap().len(), CAPTURE_LIMIT_BYTES);
    }
}
