//! Content-type enforcement for write operations
//!
//! Write requests must carry `application/json` or
//! `application/scim+json`; anything else is answered with 415 and a
//! SCIM Error body. Responses always carry `application/scim+json`,
//! which the handlers set via `ScimJson`.

use axum::{
    extract::Request,
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub async fn content_type_middleware(request: Request, next: Next) -> Response {
    let method = request.method();
    if method == Method::POST || method == Method::PUT || method == Method::PATCH {
        if let Some(content_type) = request.headers().get(header::CONTENT_TYPE) {
            let mime = content_type
                .to_str()
                .unwrap_or("")
                .split(';')
                .next()
                .unwrap_or("")
                .trim()
                .to_ascii_lowercase();
            if mime != "application/json" && mime != "application/scim+json" {
                let body = json!({
                    "schemas": [crate::error::ERROR_SCHEMA],
                    "status": "415",
                    "detail": format!(
                        "Unsupported content type '{}'; use application/json or application/scim+json",
                        mime
                    ),
                });
                let mut response =
                    (StatusCode::UNSUPPORTED_MEDIA_TYPE, Json(body)).into_response();
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/scim+json;charset=utf-8"),
                );
                return response;
            }
        }
    }
    next.run(request).await
}
