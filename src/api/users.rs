//! SCIM User CRUD handlers

use crate::api::{ListParams, ResourcePath, ScimBody, ScimJson};
use crate::domain::scim::{PatchOp, SearchRequest};
use crate::error::Result;
use crate::logging::RequestContext;
use crate::middleware::EndpointScope;
use crate::server::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::Value;

/// GET /Users: list with optional filter and projection
pub async fn list_users(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(scope): Extension<EndpointScope>,
    Query(params): Query<ListParams>,
) -> Result<Response> {
    let mut list = state
        .user_service
        .list(
            &ctx,
            &scope.endpoint,
            params.filter.as_deref(),
            params.start_index,
            params.count,
            &scope.base_path,
        )
        .await?;
    params.project_list(&mut list);
    Ok(ScimJson(list).into_response())
}

/// POST /Users/.search: list via POST body (RFC 7644 §3.4.3)
pub async fn search_users(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(scope): Extension<EndpointScope>,
    ScimBody(search): ScimBody<SearchRequest>,
) -> Result<Response> {
    let params = ListParams {
        filter: search.filter,
        start_index: search.start_index,
        count: search.count,
        attributes: search.attributes.map(|a| a.join(",")),
        excluded_attributes: search.excluded_attributes.map(|a| a.join(",")),
    };
    let mut list = state
        .user_service
        .list(
            &ctx,
            &scope.endpoint,
            params.filter.as_deref(),
            params.start_index,
            params.count,
            &scope.base_path,
        )
        .await?;
    params.project_list(&mut list);
    Ok(ScimJson(list).into_response())
}

/// POST /Users
pub async fn create_user(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(scope): Extension<EndpointScope>,
    ScimBody(payload): ScimBody<Value>,
) -> Result<Response> {
    let resource = state
        .user_service
        .create(&ctx, &scope.endpoint, payload, &scope.base_path)
        .await?;
    Ok(created_response(resource))
}

/// GET /Users/{id}: conditional fetch with weak-ETag support
pub async fn get_user(
    State(state): State<AppState>,
    Extension(_ctx): Extension<RequestContext>,
    Extension(scope): Extension<EndpointScope>,
    Path(ResourcePath { id }): Path<ResourcePath>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
) -> Result<Response> {
    let mut resource = state
        .user_service
        .get(&scope.endpoint, &id, &scope.base_path)
        .await?;
    let etag = resource_etag(&resource);

    if let Some(if_none_match) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    {
        if if_none_match == etag {
            return Ok(not_modified(&etag));
        }
    }

    params.project(&mut resource);
    Ok(with_etag(ScimJson(resource).into_response(), &etag))
}

/// PUT /Users/{id}: full replacement
pub async fn replace_user(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(scope): Extension<EndpointScope>,
    Path(ResourcePath { id }): Path<ResourcePath>,
    ScimBody(payload): ScimBody<Value>,
) -> Result<Response> {
    let resource = state
        .user_service
        .replace(&ctx, &scope.endpoint, &id, payload, &scope.base_path)
        .await?;
    let etag = resource_etag(&resource);
    Ok(with_etag(ScimJson(resource).into_response(), &etag))
}

/// PATCH /Users/{id}
pub async fn patch_user(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(scope): Extension<EndpointScope>,
    Path(ResourcePath { id }): Path<ResourcePath>,
    ScimBody(patch): ScimBody<PatchOp>,
) -> Result<Response> {
    let resource = state
        .user_service
        .patch(&ctx, &scope.endpoint, &id, patch, &scope.base_path)
        .await?;
    let etag = resource_etag(&resource);
    Ok(with_etag(ScimJson(resource).into_response(), &etag))
}

/// DELETE /Users/{id}: hard delete, 204
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(scope): Extension<EndpointScope>,
    Path(ResourcePath { id }): Path<ResourcePath>,
) -> Result<Response> {
    state
        .user_service
        .delete(&ctx, &scope.endpoint, &id)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub(crate) fn resource_etag(resource: &Value) -> String {
    resource["meta"]["version"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

pub(crate) fn with_etag(mut response: Response, etag: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(etag) {
        response.headers_mut().insert(header::ETAG, value);
    }
    response
}

pub(crate) fn not_modified(etag: &str) -> Response {
    with_etag(StatusCode::NOT_MODIFIED.into_response(), etag)
}

pub(crate) fn created_response(resource: Value) -> Response {
    let location = resource["meta"]["location"]
        .as_str()
        .map(String::from);
    let etag = resource_etag(&resource);
    let mut response = (StatusCode::CREATED, ScimJson(resource)).into_response();
    if let Some(location) = location {
        if let Ok(value) = HeaderValue::from_str(&location) {
            response.headers_mut().insert(header::LOCATION, value);
        }
    }
    with_etag(response, &etag)
}
