//! SCIM Group CRUD handlers

use crate::api::users::{created_response, not_modified, resource_etag, with_etag};
use crate::api::{ListParams, ResourcePath, ScimBody, ScimJson};
use crate::domain::scim::{PatchOp, SearchRequest};
use crate::error::Result;
use crate::logging::RequestContext;
use crate::middleware::EndpointScope;
use crate::server::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::Value;

/// GET /Groups
pub async fn list_groups(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(scope): Extension<EndpointScope>,
    Query(params): Query<ListParams>,
) -> Result<Response> {
    let mut list = state
        .group_service
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

/// POST /Groups/.search
pub async fn search_groups(
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
        .group_service
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

/// POST /Groups
pub async fn create_group(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(scope): Extension<EndpointScope>,
    ScimBody(payload): ScimBody<Value>,
) -> Result<Response> {
    let resource = state
        .group_service
        .create(&ctx, &scope.endpoint, payload, &scope.base_path)
        .await?;
    Ok(created_response(resource))
}

/// GET /Groups/{id}
pub async fn get_group(
    State(state): State<AppState>,
    Extension(_ctx): Extension<RequestContext>,
    Extension(scope): Extension<EndpointScope>,
    Path(ResourcePath { id }): Path<ResourcePath>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
) -> Result<Response> {
    let mut resource = state
        .group_service
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

/// PUT /Groups/{id}
pub async fn replace_group(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(scope): Extension<EndpointScope>,
    Path(ResourcePath { id }): Path<ResourcePath>,
    ScimBody(payload): ScimBody<Value>,
) -> Result<Response> {
    let resource = state
        .group_service
        .replace(&ctx, &scope.endpoint, &id, payload, &scope.base_path)
        .await?;
    let etag = resource_etag(&resource);
    Ok(with_etag(ScimJson(resource).into_response(), &etag))
}

/// PATCH /Groups/{id}: returns the canonical resource, 200
pub async fn patch_group(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(scope): Extension<EndpointScope>,
    Path(ResourcePath { id }): Path<ResourcePath>,
    ScimBody(patch): ScimBody<PatchOp>,
) -> Result<Response> {
    let resource = state
        .group_service
        .patch(&ctx, &scope.endpoint, &id, patch, &scope.base_path)
        .await?;
    let etag = resource_etag(&resource);
    Ok(with_etag(ScimJson(resource).into_response(), &etag))
}

/// DELETE /Groups/{id}
pub async fn delete_group(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(scope): Extension<EndpointScope>,
    Path(ResourcePath { id }): Path<ResourcePath>,
) -> Result<Response> {
    state
        .group_service
        .delete(&ctx, &scope.endpoint, &id)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
