//! Tenant admin API

use crate::api::{ScimBody, ScimJson};
use crate::domain::{CreateEndpointInput, Endpoint, UpdateEndpointInput};
use crate::error::Result;
use crate::logging::RequestContext;
use crate::server::AppState;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// The config blob is stored as text; expose it as JSON on the wire.
fn endpoint_dto(endpoint: &Endpoint) -> serde_json::Value {
    json!({
        "id": endpoint.id,
        "name": endpoint.name,
        "displayName": endpoint.display_name,
        "description": endpoint.description,
        "config": endpoint.config().as_value(),
        "active": endpoint.active,
        "createdAt": endpoint.created_at,
        "updatedAt": endpoint.updated_at,
    })
}

/// POST /scim/admin/endpoints
pub async fn create_endpoint(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    ScimBody(input): ScimBody<CreateEndpointInput>,
) -> Result<Response> {
    let endpoint = state.endpoint_service.create(&ctx, input).await?;
    Ok((StatusCode::CREATED, ScimJson(endpoint_dto(&endpoint))).into_response())
}

/// GET /scim/admin/endpoints
pub async fn list_endpoints(State(state): State<AppState>) -> Result<Response> {
    let endpoints = state.endpoint_service.list().await?;
    let dtos: Vec<_> = endpoints.iter().map(endpoint_dto).collect();
    Ok(ScimJson(dtos).into_response())
}

/// GET /scim/admin/endpoints/{id}
pub async fn get_endpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response> {
    let endpoint = state.endpoint_service.get(&id).await?;
    Ok(ScimJson(endpoint_dto(&endpoint)).into_response())
}

/// GET /scim/admin/endpoints/by-name/{name}
pub async fn get_endpoint_by_name(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response> {
    let endpoint = state.endpoint_service.get_by_name(&name).await?;
    Ok(ScimJson(endpoint_dto(&endpoint)).into_response())
}

/// GET /scim/admin/endpoints/{id}/stats
pub async fn endpoint_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response> {
    let stats = state.endpoint_service.stats(&id).await?;
    Ok(ScimJson(stats).into_response())
}

/// PATCH /scim/admin/endpoints/{id}
pub async fn update_endpoint(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    ScimBody(input): ScimBody<UpdateEndpointInput>,
) -> Result<Response> {
    let endpoint = state.endpoint_service.update(&ctx, &id, input).await?;
    Ok(ScimJson(endpoint_dto(&endpoint)).into_response())
}

/// DELETE /scim/admin/endpoints/{id}: cascades to owned resources
pub async fn delete_endpoint(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Response> {
    state.endpoint_service.delete(&ctx, &id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
