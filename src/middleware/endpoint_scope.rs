//! Tenant resolution
//!
//! SCIM resource routes exist twice: unscoped (`/scim/v2/…`, backed by
//! the seeded `default` endpoint) and tenant-scoped
//! (`/scim/endpoints/{endpointId}/…`). Both install an `EndpointScope`
//! into the request extensions and tag the correlation context with the
//! endpoint id so per-endpoint log overrides apply.

use crate::domain::Endpoint;
use crate::error::AppError;
use crate::logging::RequestContext;
use crate::server::AppState;
use crate::service::endpoint::DEFAULT_ENDPOINT_NAME;
use axum::{
    extract::{Path, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;

/// Resolved tenant for the current request.
#[derive(Debug, Clone)]
pub struct EndpointScope {
    pub endpoint: Endpoint,
    /// Path prefix used for `meta.location` and member `$ref`s.
    pub base_path: String,
}

fn install(request: &mut Request, endpoint: Endpoint, base_path: String) {
    if let Some(ctx) = request.extensions_mut().get_mut::<RequestContext>() {
        ctx.endpoint_id = Some(endpoint.id.clone());
    }
    request.extensions_mut().insert(EndpointScope {
        endpoint,
        base_path,
    });
}

pub async fn resolve_default_endpoint(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    match state
        .endpoint_service
        .get_by_name(DEFAULT_ENDPOINT_NAME)
        .await
    {
        Ok(endpoint) => {
            install(&mut request, endpoint, "/scim/v2".to_string());
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

pub async fn resolve_path_endpoint(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(endpoint_id) = params.get("endpointId").cloned() else {
        return AppError::NotFound("Endpoint not specified".to_string()).into_response();
    };
    match state.endpoint_service.get(&endpoint_id).await {
        Ok(endpoint) => {
            let base_path = format!("/scim/endpoints/{}", endpoint.id);
            install(&mut request, endpoint, base_path);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}
