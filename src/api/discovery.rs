//! SCIM discovery endpoints (RFC 7643 §5 / RFC 7644 §4)

use crate::api::ScimJson;
use crate::domain::scim;
use crate::logging::{LogCategory, RequestContext};
use crate::middleware::EndpointScope;
use crate::server::AppState;
use axum::extract::{Extension, State};
use axum::response::IntoResponse;

/// GET /ServiceProviderConfig
pub async fn service_provider_config(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(scope): Extension<EndpointScope>,
) -> impl IntoResponse {
    state.logger.debug(
        LogCategory::ScimDiscovery,
        Some(&ctx),
        "ServiceProviderConfig served",
    );
    ScimJson(scim::service_provider_config(&scope.base_path))
}

/// GET /Schemas
pub async fn schemas(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(scope): Extension<EndpointScope>,
) -> impl IntoResponse {
    state
        .logger
        .debug(LogCategory::ScimDiscovery, Some(&ctx), "Schemas served");
    ScimJson(scim::schemas_document(&scope.base_path))
}

/// GET /ResourceTypes
pub async fn resource_types(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Extension(scope): Extension<EndpointScope>,
) -> impl IntoResponse {
    state.logger.debug(
        LogCategory::ScimDiscovery,
        Some(&ctx),
        "ResourceTypes served",
    );
    ScimJson(scim::resource_types_document(&scope.base_path))
}
