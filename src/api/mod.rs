//! HTTP API handlers and shared response types

pub mod activity;
pub mod discovery;
pub mod endpoints;
pub mod groups;
pub mod health;
pub mod log_admin;
pub mod users;
pub mod version;

use crate::domain::scim::ListResponse;
use crate::scim::projection::{apply_projection, parse_attr_list};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wrapper that serializes `T` as JSON with `Content-Type: application/scim+json`.
pub struct ScimJson<T>(pub T);

impl<T: Serialize> IntoResponse for ScimJson<T> {
    fn into_response(self) -> Response {
        let mut response = axum::Json(self.0).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/scim+json;charset=utf-8"),
        );
        response
    }
}

/// JSON body extractor whose rejection is a SCIM `invalidSyntax` error
/// instead of axum's plain-text rejection.
pub struct ScimBody<T>(pub T);

impl<S, T> axum::extract::FromRequest<S> for ScimBody<T>
where
    T: serde::de::DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = crate::error::AppError;

    async fn from_request(
        req: axum::extract::Request,
        state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let axum::Json(value) = axum::Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| crate::error::AppError::InvalidSyntax(rejection.body_text()))?;
        Ok(ScimBody(value))
    }
}

/// Path segment for `/Users/{id}` and `/Groups/{id}`. A struct rather
/// than `Path<String>` so the tenant-scoped routes, which also carry
/// `{endpointId}`, extract cleanly.
#[derive(Debug, Deserialize)]
pub struct ResourcePath {
    pub id: String,
}

/// Query parameters shared by the list/GET resource endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub filter: Option<String>,
    #[serde(rename = "startIndex")]
    pub start_index: Option<i64>,
    pub count: Option<i64>,
    pub attributes: Option<String>,
    #[serde(rename = "excludedAttributes")]
    pub excluded_attributes: Option<String>,
}

impl ListParams {
    fn attr_lists(&self) -> (Option<Vec<String>>, Option<Vec<String>>) {
        (
            self.attributes.as_deref().map(parse_attr_list),
            self.excluded_attributes.as_deref().map(parse_attr_list),
        )
    }

    /// Projection applied post-serialization to a single resource.
    pub fn project(&self, resource: &mut Value) {
        let (attributes, excluded) = self.attr_lists();
        apply_projection(resource, attributes.as_deref(), excluded.as_deref());
    }

    /// Projection applied to every resource of a list response.
    pub fn project_list(&self, list: &mut ListResponse) {
        let (attributes, excluded) = self.attr_lists();
        if attributes.is_none() && excluded.is_none() {
            return;
        }
        for resource in &mut list.resources {
            apply_projection(resource, attributes.as_deref(), excluded.as_deref());
        }
    }
}
