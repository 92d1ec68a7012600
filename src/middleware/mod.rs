//! Request pipeline middleware

pub mod auth;
pub mod content_type;
pub mod endpoint_scope;
pub mod pipeline;

pub use auth::auth_middleware;
pub use content_type::content_type_middleware;
pub use endpoint_scope::{
    resolve_default_endpoint, resolve_path_endpoint, EndpointScope,
};
pub use pipeline::pipeline_middleware;
