//! Business logic services

pub mod endpoint;
pub mod group;
pub mod request_log;
pub mod user;

pub use endpoint::EndpointService;
pub use group::GroupService;
pub use request_log::{derive_identifier, RequestLogBuffer};
pub use user::UserService;
