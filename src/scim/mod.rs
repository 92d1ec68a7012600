//! SCIM protocol engine: filter parsing/evaluation, PATCH path
//! resolution, attribute projection, and JSON value helpers.

pub mod filter;
pub mod patch;
pub mod projection;
pub mod value;
