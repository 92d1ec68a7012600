//! Scimgate - SCIM 2.0 provisioning server
//!
//! A Microsoft Entra ID-compatible SCIM 2.0 server with multi-tenant
//! endpoints, a filter/PATCH protocol engine, and a structured
//! observability core (correlated logs, ring buffer, live streaming,
//! request capture).

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod migration;
pub mod repository;
pub mod scim;
pub mod server;
pub mod service;
pub mod telemetry;

// Re-export commonly used types
pub use config::Config;
pub use error::{AppError, Result};
