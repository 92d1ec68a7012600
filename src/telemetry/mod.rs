//! Process-level tracing setup
//!
//! Covers framework and lifecycle logs (startup, migrations, shutdown,
//! tower_http). Request-scoped structured logging is the `logging`
//! module's job and is configured separately at runtime.

use crate::config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub fn init(config: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "scimgate=info,tower_http=warn".into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if config.log.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
