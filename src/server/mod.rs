//! Server initialization and routing

use crate::api;
use crate::config::{Config, CorsConfig, DatabaseConfig};
use crate::logging::{Logger, LoggerConfig};
use crate::middleware::{
    auth_middleware, content_type_middleware, pipeline_middleware, resolve_default_endpoint,
    resolve_path_endpoint,
};
use crate::repository::{
    EndpointRepositoryImpl, GroupRepositoryImpl, RequestLogRepository, RequestLogRepositoryImpl,
    UserRepositoryImpl,
};
use crate::service::{EndpointService, GroupService, RequestLogBuffer, UserService};
use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post, put},
    Router,
};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: SqlitePool,
    pub logger: Logger,
    pub endpoint_service: Arc<EndpointService<EndpointRepositoryImpl>>,
    pub user_service: Arc<UserService<UserRepositoryImpl>>,
    pub group_service: Arc<GroupService<GroupRepositoryImpl, UserRepositoryImpl>>,
    pub request_logs: Arc<RequestLogRepositoryImpl>,
    pub request_log_buffer: RequestLogBuffer,
}

impl AppState {
    /// Wire repositories, services and the request-log buffer. The
    /// returned handle completes after the buffer's final flush.
    pub fn build(config: Config, pool: SqlitePool, logger: Logger) -> (Self, JoinHandle<()>) {
        let endpoint_repo = Arc::new(EndpointRepositoryImpl::new(pool.clone()));
        let user_repo = Arc::new(UserRepositoryImpl::new(pool.clone()));
        let group_repo = Arc::new(GroupRepositoryImpl::new(pool.clone()));
        let request_logs = Arc::new(RequestLogRepositoryImpl::new(pool.clone()));

        let (request_log_buffer, buffer_handle) = RequestLogBuffer::spawn(
            request_logs.clone() as Arc<dyn RequestLogRepository>,
            logger.clone(),
        );

        let state = Self {
            config: Arc::new(config),
            db: pool,
            endpoint_service: Arc::new(EndpointService::new(endpoint_repo, logger.clone())),
            user_service: Arc::new(UserService::new(user_repo.clone(), logger.clone())),
            group_service: Arc::new(GroupService::new(group_repo, user_repo, logger.clone())),
            request_logs,
            request_log_buffer,
            logger,
        };
        (state, buffer_handle)
    }
}

/// SQLite pool with WAL mode and a busy timeout tuned for the
/// single-writer access pattern.
pub async fn create_pool(config: &DatabaseConfig) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.url)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(10))
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Routes shared by the default (`/scim/v2`) and tenant-scoped
/// (`/scim/endpoints/{endpointId}`) surfaces.
fn scim_resource_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/Users",
            get(api::users::list_users).post(api::users::create_user),
        )
        .route("/Users/.search", post(api::users::search_users))
        .route(
            "/Users/{id}",
            get(api::users::get_user)
                .put(api::users::replace_user)
                .patch(api::users::patch_user)
                .delete(api::users::delete_user),
        )
        .route(
            "/Groups",
            get(api::groups::list_groups).post(api::groups::create_group),
        )
        .route("/Groups/.search", post(api::groups::search_groups))
        .route(
            "/Groups/{id}",
            get(api::groups::get_group)
                .put(api::groups::replace_group)
                .patch(api::groups::patch_group)
                .delete(api::groups::delete_group),
        )
        .route(
            "/ServiceProviderConfig",
            get(api::discovery::service_provider_config),
        )
        .route("/Schemas", get(api::discovery::schemas))
        .route("/ResourceTypes", get(api::discovery::resource_types))
}

fn admin_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/endpoints",
            post(api::endpoints::create_endpoint).get(api::endpoints::list_endpoints),
        )
        .route(
            "/endpoints/{id}",
            get(api::endpoints::get_endpoint)
                .patch(api::endpoints::update_endpoint)
                .delete(api::endpoints::delete_endpoint),
        )
        .route(
            "/endpoints/by-name/{name}",
            get(api::endpoints::get_endpoint_by_name),
        )
        .route("/endpoints/{id}/stats", get(api::endpoints::endpoint_stats))
        .route(
            "/log-config",
            get(api::log_admin::get_config).put(api::log_admin::put_config),
        )
        .route(
            "/log-config/level/{level}",
            put(api::log_admin::put_global_level),
        )
        .route(
            "/log-config/category/{category}/{level}",
            put(api::log_admin::put_category_level),
        )
        .route(
            "/log-config/endpoint/{id}/{level}",
            put(api::log_admin::put_endpoint_level),
        )
        .route(
            "/log-config/endpoint/{id}",
            delete(api::log_admin::delete_endpoint_level),
        )
        .route(
            "/log-config/recent",
            get(api::log_admin::recent).delete(api::log_admin::clear_recent),
        )
        .route("/log-config/stream", get(api::log_admin::stream))
        .route("/log-config/download", get(api::log_admin::download))
        .route("/activity", get(api::activity::list_activity))
        .route(
            "/logs",
            get(api::activity::list_activity).delete(api::activity::clear_activity),
        )
        .route("/version", get(api::version::version))
}

/// Build the full application router.
pub fn build_router(state: AppState) -> Router {
    let default_scope = scim_resource_routes().layer(from_fn_with_state(
        state.clone(),
        resolve_default_endpoint,
    ));
    let tenant_scope =
        scim_resource_routes().layer(from_fn_with_state(state.clone(), resolve_path_endpoint));

    let protected = Router::new()
        .nest("/scim/v2", default_scope)
        .nest("/scim/endpoints/{endpointId}", tenant_scope)
        .nest("/scim/admin", admin_routes())
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(protected)
        .route("/health", get(api::health::health))
        .layer(from_fn(content_type_middleware))
        .layer(TimeoutLayer::new(Duration::from_secs(
            state.config.request_timeout_secs,
        )))
        .layer(from_fn_with_state(state.clone(), pipeline_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(&state.config.cors))
        .layer(DefaultBodyLimit::max(state.config.body_limit_bytes))
        .with_state(state)
}

fn build_cors_layer(config: &CorsConfig) -> CorsLayer {
    if config.allowed_origins.len() == 1 && config.allowed_origins[0] == "*" {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// Run the HTTP server until a shutdown signal arrives, then flush the
/// request-log buffer.
pub async fn run(config: Config) -> Result<()> {
    let pool = create_pool(&config.database).await?;
    crate::migration::run_migrations(&pool).await?;

    let logger = Logger::new(
        LoggerConfig::from_app_config(&config.log),
        config.log.buffer_capacity,
    );
    let addr = config.http_addr();

    if config.cors.allowed_origins.len() == 1 && config.cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS is configured with wildcard (*). Set CORS_ORIGINS for production.");
    }
    if config.auth.shared_secret.is_none() && config.auth.jwt_secret.is_none() {
        tracing::warn!(
            "No SCIM_SHARED_SECRET or JWT_SECRET configured; all bearer tokens will be rejected."
        );
    }

    let (state, buffer_handle) = AppState::build(config, pool, logger);
    state.endpoint_service.ensure_default().await?;

    let app = build_router(state.clone());
    let listener = TcpListener::bind(&addr).await?;
    info!("HTTP server started on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Dropping the state releases the last buffer sender; the drain
    // task then performs its final flush.
    drop(state);
    let _ = buffer_handle.await;
    info!("Request-log buffer flushed; shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, starting graceful shutdown");
}
