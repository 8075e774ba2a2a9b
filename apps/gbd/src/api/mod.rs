//! # GBD HTTP API Module
//!
//! Read-only HTTP front-end over a shared query session, built on axum.
//!
//! ## Endpoints
//!
//! - `GET /` - HTML index page with paginated query results
//! - `GET /query` - Query result as JSON
//! - `GET /getinstances` - Download URLs of the instances matching a query
//! - `GET /file/{hash}` - Raw benchmark file of a hash
//! - `GET /getdatabase[/{name}]` - Catalog file download
//! - `GET /health` - Health check
//!
//! All query endpoints accept `query` and `context` parameters.
//!
//! ## Configuration (Environment Variables)
//!
//! - `GBD_CORS_ORIGINS`: Comma-separated list of allowed origins, or "*" for all (default: localhost only)
//! - `GBD_RATE_LIMIT`: Requests per second (default: `[server] rate_limit`, 0 to disable)

mod handlers;
mod middleware;
mod types;

pub use handlers::{
    database_handler, file_handler, health_handler, index_handler, instances_handler,
    named_database_handler, query_handler,
};
pub use middleware::{create_rate_limiter, get_rate_limit_from_env};
pub use types::{HealthResponse, PAGE_SIZE, QueryParams, QueryResponse, query_to_name};

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::get,
};
use gbd_core::{GbdError, Session};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    /// The session over all configured catalogs. SQLite connections are
    /// not shareable between threads, so access is serialized.
    pub session: Arc<Mutex<Session>>,
    /// Requests per second; `0` disables rate limiting.
    pub rate_limit: u32,
}

impl AppState {
    /// Create new app state with the default rate limit.
    #[must_use]
    pub fn new(session: Session) -> Self {
        Self::with_rate_limit(session, crate::config::DEFAULT_RATE_LIMIT)
    }

    #[must_use]
    pub fn with_rate_limit(session: Session, rate_limit: u32) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            rate_limit,
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Build CORS layer from `GBD_CORS_ORIGINS`.
///
/// - `*`: allows all origins
/// - unset: localhost only
/// - otherwise: comma-separated list of allowed origins
fn build_cors_layer() -> CorsLayer {
    let origins_env = std::env::var("GBD_CORS_ORIGINS").ok();

    match origins_env.as_deref() {
        Some("*") => {
            tracing::warn!("CORS: Allowing ALL origins (GBD_CORS_ORIGINS=*)");
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed_origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => {
                            tracing::info!("CORS: Allowing origin: {}", trimmed);
                            Some(hv)
                        }
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();

            if allowed_origins.is_empty() {
                tracing::warn!(
                    "CORS: No valid origins in GBD_CORS_ORIGINS, defaulting to localhost only"
                );
                build_localhost_cors()
            } else {
                CorsLayer::new()
                    .allow_origin(allowed_origins)
                    .allow_methods([Method::GET, Method::OPTIONS])
                    .allow_headers([header::CONTENT_TYPE])
            }
        }
        None => build_localhost_cors(),
    }
}

/// CORS layer that only allows localhost origins.
fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:5000",
        "http://127.0.0.1:5000",
        "http://localhost:8080",
        "http://127.0.0.1:8080",
    ]
    .into_iter()
    .filter_map(|o| o.parse::<HeaderValue>().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner): tracing, CORS, rate limiting.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer();

    let rate_limiter = if state.rate_limit > 0 {
        tracing::info!("Rate limiting enabled: {} requests/second", state.rate_limit);
        Some(create_rate_limiter(state.rate_limit))
    } else {
        tracing::info!("Rate limiting disabled");
        None
    };

    let mut router = Router::new()
        .route("/", get(handlers::index_handler))
        .route("/health", get(handlers::health_handler))
        .route("/query", get(handlers::query_handler))
        .route("/getinstances", get(handlers::instances_handler))
        .route("/file/{hash}", get(handlers::file_handler))
        .route("/getdatabase", get(handlers::database_handler))
        .route("/getdatabase/{name}", get(handlers::named_database_handler));

    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Serve `state` on `addr` until the process is interrupted.
pub async fn run_server(addr: &str, state: AppState) -> Result<(), GbdError> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| GbdError::Io(format!("Bind failed: {e}")))?;

    tracing::info!("GBD HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await
        .map_err(|e| GbdError::Io(format!("Server error: {e}")))
}
