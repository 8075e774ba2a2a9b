//! # Middleware Module
//!
//! Rate limiting for the GBD HTTP front-end.
//!
//! ## Configuration
//!
//! The rate comes from `[server] rate_limit` in `gbd.toml` and is overridden
//! by the `GBD_RATE_LIMIT` environment variable (requests per second,
//! `0` disables limiting).

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Fallback rate when a zero rate reaches the limiter.
const DEFAULT_RPS: NonZeroU32 = NonZeroU32::MIN.saturating_add(99);

// =============================================================================
// RATE LIMITER
// =============================================================================

/// Global rate limiter type alias.
pub type GlobalRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Create a new global rate limiter allowing `requests_per_second`.
pub fn create_rate_limiter(requests_per_second: u32) -> GlobalRateLimiter {
    let rps = NonZeroU32::new(requests_per_second).unwrap_or(DEFAULT_RPS);
    let quota = Quota::per_second(rps);
    Arc::new(RateLimiter::direct(quota))
}

/// Rate limit from `GBD_RATE_LIMIT`, else `configured`.
pub fn get_rate_limit_from_env(configured: u32) -> u32 {
    parse_rate_limit(std::env::var("GBD_RATE_LIMIT").ok().as_deref(), configured)
}

fn parse_rate_limit(value: Option<&str>, configured: u32) -> u32 {
    match value.map(str::trim) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(value = raw, "Ignoring malformed GBD_RATE_LIMIT");
            configured
        }),
        None => configured,
    }
}

/// Rejects requests over the global rate with 429 Too Many Requests.
pub async fn rate_limit_middleware(
    State(limiter): State<GlobalRateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, &'static str)> {
    match limiter.check() {
        Ok(()) => Ok(next.run(request).await),
        Err(_) => {
            tracing::warn!("Rate limit exceeded");
            Err((StatusCode::TOO_MANY_REQUESTS, "Too Many Requests"))
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
