use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use super::rate_limit::RateLimiters;
use crate::utils::error::ApiError;

/// Per-IP rate limiting at the edge. User and tenant scopes are enforced in
/// the handlers once the request body names them.
pub async fn ip_rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let limiters = request
        .extensions()
        .get::<Arc<RateLimiters>>()
        .cloned()
        .ok_or_else(|| ApiError::Internal("rate limiters not configured".to_string()))?;

    let ip = addr.ip().to_string();
    limiters.check_ip(&ip)?;
    debug!(%ip, "ip within rate limit");

    Ok(next.run(request).await)
}
