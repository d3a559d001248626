//! Inbound rate-limit gate for the HTTP router.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;

use crate::error::ApiError;
use crate::ratelimit::{client_identity, ClientStats, Window};
use crate::server::AppState;

/// Paths that bypass rate limiting. Matched exactly.
pub const EXEMPT_PATHS: [&str; 5] = ["/health", "/", "/docs", "/redoc", "/openapi.json"];

const LIMIT_HEADERS: [(Window, &str, &str); 3] = [
    (Window::Minute, "x-ratelimit-limit-minute", "x-ratelimit-remaining-minute"),
    (Window::Hour, "x-ratelimit-limit-hour", "x-ratelimit-remaining-hour"),
    (Window::Day, "x-ratelimit-limit-day", "x-ratelimit-remaining-day"),
];

pub fn is_exempt(path: &str) -> bool {
    EXEMPT_PATHS.contains(&path)
}

pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if is_exempt(request.uri().path()) {
        state.metrics.inc_exempt();
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client_id = client_identity(request.headers(), peer);

    if let Some(reason) = state.limiter.check(&client_id).reason() {
        state.metrics.inc_rejected();
        return ApiError::RateLimited(reason).into_response();
    }
    state.metrics.inc_admitted();

    let mut response = next.run(request).await;

    // Stats are read after the handler so they include this request.
    let stats = state.limiter.client_stats(&client_id);
    insert_limit_headers(response.headers_mut(), &stats);

    response
}

fn insert_limit_headers(headers: &mut HeaderMap, stats: &ClientStats) {
    for (window, limit_name, remaining_name) in LIMIT_HEADERS {
        let limit = stats.limits.for_window(window);
        let remaining = (limit as usize).saturating_sub(stats.requests_in(window));
        headers.insert(HeaderName::from_static(limit_name), HeaderValue::from(limit));
        headers.insert(HeaderName::from_static(remaining_name), HeaderValue::from(remaining));
    }
}
