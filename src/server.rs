use axum::{
    Json, Router,
    http::HeaderValue,
    middleware,
    response::IntoResponse,
    routing::get,
    extract::State,
};
use serde_json::json;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::{Context, Result};

use crate::admin;
use crate::config::Config;
use crate::metrics::Metrics;
use crate::middleware::rate_limit;
use crate::ratelimit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<RateLimiter>,
    pub metrics: Arc<Metrics>,
    pub config: Config,
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .nest("/api/v1/admin/rate-limit", admin::routes(state.clone()))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn run(config: Config, limiter: Arc<RateLimiter>, metrics: Arc<Metrics>) -> Result<()> {
    let addr: SocketAddr = config
        .server
        .bind_addr
        .parse()
        .with_context(|| format!("Invalid bind address: {}", config.server.bind_addr))?;

    let app = router(AppState { limiter, metrics, config });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}

async fn root(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "message": state.config.server.app_name,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
