use axum::{
    Json, Router,
    extract::{Path, Request, State},
    http::header,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::error::ApiError;
use crate::ratelimit::{ClientStats, GlobalStats};
use crate::server::AppState;

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/stats", get(global_stats))
        .route("/clients/:client_id", get(client_stats))
        .route("/clients/:client_id/reset", post(reset_client))
        .route("/settings", put(update_settings))
        .route_layer(middleware::from_fn_with_state(state, require_admin))
}

async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let expected = state
        .config
        .server
        .admin_token
        .as_deref()
        .ok_or(ApiError::Unauthorized)?;

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if provided != Some(expected) {
        warn!("Rejected admin request to {}", request.uri().path());
        return Err(ApiError::Unauthorized);
    }

    Ok(next.run(request).await)
}

async fn global_stats(State(state): State<AppState>) -> Json<GlobalStats> {
    Json(state.limiter.global_stats())
}

async fn client_stats(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Json<ClientStats> {
    Json(state.limiter.client_stats(&client_id))
}

async fn reset_client(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> impl IntoResponse {
    state.limiter.reset_client(&client_id);
    state.metrics.inc_resets();
    Json(json!({ "message": format!("Rate limiting reset for client: {}", client_id) }))
}

/// Partial update of the limiter settings. Absent fields keep their value.
#[derive(Debug, Deserialize)]
struct SettingsUpdate {
    per_minute: Option<u32>,
    per_hour: Option<u32>,
    per_day: Option<u32>,
    test_mode: Option<bool>,
}

async fn update_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<GlobalStats>, ApiError> {
    let mut settings = state.limiter.settings();
    if let Some(per_minute) = update.per_minute {
        settings.per_minute = per_minute;
    }
    if let Some(per_hour) = update.per_hour {
        settings.per_hour = per_hour;
    }
    if let Some(per_day) = update.per_day {
        settings.per_day = per_day;
    }
    if let Some(test_mode) = update.test_mode {
        settings.test_mode = test_mode;
    }

    state.limiter.update_settings(settings)?;
    Ok(Json(state.limiter.global_stats()))
}
