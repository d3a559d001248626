use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Seconds a rejected client is told to wait before retrying.
pub const RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid rate limit settings: {0}")]
    InvalidSettings(String),

    #[error("{0}")]
    RateLimited(String),

    #[error("Invalid authentication credentials")]
    Unauthorized,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::RateLimited(reason) => (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, RETRY_AFTER_SECS.to_string())],
                Json(json!({
                    "detail": reason,
                    "error": "Too Many Requests",
                    "retry_after": RETRY_AFTER_SECS,
                })),
            )
                .into_response(),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Bearer")],
                Json(json!({ "detail": self.to_string() })),
            )
                .into_response(),
            ApiError::InvalidSettings(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "detail": self.to_string() })),
            )
                .into_response(),
        }
    }
}
