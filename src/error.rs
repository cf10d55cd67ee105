//! Error handling for the turnstile bridge

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
///
/// Device-side failures are not represented here: the gateway reports them
/// as `GatewayFault` values so a failing controller never aborts a poll
/// cycle. What remains are caller mistakes and storage failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Database error (storage unavailable, query failure)
    #[error("Database error: {0}")]
    Database(String),

    /// Device call failed after all fallbacks
    #[error("Device error ({device_id}): {message}")]
    Device { device_id: String, message: String },

    /// SQLx database error
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::Database(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "DATABASE_ERROR",
                msg.clone(),
            ),
            Error::Device { device_id, message } => (
                StatusCode::BAD_GATEWAY,
                "DEVICE_ERROR",
                format!("Device {}: {}", device_id, message),
            ),
            Error::Sqlx(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "DATABASE_ERROR",
                e.to_string(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "ok": false,
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
