//! WebAPI - REST API Endpoints
//!
//! ## Responsibilities
//!
//! - HTTP API routes
//! - Request validation
//! - Response formatting (`{"ok": true, "data": ...}`)

mod lifecycle_routes;
mod routes;

pub use lifecycle_routes::lifecycle_routes;
pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let devices = state.registry.list().await.len();
    let flagged = state.device_status.get_flagged_devices().await;

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "polling": state.polling.is_running().await,
        "devices": devices,
        "flagged_devices": flagged,
    }))
}

fn ok_response<T: serde::Serialize>(data: T) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "data": data
    }))
}
