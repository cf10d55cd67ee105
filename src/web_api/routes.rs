//! API Routes
//!
//! ## Endpoints
//! - GET /api/devices - Registry with tracked status
//! - GET /api/devices/:id/info - Device information
//! - POST /api/devices/:id/poll - Poll events now (optional start/end)
//! - POST /api/devices/:id/relay - Open/close door relay
//! - PUT /api/devices/:id/users - Provision a user
//! - PUT /api/devices/:id/webhook-target - Point event push at a URL
//! - POST /api/webhooks/access-events - Device event push intake

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, Query, State},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;

use super::{lifecycle_routes, ok_response};
use crate::device_gateway::{Device, DeviceSummary, GatewayFault, UserProvision};
use crate::error::{Error, Result};
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Devices
        .route("/api/devices", get(list_devices))
        .route("/api/devices/:id/info", get(get_device_info))
        .route("/api/devices/:id/poll", post(poll_device))
        .route("/api/devices/:id/relay", post(control_relay))
        .route("/api/devices/:id/users", put(set_user))
        .route("/api/devices/:id/webhook-target", put(configure_webhook_target))
        // Push intake
        .route("/api/webhooks/access-events", post(receive_access_event))
        .merge(lifecycle_routes())
        .with_state(state)
}

// ========================================
// Request types
// ========================================

#[derive(Debug, Deserialize)]
pub struct PollParams {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct RelayRequest {
    pub open: bool,
}

#[derive(Debug, Deserialize)]
pub struct WebhookTargetRequest {
    pub url: String,
}

// ========================================
// Handlers
// ========================================

async fn list_devices(State(state): State<AppState>) -> impl IntoResponse {
    let mut devices = Vec::new();
    for device in state.registry.list().await {
        let status = state.device_status.get_entry(&device.id).await;
        devices.push(json!({
            "device": DeviceSummary::from(&device),
            "status": status,
        }));
    }
    ok_response(devices)
}

async fn get_device_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response> {
    let device = find_device(&state, &id).await?;
    let outcome = state.gateway.get_device_info(&device).await;
    let info = track(&state, &device, outcome).await?;
    Ok(ok_response(info).into_response())
}

async fn poll_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<PollParams>,
) -> Result<Response> {
    let result = state
        .polling
        .poll_device_events(&id, params.start, params.end)
        .await?;
    Ok(ok_response(result).into_response())
}

async fn control_relay(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RelayRequest>,
) -> Result<Response> {
    let device = find_device(&state, &id).await?;
    let outcome = state.gateway.control_relay(&device, req.open).await;
    track(&state, &device, outcome).await?;
    Ok(ok_response(json!({ "device_id": id, "open": req.open })).into_response())
}

async fn set_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(user): Json<UserProvision>,
) -> Result<Response> {
    if user.id.trim().is_empty() {
        return Err(Error::Validation("user id is required".to_string()));
    }
    if user.valid_to <= user.valid_from {
        return Err(Error::Validation(
            "valid_to must be after valid_from".to_string(),
        ));
    }

    let device = find_device(&state, &id).await?;
    let outcome = state.gateway.set_user(&device, &user).await;
    track(&state, &device, outcome).await?;
    Ok(ok_response(json!({ "device_id": id, "user_id": user.id })).into_response())
}

async fn configure_webhook_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<WebhookTargetRequest>,
) -> Result<Response> {
    let device = find_device(&state, &id).await?;
    let outcome = state.gateway.configure_webhook_target(&device, &req.url).await;
    track(&state, &device, outcome).await?;
    Ok(ok_response(json!({ "device_id": id, "url": req.url })).into_response())
}

/// Device push intake. The peer address identifies the device.
async fn receive_access_event(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Result<Response> {
    let source = peer.ip().to_string();
    let ack = state.ingester.ingest_webhook_payload(&body, &source).await?;
    Ok(ok_response(ack).into_response())
}

// ========================================
// Helpers
// ========================================

async fn find_device(state: &AppState, id: &str) -> Result<Device> {
    state
        .registry
        .get(id)
        .await
        .ok_or_else(|| Error::NotFound(format!("Device {} not found", id)))
}

/// Record the call outcome in the status tracker and map a fault to an API error
async fn track<T>(
    state: &AppState,
    device: &Device,
    outcome: std::result::Result<T, GatewayFault>,
) -> Result<T> {
    match outcome {
        Ok(value) => {
            state.device_status.record_success(&device.id).await;
            Ok(value)
        }
        Err(fault) => {
            state.device_status.record_fault(&device.id, &fault).await;
            Err(Error::Device {
                device_id: device.id.clone(),
                message: fault.to_string(),
            })
        }
    }
}
