//! Member lifecycle and attendance routes
//!
//! ## Endpoints
//! - POST /api/lifecycle/reconcile - Inactivate idle members now
//! - POST /api/members/:id/block - Explicit block
//! - POST /api/members/:id/unblock - Explicit unblock
//! - GET /api/attendance - Recent attendance (subject_id, limit)
//! - DELETE /api/attendance - Purge attendance before a date

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::ok_response;
use crate::attendance::AttendanceQuery;
use crate::error::{Error, Result};
use crate::state::AppState;

/// Upper bound for attendance listing
const MAX_ATTENDANCE_LIMIT: u32 = 1000;

/// Create lifecycle routes
pub fn lifecycle_routes() -> Router<AppState> {
    Router::new()
        .route("/api/lifecycle/reconcile", post(reconcile))
        .route("/api/members/:id/block", post(block_member))
        .route("/api/members/:id/unblock", post(unblock_member))
        .route("/api/attendance", get(list_attendance).delete(purge_attendance))
}

#[derive(Debug, Deserialize)]
pub struct ReconcileParams {
    pub threshold_days: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct PurgeParams {
    pub before: DateTime<Utc>,
}

async fn reconcile(
    State(state): State<AppState>,
    Query(params): Query<ReconcileParams>,
) -> Result<Response> {
    let days = params
        .threshold_days
        .unwrap_or_else(|| state.reconciler.threshold_days());
    let report = state.reconciler.reconcile_inactivity(days).await?;
    Ok(ok_response(report).into_response())
}

async fn block_member(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response> {
    state.reconciler.block(&id).await?;
    Ok(ok_response(json!({ "member_id": id, "status": "inactive" })).into_response())
}

async fn unblock_member(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response> {
    state.reconciler.unblock(&id).await?;
    Ok(ok_response(json!({ "member_id": id, "status": "active" })).into_response())
}

async fn list_attendance(
    State(state): State<AppState>,
    Query(mut query): Query<AttendanceQuery>,
) -> Result<Response> {
    query.limit = query.limit.clamp(1, MAX_ATTENDANCE_LIMIT);
    let records = state.store.list_attendance(&query).await?;
    Ok(ok_response(records).into_response())
}

async fn purge_attendance(
    State(state): State<AppState>,
    Query(params): Query<PurgeParams>,
) -> Result<Response> {
    if params.before > Utc::now() {
        return Err(Error::Validation(
            "purge date must not be in the future".to_string(),
        ));
    }
    let deleted = state.store.purge_attendance_before(params.before).await?;
    Ok(ok_response(json!({ "deleted": deleted })).into_response())
}
