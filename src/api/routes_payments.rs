//! Escrow funding, gateway webhook and release routes.
//!
//! The webhook has no JWT: the gateway authenticates each notification with
//! its signature, which [`crate::engine::Engine::handle_notification`]
//! verifies before reading anything else.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use super::middleware_auth::RequireAuth;
use super::{ApiResult, AppState};
use crate::db::{CallbackOutcome, ReleaseOutcome};
use crate::gateway::GatewayNotification;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct MilestonePayload {
    milestone_id: Uuid,
}

/// POST /api/payments
pub(super) async fn handler_initiate(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    Json(payload): Json<MilestonePayload>,
) -> ApiResult<impl IntoResponse> {
    let session = state
        .engine
        .initiate_payment(&actor, payload.milestone_id, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// POST /api/payments/webhook
pub(super) async fn handler_webhook(
    State(state): State<Arc<AppState>>,
    Json(notification): Json<GatewayNotification>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .engine
        .handle_notification(&notification, Utc::now())
        .await?;
    let body = match outcome {
        CallbackOutcome::Applied { escrow, previous, .. } => serde_json::json!({
            "status": "applied",
            "order_id": notification.order_id,
            "previous": previous,
            "escrow_status": escrow.status,
        }),
        CallbackOutcome::NoOp { escrow, reason } => serde_json::json!({
            "status": "ignored",
            "order_id": notification.order_id,
            "escrow_status": escrow.status,
            "reason": reason,
        }),
    };
    Ok(Json(body))
}

/// POST /api/payments/release
pub(super) async fn handler_release(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    Json(payload): Json<MilestonePayload>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .engine
        .release_payment(&actor, payload.milestone_id, Utc::now())
        .await?;
    let body = match outcome {
        ReleaseOutcome::Released(escrow) => serde_json::json!({
            "released": true,
            "escrow": escrow,
        }),
        ReleaseOutcome::AlreadyReleased(escrow) => serde_json::json!({
            "released": false,
            "already_released": true,
            "escrow": escrow,
        }),
    };
    Ok(Json(body))
}
