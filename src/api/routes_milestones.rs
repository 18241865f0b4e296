//! Milestone review routes.

use std::sync::Arc;

use axum::extract::{Path as AxumPath, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use super::middleware_auth::{RequireAdmin, RequireAuth};
use super::{ApiResult, AppState};

/// GET /api/milestones/{id}
pub(super) async fn handler_get(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    AxumPath(milestone_id): AxumPath<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let view = state.engine.get_milestone(&actor, milestone_id).await?;
    Ok(Json(view))
}

/// POST /api/milestones/{id}/submit
pub(super) async fn handler_submit(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    AxumPath(milestone_id): AxumPath<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let milestone = state
        .engine
        .submit_milestone(&actor, milestone_id, Utc::now())
        .await?;
    Ok(Json(milestone))
}

/// POST /api/milestones/{id}/approve
pub(super) async fn handler_approve(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    AxumPath(milestone_id): AxumPath<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let settlement = state
        .engine
        .approve_milestone(&actor, milestone_id, Utc::now())
        .await?;
    Ok(Json(settlement))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct RevisionPayload {
    #[serde(default)]
    note: Option<String>,
}

/// POST /api/milestones/{id}/revision
pub(super) async fn handler_revision(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    AxumPath(milestone_id): AxumPath<Uuid>,
    payload: Option<Json<RevisionPayload>>,
) -> ApiResult<impl IntoResponse> {
    let Json(payload) = payload.unwrap_or_default();
    let milestone = state
        .engine
        .request_revision(&actor, milestone_id, payload.note.as_deref())
        .await?;
    Ok(Json(milestone))
}

/// POST /api/milestones/{id}/dispute
pub(super) async fn handler_dispute(
    State(state): State<Arc<AppState>>,
    RequireAdmin(actor): RequireAdmin,
    AxumPath(milestone_id): AxumPath<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let milestone = state.engine.escalate_dispute(&actor, milestone_id).await?;
    Ok(Json(milestone))
}
