//! Project lifecycle and proposal routes.

use std::sync::Arc;

use axum::extract::{Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use uuid::Uuid;

use super::middleware_auth::RequireAuth;
use super::{ApiResult, AppState};
use crate::project::ProjectDraft;
use crate::proposal::ProposalDraft;

/// POST /api/projects
pub(super) async fn handler_create(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    Json(draft): Json<ProjectDraft>,
) -> ApiResult<impl IntoResponse> {
    let project = state.engine.create_project(&actor, &draft).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

/// POST /api/projects/{id}/publish
pub(super) async fn handler_publish(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    AxumPath(project_id): AxumPath<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let project = state.engine.publish_project(&actor, project_id).await?;
    Ok(Json(project))
}

/// POST /api/projects/{id}/cancel
pub(super) async fn handler_cancel(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    AxumPath(project_id): AxumPath<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let project = state
        .engine
        .cancel_project(&actor, project_id, Utc::now())
        .await?;
    Ok(Json(project))
}

/// POST /api/projects/{id}/proposals
pub(super) async fn handler_submit_proposal(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    AxumPath(project_id): AxumPath<Uuid>,
    Json(draft): Json<ProposalDraft>,
) -> ApiResult<impl IntoResponse> {
    let proposal = state
        .engine
        .submit_proposal(&actor, project_id, &draft)
        .await?;
    Ok((StatusCode::CREATED, Json(proposal)))
}

/// POST /api/projects/{id}/proposals/{proposal_id}/accept
pub(super) async fn handler_accept_proposal(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    AxumPath((project_id, proposal_id)): AxumPath<(Uuid, Uuid)>,
) -> ApiResult<impl IntoResponse> {
    let engagement = state
        .engine
        .accept_proposal(&actor, project_id, proposal_id, Utc::now())
        .await?;
    Ok(Json(engagement))
}

/// POST /api/projects/{id}/proposals/{proposal_id}/reject
pub(super) async fn handler_reject_proposal(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    AxumPath((project_id, proposal_id)): AxumPath<(Uuid, Uuid)>,
) -> ApiResult<impl IntoResponse> {
    let proposal = state
        .engine
        .reject_proposal(&actor, project_id, proposal_id, Utc::now())
        .await?;
    Ok(Json(proposal))
}
