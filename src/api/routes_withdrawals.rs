//! Analyst balance, payout details and withdrawal routes, plus the admin
//! withdrawal queue.

use std::sync::Arc;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use super::middleware_auth::{RequireAdmin, RequireAuth};
use super::{ApiResult, AppState};
use crate::db::WithdrawalFilter;
use crate::withdrawal::{PayoutDetails, WithdrawalAction};

/// GET /api/analyst/balance
pub(super) async fn handler_balance(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
) -> ApiResult<impl IntoResponse> {
    let balance = state.engine.balance(&actor, Utc::now()).await?;
    Ok(Json(balance))
}

/// PUT /api/analyst/payout
pub(super) async fn handler_set_payout(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    Json(details): Json<PayoutDetails>,
) -> ApiResult<impl IntoResponse> {
    let profile = state.engine.set_payout_details(&actor, &details).await?;
    Ok(Json(profile))
}

/// GET /api/analyst/withdrawals
pub(super) async fn handler_my_withdrawals(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
) -> ApiResult<impl IntoResponse> {
    let withdrawals = state.engine.my_withdrawals(&actor).await?;
    Ok(Json(withdrawals))
}

#[derive(Debug, Deserialize)]
pub(super) struct WithdrawalPayload {
    amount: i64,
}

/// POST /api/analyst/withdrawals
pub(super) async fn handler_request_withdrawal(
    State(state): State<Arc<AppState>>,
    RequireAuth(actor): RequireAuth,
    Json(payload): Json<WithdrawalPayload>,
) -> ApiResult<impl IntoResponse> {
    let withdrawal = state
        .engine
        .request_withdrawal(&actor, payload.amount, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(withdrawal)))
}

/// GET /api/admin/withdrawals?status=PENDING&limit=50&offset=0
pub(super) async fn handler_admin_list(
    State(state): State<Arc<AppState>>,
    RequireAdmin(actor): RequireAdmin,
    Query(filter): Query<WithdrawalFilter>,
) -> ApiResult<impl IntoResponse> {
    let withdrawals = state.engine.list_withdrawals(&actor, &filter).await?;
    Ok(Json(withdrawals))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct AdminActionPayload {
    #[serde(default)]
    reason: Option<String>,
}

/// POST /api/admin/withdrawals/{id}/{approve|complete|reject}
pub(super) async fn handler_admin_action(
    State(state): State<Arc<AppState>>,
    RequireAdmin(actor): RequireAdmin,
    AxumPath((withdrawal_id, action)): AxumPath<(Uuid, String)>,
    payload: Option<Json<AdminActionPayload>>,
) -> ApiResult<impl IntoResponse> {
    let action: WithdrawalAction = action.parse()?;
    let Json(payload) = payload.unwrap_or_default();
    let withdrawal = state
        .engine
        .process_withdrawal(
            &actor,
            withdrawal_id,
            action,
            payload.reason.as_deref(),
            Utc::now(),
        )
        .await?;
    Ok(Json(withdrawal))
}
