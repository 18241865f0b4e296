//! Cron trigger for the auto-release sweep.
//!
//! Callers must present `Authorization: Bearer $CRON_SECRET`. Without a
//! configured secret the endpoint refuses every call.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use subtle::ConstantTimeEq;

use super::middleware_auth::bearer_token;
use super::{ApiError, AppState};
use crate::scheduler;

fn cron_authorized(state: &AppState, headers: &HeaderMap) -> bool {
    match (state.cron_secret.as_deref(), bearer_token(headers)) {
        (Some(secret), Some(token)) => bool::from(secret.as_bytes().ct_eq(token.as_bytes())),
        _ => false,
    }
}

/// GET|POST /api/cron/auto-release
pub(super) async fn handler_auto_release(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    if !cron_authorized(&state, &headers) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "Unauthorized", "code": "unauthorized"})),
        )
            .into_response();
    }
    match scheduler::run_sweep(&state.engine, Utc::now()).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}
