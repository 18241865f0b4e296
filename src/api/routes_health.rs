//! # Health & Observability Endpoints
//!
//! | Endpoint | Purpose |
//! |----------|---------|
//! | `GET /healthz` | Liveness: the process is serving HTTP |
//! | `GET /readyz` | Readiness: `SELECT 1` succeeds within 2 seconds |
//! | `GET /metrics` | Prometheus scrape |

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use super::AppState;

pub(super) async fn handler_healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// 503 while the database is unreachable, so the load balancer stops routing
/// webhooks and approvals to an instance that cannot commit them.
pub(super) async fn handler_readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let check = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        state.engine.db().health_check(),
    )
    .await;

    match check {
        Ok(Ok(())) => (StatusCode::OK, "ok"),
        Ok(Err(_)) => (StatusCode::SERVICE_UNAVAILABLE, "database unreachable"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "database timeout"),
    }
}

pub(super) async fn handler_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = state.engine.metrics().encode();
    (
        StatusCode::OK,
        [(
            "content-type",
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        body,
    )
}
