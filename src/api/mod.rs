//! # API: HTTP Surface of the Settlement Engine
//!
//! Axum router exposing the engine to the marketplace front end, the payment
//! gateway and the cron invoker. Handlers are thin: extract the actor,
//! deserialise the body, call one [`Engine`] method, map the result.
//!
//! | Group | Routes | Auth |
//! |-------|--------|------|
//! | Projects | `/api/projects/...` | JWT |
//! | Milestones | `/api/milestones/...` | JWT |
//! | Payments | `/api/payments`, `/api/payments/release` | JWT |
//! | Webhook | `/api/payments/webhook` | gateway signature |
//! | Analyst | `/api/analyst/...` | JWT (analyst) |
//! | Admin | `/api/admin/withdrawals/...` | JWT (admin) |
//! | Cron | `/api/cron/auto-release` | `CRON_SECRET` bearer |
//! | Probes | `/healthz`, `/readyz`, `/metrics` | none |

pub mod middleware_auth;
mod routes_cron;
mod routes_health;
mod routes_milestones;
mod routes_payments;
mod routes_projects;
mod routes_withdrawals;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::Request;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, Instrument};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::{prom_metrics, scheduler};

pub struct AppState {
    pub engine: Arc<Engine>,
    pub jwt_secret: String,
    pub cron_secret: Option<String>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, jwt_secret: String, cron_secret: Option<String>) -> Arc<Self> {
        Arc::new(AppState {
            engine,
            jwt_secret,
            cron_secret,
        })
    }
}

// ── Error mapping ───────────────────────────────────────────────

/// Engine error rendered as `{"error": message, "code": code}`.
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError(e)
    }
}

pub(crate) fn status_for(e: &EngineError) -> StatusCode {
    match e {
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::PreconditionFailed(_) | EngineError::AlreadyPaid => StatusCode::CONFLICT,
        EngineError::NotFound { .. } | EngineError::UnknownOrderReference(_) => {
            StatusCode::NOT_FOUND
        }
        EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
        EngineError::InvalidSignature => StatusCode::UNAUTHORIZED,
        EngineError::InsufficientBalance { .. }
        | EngineError::BelowMinimumAmount { .. }
        | EngineError::RevisionLimitExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::ExternalServiceFailure(_) => StatusCode::BAD_GATEWAY,
        EngineError::Storage(_) | EngineError::Migration(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "request failed");
            "internal error".to_string()
        } else {
            self.0.to_string()
        };
        (
            status,
            Json(serde_json::json!({"error": message, "code": self.0.code()})),
        )
            .into_response()
    }
}

pub(crate) type ApiResult<T> = Result<T, ApiError>;

// ── Middleware ──────────────────────────────────────────────────

/// Records request latency, generates (or propagates) `x-request-id`, and
/// runs the handler inside a `request` span.
async fn metrics_middleware(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let method = req.method().to_string();
    let raw_path = req.uri().path().to_string();
    let norm_path = normalize_path(&raw_path);
    let start = std::time::Instant::now();

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %raw_path,
    );
    let mut response = next.run(req).instrument(span).await;

    state
        .engine
        .metrics()
        .http_request_duration
        .get_or_create(&prom_metrics::HttpLabel {
            method,
            path: norm_path,
        })
        .observe(start.elapsed().as_secs_f64());

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Collapse ids in a path so histogram labels stay bounded.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|seg| {
            if seg.is_empty() {
                seg.to_string()
            } else if seg.chars().all(|c| c.is_ascii_digit()) {
                ":id".to_string()
            } else if seg.len() == 36 && seg.chars().filter(|c| *c == '-').count() == 4 {
                ":uuid".to_string()
            } else {
                seg.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(routes_health::handler_healthz))
        .route("/readyz", get(routes_health::handler_readyz))
        .route("/metrics", get(routes_health::handler_metrics))
        .route("/api/projects", post(routes_projects::handler_create))
        .route(
            "/api/projects/{id}/publish",
            post(routes_projects::handler_publish),
        )
        .route(
            "/api/projects/{id}/cancel",
            post(routes_projects::handler_cancel),
        )
        .route(
            "/api/projects/{id}/proposals",
            post(routes_projects::handler_submit_proposal),
        )
        .route(
            "/api/projects/{id}/proposals/{proposal_id}/accept",
            post(routes_projects::handler_accept_proposal),
        )
        .route(
            "/api/projects/{id}/proposals/{proposal_id}/reject",
            post(routes_projects::handler_reject_proposal),
        )
        .route("/api/milestones/{id}", get(routes_milestones::handler_get))
        .route(
            "/api/milestones/{id}/submit",
            post(routes_milestones::handler_submit),
        )
        .route(
            "/api/milestones/{id}/approve",
            post(routes_milestones::handler_approve),
        )
        .route(
            "/api/milestones/{id}/revision",
            post(routes_milestones::handler_revision),
        )
        .route(
            "/api/milestones/{id}/dispute",
            post(routes_milestones::handler_dispute),
        )
        .route("/api/payments", post(routes_payments::handler_initiate))
        .route(
            "/api/payments/webhook",
            post(routes_payments::handler_webhook),
        )
        .route(
            "/api/payments/release",
            post(routes_payments::handler_release),
        )
        .route(
            "/api/analyst/balance",
            get(routes_withdrawals::handler_balance),
        )
        .route(
            "/api/analyst/withdrawals",
            get(routes_withdrawals::handler_my_withdrawals)
                .post(routes_withdrawals::handler_request_withdrawal),
        )
        .route(
            "/api/analyst/payout",
            put(routes_withdrawals::handler_set_payout),
        )
        .route(
            "/api/admin/withdrawals",
            get(routes_withdrawals::handler_admin_list),
        )
        .route(
            "/api/admin/withdrawals/{id}/{action}",
            post(routes_withdrawals::handler_admin_action),
        )
        .route(
            "/api/cron/auto-release",
            get(routes_cron::handler_auto_release).post(routes_cron::handler_auto_release),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(CatchPanicLayer::new())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(1024 * 1024))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .with_state(state)
}

/// Serve the API and run the auto-release loop until SIGINT/SIGTERM.
pub async fn run(port: u16, state: Arc<AppState>) -> Result<()> {
    let app = build_router(state.clone());

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let sweeper = scheduler::spawn_loop(Arc::clone(&state.engine), stop_rx);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "settlement API listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = stop_tx.send(true);
    if let Err(e) = sweeper.await {
        error!(error = %e, "auto-release loop panicked");
    }
    info!("settlement API shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
                info!("received SIGINT, shutting down");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT, shutting down");
    }
}
