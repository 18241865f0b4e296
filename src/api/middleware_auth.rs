//! JWT actor extraction.
//!
//! The identity service issues HS256 tokens carrying the user id (`sub`) and
//! marketplace role. The engine trusts a token whose signature and expiry
//! check out; it never looks the user up.
//!
//! Handlers take [`RequireAuth`] for any signed-in actor and
//! [`RequireAdmin`] for back-office routes.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AppState;
use crate::engine::{Actor, Role};

/// Token claims. `exp` is required and validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub exp: u64,
}

impl From<Claims> for Actor {
    fn from(c: Claims) -> Self {
        Actor {
            user_id: c.sub,
            role: c.role,
            name: c.name,
            email: c.email,
        }
    }
}

pub fn decode_actor(token: &str, secret: &str) -> Result<Actor, String> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<Claims>(token, &key, &validation)
        .map_err(|e| format!("JWT verification failed: {}", e))?;
    Ok(data.claims.into())
}

pub(super) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": "Authentication required", "code": "unauthorized"})),
    )
        .into_response()
}

fn extract_actor(state: &AppState, parts: &Parts) -> Result<Actor, Response> {
    let token = bearer_token(&parts.headers).ok_or_else(unauthorized)?;
    decode_actor(token, &state.jwt_secret).map_err(|e| {
        tracing::debug!(error = %e, "rejected bearer token");
        unauthorized()
    })
}

/// Any authenticated actor. Returns 401 without a valid token.
pub struct RequireAuth(pub Actor);

impl FromRequestParts<Arc<AppState>> for RequireAuth {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        extract_actor(state, parts).map(RequireAuth)
    }
}

/// An authenticated admin. Returns 401 without a valid token, 403 for other roles.
pub struct RequireAdmin(pub Actor);

impl FromRequestParts<Arc<AppState>> for RequireAdmin {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let actor = extract_actor(state, parts)?;
        if actor.role != Role::Admin {
            return Err((
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({"error": "Admin access required", "code": "forbidden"})),
            )
                .into_response());
        }
        Ok(RequireAdmin(actor))
    }
}
