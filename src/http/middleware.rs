//! CORS policy, client-IP resolution, and bearer-token extraction for the
//! HTTP surface.

use crate::auth::user::OpLevel;
use crate::error::{AppError, AppErrorKind};
use crate::http::state::AppState;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{HeaderName, Method};
use std::net::SocketAddr;
use tower_http::cors::{AllowOrigin, CorsLayer};
use uuid::Uuid;

pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|_origin, _parts| true))
        .allow_methods([Method::GET, Method::HEAD, Method::POST, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE, axum::http::header::RANGE, axum::http::header::AUTHORIZATION])
        .expose_headers([axum::http::header::CONTENT_RANGE, axum::http::header::CONTENT_LENGTH, HeaderName::from_static("accept-ranges")])
}

/// Resolves the caller's IP for rate limiting and registration, honoring the
/// proxy-v2 header when the deployment has HAProxy enforcement turned on.
pub async fn client_ip(state: &AppState, parts: &Parts, peer: Option<SocketAddr>) -> String {
    let proxy_v2_enabled = state.proxy_v2_enabled().await;
    let proxy_v2_header = parts.headers.get("X-Proxy-Protocol-V2").and_then(|v| v.to_str().ok());
    let forwarded_for = parts.headers.get("X-Forwarded-For").and_then(|v| v.to_str().ok());
    let real_ip = parts.headers.get("X-Real-IP").and_then(|v| v.to_str().ok());
    crate::auth::resolve_client_ip(proxy_v2_enabled, proxy_v2_header, peer.map(|a| a.ip()), forwarded_for, real_ip)
}

pub struct RequestIp(pub String);

impl FromRequestParts<AppState> for RequestIp {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let peer = parts.extensions.get::<ConnectInfo<SocketAddr>>().map(|c| c.0);
        Ok(RequestIp(client_ip(state, parts, peer).await))
    }
}

/// An authenticated caller, extracted from the `Authorization: Bearer ...` header.
pub struct AuthUser {
    pub user_id: Uuid,
    pub username: String,
    pub op_level: OpLevel,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts.headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()).ok_or_else(|| AppError::new(AppErrorKind::Unauthorized))?;
        let (user_id, username, op_level) = state.auth.verify_token(header).await?;
        Ok(AuthUser { user_id, username, op_level })
    }
}

/// Same as [`AuthUser`] but returns `None` instead of rejecting when no
/// (or an invalid) token is present — used by `/api/auth/status`.
pub struct OptionalAuthUser(pub Option<AuthUser>);

impl FromRequestParts<AppState> for OptionalAuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(header) = parts.headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
            return Ok(OptionalAuthUser(None));
        };
        match state.auth.verify_token(header).await {
            Ok((user_id, username, op_level)) => Ok(OptionalAuthUser(Some(AuthUser { user_id, username, op_level }))),
            Err(_) => Ok(OptionalAuthUser(None)),
        }
    }
}

pub fn require_op_level(user: &AuthUser, min: OpLevel) -> Result<(), AppError> {
    if user.op_level >= min {
        Ok(())
    } else {
        Err(AppError::new(AppErrorKind::Forbidden))
    }
}

pub fn check_rate_limit(state: &AppState, target: crate::ratelimit::Target, ip: &str) -> Result<(), AppError> {
    match state.rate_limiter.check(target, ip) {
        crate::ratelimit::Decision::Allow => Ok(()),
        crate::ratelimit::Decision::Deny { retry_after_sec } => Err(AppError::rate_limited(retry_after_sec)),
    }
}
