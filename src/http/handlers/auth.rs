//! Registration, login/logout, and bearer session introspection.

use crate::error::AppError;
use crate::http::middleware::{check_rate_limit, OptionalAuthUser, RequestIp};
use crate::http::state::AppState;
use crate::ratelimit::Target;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
pub struct Credentials {
    username: String,
    password: String,
}

pub async fn register(State(state): State<AppState>, RequestIp(ip): RequestIp, Json(body): Json<Credentials>) -> Result<Json<serde_json::Value>, AppError> {
    check_rate_limit(&state, Target::Auth, &ip)?;
    let user = state.auth.register(&body.username, &body.password, &ip).await?;
    Ok(Json(json!({"ok": true, "username": user.username, "status": "pending"})))
}

pub async fn login(State(state): State<AppState>, RequestIp(ip): RequestIp, Json(body): Json<Credentials>) -> Response {
    if let Err(err) = check_rate_limit(&state, Target::Auth, &ip) {
        return err.into_response();
    }
    match state.auth.login(&body.username, &body.password, &ip).await {
        Ok(session) => (StatusCode::OK, Json(json!({"ok": true, "token": session.token, "username": session.current_username}))).into_response(),
        Err(_) => (StatusCode::UNAUTHORIZED, Json(json!({"ok": false}))).into_response(),
    }
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<serde_json::Value>, AppError> {
    let token = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()).ok_or_else(|| AppError::new(crate::error::AppErrorKind::Unauthorized))?;
    state.auth.logout(token.strip_prefix("Bearer ").unwrap_or(token)).await;
    Ok(Json(json!({"ok": true})))
}

pub async fn status(OptionalAuthUser(user): OptionalAuthUser) -> Json<serde_json::Value> {
    match user {
        Some(user) => Json(json!({"authenticated": true, "username": user.username, "oplevel": user.op_level as u8})),
        None => Json(json!({"authenticated": false})),
    }
}
