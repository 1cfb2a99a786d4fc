//! Directory creation, rename/move, and delete — all bearer-gated, delete
//! additionally requiring `opLevel >= 2`.

use crate::auth::user::OpLevel;
use crate::error::AppError;
use crate::http::middleware::{check_rate_limit, require_op_level, AuthUser, RequestIp};
use crate::http::state::AppState;
use crate::ratelimit::Target;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
pub struct MkdirRequest {
    path: String,
}

pub async fn mkdir(State(state): State<AppState>, RequestIp(ip): RequestIp, _user: AuthUser, Json(body): Json<MkdirRequest>) -> Result<Json<serde_json::Value>, AppError> {
    check_rate_limit(&state, Target::FileOps, &ip)?;
    let abs = state.guard.resolve_write(&body.path).await?;
    tokio::fs::create_dir_all(&abs).await?;
    Ok(Json(json!({"ok": true, "path": state.guard.relativize(&abs)})))
}

#[derive(Deserialize)]
pub struct RenameRequest {
    from: String,
    to: String,
}

pub async fn rename(State(state): State<AppState>, RequestIp(ip): RequestIp, _user: AuthUser, Json(body): Json<RenameRequest>) -> Result<Json<serde_json::Value>, AppError> {
    check_rate_limit(&state, Target::FileOps, &ip)?;
    let source = state.guard.resolve_read(&body.from).await?;
    let target = state.guard.resolve_write(&body.to).await?;
    tokio::fs::rename(&source, &target).await?;
    state.disk.invalidate();
    Ok(Json(json!({"ok": true, "path": state.guard.relativize(&target)})))
}

#[derive(Deserialize)]
pub struct DeleteRequest {
    path: String,
}

pub async fn delete(State(state): State<AppState>, RequestIp(ip): RequestIp, user: AuthUser, Json(body): Json<DeleteRequest>) -> Result<Json<serde_json::Value>, AppError> {
    require_op_level(&user, OpLevel::Advanced)?;
    check_rate_limit(&state, Target::FileOps, &ip)?;
    let abs = state.guard.resolve_read(&body.path).await?;
    let meta = tokio::fs::metadata(&abs).await?;
    if meta.is_dir() {
        tokio::fs::remove_dir_all(&abs).await?;
    } else {
        tokio::fs::remove_file(&abs).await?;
    }
    state.disk.invalidate();
    Ok(Json(json!({"ok": true})))
}
