//! `POST /api/upload` — multipart ingest gated behind a bearer session.

use crate::error::AppError;
use crate::http::middleware::{check_rate_limit, AuthUser, RequestIp};
use crate::http::state::AppState;
use crate::ratelimit::Target;
use crate::uploads;
use axum::extract::{Multipart, State};
use axum::Json;
use serde_json::json;

pub async fn upload(State(state): State<AppState>, RequestIp(ip): RequestIp, _user: AuthUser, mut multipart: Multipart) -> Result<Json<serde_json::Value>, AppError> {
    check_rate_limit(&state, Target::Upload, &ip)?;
    let _guard = state.stats.begin_request(&ip);

    let mut target_dir = String::new();
    let mut filename: Option<String> = None;
    let mut bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart.next_field().await.map_err(|_| AppError::invalid_input("malformed multipart body"))? {
        match field.name().unwrap_or("") {
            "path" => {
                target_dir = field.text().await.unwrap_or_default();
            }
            "file" => {
                filename = field.file_name().map(|s| s.to_string());
                bytes = Some(field.bytes().await.map_err(|_| AppError::invalid_input("bad file field"))?.to_vec());
            }
            _ => {}
        }
    }

    let raw_filename = filename.ok_or_else(|| AppError::invalid_input("missing file field"))?;
    let bytes = bytes.ok_or_else(|| AppError::invalid_input("missing file field"))?;
    let (max_file_size, quota) = state.uploads_config().await;

    let outcome = uploads::ingest(&state.guard, &state.disk, &target_dir, &raw_filename, max_file_size, quota, &bytes).await?;
    state.stats.record_upload(outcome.size);

    Ok(Json(json!({"file": {"path": outcome.rel_path, "size": outcome.size}})))
}
