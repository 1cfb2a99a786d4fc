use crate::error::AppError;
use crate::fileio;
use crate::http::middleware::{check_rate_limit, RequestIp};
use crate::http::state::AppState;
use crate::ratelimit::Target;
use axum::extract::{Query, State};
use axum::Json;
use std::collections::HashMap;

pub async fn list(State(state): State<AppState>, RequestIp(ip): RequestIp, Query(params): Query<HashMap<String, String>>) -> Result<Json<Vec<fileio::FileEntry>>, AppError> {
    check_rate_limit(&state, Target::List, &ip)?;
    let _guard = state.stats.begin_request(&ip);
    let rel_path = params.get("path").map(String::as_str).unwrap_or("");
    let entries = fileio::list_directory(&state.guard, &state.blocklist, rel_path, |p| state.stats.file_download_count(p)).await?;
    Ok(Json(entries))
}
