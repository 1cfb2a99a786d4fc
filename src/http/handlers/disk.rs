use crate::disk::DiskInfo;
use crate::error::AppError;
use crate::http::middleware::{check_rate_limit, RequestIp};
use crate::http::state::AppState;
use crate::ratelimit::Target;
use axum::extract::State;
use axum::Json;

pub async fn disk(State(state): State<AppState>, RequestIp(ip): RequestIp) -> Result<Json<DiskInfo>, AppError> {
    check_rate_limit(&state, Target::Disk, &ip)?;
    let _guard = state.stats.begin_request(&ip);
    let (max_file_size, quota) = state.uploads_config().await;
    let info = state.disk.snapshot(&state.guard, quota, max_file_size).await;
    Ok(Json(info))
}
