use crate::error::AppError;
use crate::http::middleware::{check_rate_limit, RequestIp};
use crate::http::state::AppState;
use crate::ratelimit::Target;
use axum::extract::State;
use axum::Json;

pub async fn status(State(state): State<AppState>, RequestIp(ip): RequestIp) -> Result<Json<crate::stats::StatsSnapshot>, AppError> {
    check_rate_limit(&state, Target::Status, &ip)?;
    let _guard = state.stats.begin_request(&ip);
    Ok(Json(state.stats.snapshot()))
}
