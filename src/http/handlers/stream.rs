//! HLS playlist synthesis and per-segment transcoding endpoints.

use crate::error::AppError;
use crate::http::middleware::RequestIp;
use crate::http::state::AppState;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;

pub async fn playlist(State(state): State<AppState>, RequestIp(ip): RequestIp, Query(params): Query<HashMap<String, String>>) -> Result<Response, AppError> {
    let _guard = state.stats.begin_request(&ip);
    let rel_path = params.get("path").ok_or_else(|| AppError::invalid_input("missing path"))?;
    let result = state.streamer.playlist(&state.guard, rel_path).await?;

    let mut resp = (StatusCode::OK, result.body).into_response();
    resp.headers_mut().insert(header::CONTENT_TYPE, "application/vnd.apple.mpegurl".parse().unwrap());
    resp.headers_mut().insert(header::CACHE_CONTROL, "no-store".parse().unwrap());
    let _ = result.finalized;
    Ok(resp)
}

pub async fn segment(State(state): State<AppState>, RequestIp(ip): RequestIp, Query(params): Query<HashMap<String, String>>) -> Result<Response, AppError> {
    let _guard = state.stats.begin_request(&ip);
    let rel_path = params.get("path").ok_or_else(|| AppError::invalid_input("missing path"))?;
    let file = params.get("file").ok_or_else(|| AppError::invalid_input("missing file"))?;

    let result = state.streamer.segment(&state.guard, rel_path, file).await?;
    let bytes = tokio::fs::read(&result.path).await?;

    let mut resp = (StatusCode::OK, bytes).into_response();
    resp.headers_mut().insert(header::CONTENT_TYPE, "video/mp2t".parse().unwrap());
    resp.headers_mut().insert(header::CACHE_CONTROL, "public, max-age=3600".parse().unwrap());
    Ok(resp)
}
