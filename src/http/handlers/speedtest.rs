//! Synthetic bandwidth probes: a download of caller-chosen size, and an
//! upload sink that reports bytes received.

use crate::error::AppError;
use axum::body::Bytes;
use axum::extract::Query;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::collections::HashMap;

const MAX_SPEEDTEST_SIZE: u64 = 256 * 1024 * 1024;

pub async fn download(Query(params): Query<HashMap<String, String>>) -> Result<Response, AppError> {
    let size: u64 = params.get("size").and_then(|s| s.parse().ok()).unwrap_or(1024 * 1024);
    if size > MAX_SPEEDTEST_SIZE {
        return Err(AppError::invalid_input("size too large"));
    }
    let body = vec![0u8; size as usize];
    let mut resp = (StatusCode::OK, body).into_response();
    resp.headers_mut().insert(header::CONTENT_TYPE, "application/octet-stream".parse().unwrap());
    Ok(resp)
}

pub async fn upload(body: Bytes) -> Result<Json<serde_json::Value>, AppError> {
    if body.len() as u64 > MAX_SPEEDTEST_SIZE {
        return Err(AppError::invalid_input("body too large"));
    }
    Ok(Json(json!({"received": body.len()})))
}
