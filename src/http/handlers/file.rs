//! `GET`/`HEAD /api/file` — range-aware static serving, download-disposition,
//! social-preview-bot unfurl pages, and on-the-fly `.m3u8` URI rewriting.

use crate::error::AppError;
use crate::fileio::{self, RangeOutcome};
use crate::http::middleware::{check_rate_limit, RequestIp};
use crate::http::state::AppState;
use crate::ratelimit::Target;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use std::collections::HashMap;
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

fn truthy(v: Option<&String>) -> bool {
    matches!(v.map(String::as_str), Some("1") | Some("true") | Some("yes"))
}

pub async fn serve_file(State(state): State<AppState>, RequestIp(ip): RequestIp, Query(params): Query<HashMap<String, String>>, headers: HeaderMap, method: Method) -> Result<Response, AppError> {
    check_rate_limit(&state, Target::Download, &ip)?;
    let _guard = state.stats.begin_request(&ip);

    let rel_path = params.get("path").ok_or_else(|| AppError::invalid_input("missing path"))?;
    let abs = state.guard.resolve_read(rel_path).await?;
    if state.blocklist.is_blocked(rel_path).await {
        return Err(AppError::blocked());
    }
    let meta = tokio::fs::metadata(&abs).await?;
    if meta.is_dir() {
        return Err(AppError::not_found());
    }
    let size = meta.len();
    let download = truthy(params.get("download"));
    let range_header = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    let user_agent = headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()).unwrap_or("");

    if download && range_header.is_none() && fileio::is_social_preview_bot(user_agent) {
        return Ok(unfurl_page(&state, rel_path, size));
    }

    let ext = abs.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase();
    if ext == "m3u8" || ext == "m3u" {
        let content = tokio::fs::read_to_string(&abs).await?;
        let rewritten = fileio::rewrite_playlist_uris(&content, rel_path);
        state.stats.record_download(rel_path, rewritten.len() as u64);
        let mut resp = (StatusCode::OK, rewritten).into_response();
        resp.headers_mut().insert(header::CONTENT_TYPE, fileio::mime_for_path(&abs).parse().unwrap());
        resp.headers_mut().insert("Accept-Ranges", "bytes".parse().unwrap());
        return Ok(resp);
    }

    let mime = fileio::mime_for_path(&abs);
    match fileio::parse_range(range_header, size) {
        RangeOutcome::Unsatisfiable => {
            let mut resp = StatusCode::RANGE_NOT_SATISFIABLE.into_response();
            resp.headers_mut().insert(header::CONTENT_RANGE, format!("bytes */{size}").parse().unwrap());
            Ok(resp)
        }
        RangeOutcome::Full => {
            let body = if method == Method::HEAD { Vec::new() } else { tokio::fs::read(&abs).await? };
            if method != Method::HEAD {
                state.stats.record_download(rel_path, size);
            }
            let mut resp = (StatusCode::OK, Body::from(body)).into_response();
            set_common_headers(&mut resp, mime, size, download, rel_path);
            Ok(resp)
        }
        RangeOutcome::Partial { start, end } => {
            let len = end - start + 1;
            let body = if method == Method::HEAD {
                Vec::new()
            } else {
                let mut f = tokio::fs::File::open(&abs).await?;
                f.seek(SeekFrom::Start(start)).await?;
                let mut buf = vec![0u8; len as usize];
                f.read_exact(&mut buf).await?;
                buf
            };
            if method != Method::HEAD {
                state.stats.record_download(rel_path, len);
            }
            let mut resp = (StatusCode::PARTIAL_CONTENT, Body::from(body)).into_response();
            set_common_headers(&mut resp, mime, size, download, rel_path);
            resp.headers_mut().insert(header::CONTENT_RANGE, format!("bytes {start}-{end}/{size}").parse().unwrap());
            resp.headers_mut().insert(header::CONTENT_LENGTH, len.to_string().parse().unwrap());
            Ok(resp)
        }
    }
}

fn set_common_headers(resp: &mut Response, mime: &str, size: u64, download: bool, rel_path: &str) {
    let headers = resp.headers_mut();
    headers.insert(header::CONTENT_TYPE, mime.parse().unwrap());
    headers.insert("Accept-Ranges", "bytes".parse().unwrap());
    if resp.status() == StatusCode::OK {
        headers.insert(header::CONTENT_LENGTH, size.to_string().parse().unwrap());
    }
    if download {
        let filename = std::path::Path::new(rel_path).file_name().and_then(|n| n.to_str()).unwrap_or("download");
        if let Ok(value) = fileio::content_disposition_attachment(filename).parse() {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }
}

fn unfurl_page(state: &AppState, rel_path: &str, size: u64) -> Response {
    let count = state.stats.file_download_count(rel_path).unwrap_or(0);
    let filename = std::path::Path::new(rel_path).file_name().and_then(|n| n.to_str()).unwrap_or(rel_path);
    let escaped = html_escape(filename);
    let html = format!(
        r#"<!doctype html><html><head>
<meta property="og:title" content="{escaped}">
<meta property="og:type" content="website">
<meta property="og:description" content="{count} downloads, {size} bytes">
<meta name="twitter:card" content="summary">
<meta name="twitter:title" content="{escaped}">
<title>{escaped}</title>
</head><body><p>{escaped}</p></body></html>"#
    );
    Html(html).into_response()
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}
