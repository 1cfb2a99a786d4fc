//! Unified error kind for the whole server.
//!
//! Mirrors the split libunftp uses in `storage::Error`/`storage::ErrorKind`: a
//! typed, translatable kind plus an optional boxed source for diagnostics.
//! Each kind is translated to an HTTP response and an FTP reply exactly once,
//! here, so call sites never hand-roll status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use std::fmt;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug)]
pub struct AppError {
    kind: AppErrorKind,
    source: Option<BoxError>,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum AppErrorKind {
    /// Traversal attempt, symlink escape, or a read target that doesn't exist.
    PathDenied,
    /// Target path matches an entry in the block list.
    Blocked,
    /// Malformed request body/query/filename.
    InvalidInput,
    /// Missing or expired bearer token.
    Unauthorized,
    /// Authenticated but insufficient opLevel.
    Forbidden,
    /// Quota scope exhausted.
    QuotaExceededQuota,
    /// Disk scope exhausted.
    QuotaExceededDisk,
    /// Rate limit bucket exhausted; carries retry-after seconds.
    RateLimited(u64),
    /// The transcoder binary could not be spawned.
    TranscoderMissing,
    /// Read/write failure against the filesystem or a socket.
    UpstreamIoError,
    /// Target does not exist.
    NotFound,
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        AppError { kind, source: None }
    }

    pub fn with_source<E: Into<BoxError>>(kind: AppErrorKind, source: E) -> Self {
        AppError {
            kind,
            source: Some(source.into()),
        }
    }

    pub fn kind(&self) -> AppErrorKind {
        self.kind
    }

    pub fn path_denied() -> Self {
        Self::new(AppErrorKind::PathDenied)
    }

    pub fn blocked() -> Self {
        Self::new(AppErrorKind::Blocked)
    }

    pub fn invalid_input(_why: impl Into<String>) -> Self {
        // The reason is intentionally not retained on the wire; see UpstreamIOError's
        // "never propagate filesystem paths in messages" rule in spec §7 — same caution
        // applies to validation detail, which can leak internal layout.
        Self::new(AppErrorKind::InvalidInput)
    }

    pub fn not_found() -> Self {
        Self::new(AppErrorKind::NotFound)
    }

    pub fn rate_limited(retry_after_sec: u64) -> Self {
        Self::new(AppErrorKind::RateLimited(retry_after_sec))
    }

    /// The FTP reply code this error kind maps to, per spec §7.
    pub fn ftp_code(&self) -> u32 {
        match self.kind {
            AppErrorKind::PathDenied => 550,
            AppErrorKind::Blocked => 550,
            AppErrorKind::InvalidInput => 501,
            AppErrorKind::Unauthorized => 530,
            AppErrorKind::Forbidden => 550,
            AppErrorKind::QuotaExceededQuota | AppErrorKind::QuotaExceededDisk => 552,
            AppErrorKind::RateLimited(_) => 451,
            AppErrorKind::TranscoderMissing => 502,
            AppErrorKind::UpstreamIoError => 451,
            AppErrorKind::NotFound => 550,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<AppErrorKind> for AppError {
    fn from(kind: AppErrorKind) -> Self {
        AppError::new(kind)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => AppError::with_source(AppErrorKind::NotFound, err),
            std::io::ErrorKind::PermissionDenied => AppError::with_source(AppErrorKind::PathDenied, err),
            _ => AppError::with_source(AppErrorKind::UpstreamIoError, err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self.kind {
            AppErrorKind::PathDenied => (StatusCode::FORBIDDEN, "Not found or access denied"),
            AppErrorKind::Blocked => (StatusCode::FORBIDDEN, "blocked"),
            AppErrorKind::InvalidInput => (StatusCode::BAD_REQUEST, "Invalid request"),
            AppErrorKind::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            AppErrorKind::Forbidden => (StatusCode::FORBIDDEN, "Forbidden"),
            AppErrorKind::QuotaExceededQuota => (StatusCode::PAYLOAD_TOO_LARGE, "Quota exceeded"),
            AppErrorKind::QuotaExceededDisk => (StatusCode::INSUFFICIENT_STORAGE, "Insufficient disk space"),
            AppErrorKind::RateLimited(retry_after) => {
                let body = Json(json!({"error": "Too many requests"}));
                let mut resp = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
                if let Ok(value) = axum::http::HeaderValue::from_str(&retry_after.to_string()) {
                    resp.headers_mut().insert("Retry-After", value);
                }
                return resp;
            }
            AppErrorKind::TranscoderMissing => (StatusCode::NOT_IMPLEMENTED, "Transcoder unavailable"),
            AppErrorKind::UpstreamIoError => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error"),
            AppErrorKind::NotFound => (StatusCode::NOT_FOUND, "Not found"),
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
