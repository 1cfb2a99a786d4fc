use axum::body::Body;
use axum::http::{Request, StatusCode};
use fileshare_server::auth::Auth;
use fileshare_server::blocklist::BlockList;
use fileshare_server::disk::DiskProbe;
use fileshare_server::http::{routes, AppState};
use fileshare_server::pathguard::PathGuard;
use fileshare_server::ratelimit::RateLimiter;
use fileshare_server::settings::Settings;
use fileshare_server::stats::Stats;
use fileshare_server::streamer::Streamer;
use serde_json::{json, Map};
use std::sync::Arc;
use tower::ServiceExt;

async fn test_state(root: &std::path::Path) -> AppState {
    let fileshare_dir = root.join(".fileshare");
    tokio::fs::create_dir_all(&fileshare_dir).await.unwrap();

    let mut defaults = Map::new();
    defaults.insert("uploads".to_string(), json!({"maxFileSizeBytes": 10u64 * 1024 * 1024, "directoryQuotaBytes": 0}));
    defaults.insert("haproxy".to_string(), json!({"proxyProtocolV2": false}));

    AppState {
        guard: Arc::new(PathGuard::new(root).await.unwrap()),
        blocklist: Arc::new(BlockList::init(&fileshare_dir).await),
        auth: Auth::init(&fileshare_dir).await,
        stats: Arc::new(Stats::new()),
        rate_limiter: Arc::new(RateLimiter::new()),
        settings: Arc::new(Settings::init(&fileshare_dir, defaults).await),
        streamer: Arc::new(Streamer::init(fileshare_dir.join("cache/hls"), "ffmpeg".to_string())),
        disk: Arc::new(DiskProbe::new()),
    }
}

fn tempdir() -> tempfile::TempDir {
    tempfile::tempdir().unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let dir = tempdir();
    let state = test_state(dir.path()).await;
    let app = routes::build(state);

    let response = app.oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn path_traversal_is_denied_with_forbidden() {
    let dir = tempdir();
    let state = test_state(dir.path()).await;
    let app = routes::build(state);

    let response = app.oneshot(Request::builder().uri("/api/file?path=../../etc/passwd").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn range_request_returns_partial_content() {
    let dir = tempdir();
    tokio::fs::write(dir.path().join("b.bin"), b"0123456789").await.unwrap();
    let state = test_state(dir.path()).await;
    let app = routes::build(state);

    let response = app
        .oneshot(Request::builder().uri("/api/file?path=b.bin").header("Range", "bytes=2-5").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers().get("content-range").unwrap(), "bytes 2-5/10");
    assert_eq!(response.headers().get("content-length").unwrap(), "4");

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"2345");
}

#[tokio::test]
async fn registration_then_pending_login_is_rejected_over_http() {
    let dir = tempdir();
    let state = test_state(dir.path()).await;
    let app = routes::build(state);

    let register = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/register")
                .header("content-type", "application/json")
                .body(Body::from(json!({"username": "alice", "password": "hunter2"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(register.status(), StatusCode::OK);

    let login = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/login")
                .header("content-type", "application/json")
                .body(Body::from(json!({"username": "alice", "password": "hunter2"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(login.status(), StatusCode::UNAUTHORIZED);
}
