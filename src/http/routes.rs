use crate::http::handlers::{auth, disk, file, fileops, health, list, spa, speedtest, status, stream, upload};
use crate::http::middleware::cors_layer;
use crate::http::state::AppState;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

pub fn build(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health))
        .route("/api/status", get(status::status))
        .route("/api/list", get(list::list))
        .route("/api/file", get(file::serve_file).head(file::serve_file))
        .route("/api/disk", get(disk::disk))
        .route("/api/stream/playlist", get(stream::playlist))
        .route("/api/stream/file", get(stream::segment))
        .route("/api/speedtest/download", get(speedtest::download))
        .route("/api/speedtest/upload", post(speedtest::upload).layer(DefaultBodyLimit::disable()))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/status", get(auth::status))
        .route("/api/upload", post(upload::upload).layer(DefaultBodyLimit::disable()))
        .route("/api/mkdir", post(fileops::mkdir))
        .route("/api/rename", post(fileops::rename))
        .route("/api/delete", post(fileops::delete))
        .route("/index.js", get(spa::bundle))
        .fallback(spa::index)
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
