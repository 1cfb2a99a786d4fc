//! Embedded single-page-app assets. The build pipeline that produces
//! `index.html`/`index.js` is out of scope; these are served verbatim.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "assets/spa"]
struct SpaAssets;

fn serve_asset(name: &str, content_type: &str) -> Response {
    match SpaAssets::get(name) {
        Some(file) => (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], file.data.into_owned()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn index() -> Response {
    serve_asset("index.html", "text/html; charset=utf-8")
}

pub async fn bundle() -> Response {
    serve_asset("index.js", "application/javascript; charset=utf-8")
}
