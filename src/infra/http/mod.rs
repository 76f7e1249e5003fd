//! HTTP surface: the compression endpoint, the favicon redirect and the
//! gallery API client.

mod client;
mod compress;
pub mod error;
mod middleware;

pub use client::HttpImagesRepo;
pub use middleware::log_responses;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Request},
    http::{StatusCode, header::LOCATION},
    middleware as axum_middleware,
    response::IntoResponse,
    routing::{get, post},
};

use crate::application::compression::{CompressionOptions, CompressionService};

const FAVICON_SVG: &str = "/static/favicon.svg";
const FAVICON_ICO: &str = "/static/favicon.ico";

#[derive(Clone)]
pub struct HttpState {
    pub compression: CompressionService,
    /// Applied to every option field a request leaves out.
    pub defaults: CompressionOptions,
}

pub fn build_router(state: HttpState, max_request_bytes: usize) -> Router {
    Router::new()
        .route("/api/compress", post(compress::compress))
        .route("/favicon.ico", get(favicon))
        .route("/favicon.svg", get(favicon))
        .layer(DefaultBodyLimit::max(max_request_bytes))
        .layer(axum_middleware::from_fn(log_responses))
        .with_state(state)
}

/// `302 Found`; axum's `Redirect` only offers 303, 307 and 308.
async fn favicon(request: Request) -> impl IntoResponse {
    (
        StatusCode::FOUND,
        [(LOCATION, favicon_target(request.uri().path()))],
    )
}

fn favicon_target(path: &str) -> &'static str {
    if path.to_ascii_lowercase().ends_with(".svg") {
        FAVICON_SVG
    } else {
        FAVICON_ICO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn svg_requests_get_the_svg() {
        assert_eq!(favicon_target("/favicon.SVG"), FAVICON_SVG);
        assert_eq!(favicon_target("/favicon.ico"), FAVICON_ICO);
    }
}
