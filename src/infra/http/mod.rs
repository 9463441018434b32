mod error;
mod handlers;
mod middleware;

pub use error::ApiError;
pub use middleware::REQUEST_ID_HEADER;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};

use crate::application::{compile::CompileService, retrieve::ArtifactRetriever};

use middleware::trace_requests;

/// Headroom for the JSON envelope around the source.
const BODY_ENVELOPE_BYTES: usize = 64 * 1024;
/// Worst-case growth of a string under JSON escaping (`\u00XX`).
const JSON_ESCAPE_FACTOR: usize = 6;

#[derive(Clone)]
pub struct AppState {
    pub compile: Arc<CompileService>,
    pub retriever: Arc<ArtifactRetriever>,
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = request_body_limit(state.compile.admission().max_source_bytes());

    Router::new()
        .route("/compile", post(handlers::compile))
        .route("/pdf/{build_id}", get(handlers::get_pdf))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum_middleware::from_fn(trace_requests))
}

/// Body limit large enough that the admission guard, not the extractor,
/// rejects oversized sources.
fn request_body_limit(max_source_bytes: u64) -> usize {
    usize::try_from(max_source_bytes)
        .unwrap_or(usize::MAX)
        .saturating_mul(JSON_ESCAPE_FACTOR)
        .saturating_add(BODY_ENVELOPE_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_limit_leaves_room_for_escaped_sources() {
        assert_eq!(request_body_limit(1_000), 6_000 + 64 * 1024);
        assert_eq!(request_body_limit(u64::MAX), usize::MAX);
    }
}
