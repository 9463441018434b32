use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::{Instrument, error, info_span, warn};
use uuid::Uuid;

use crate::application::error::ErrorReport;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Run the request inside a span carrying a fresh request id, echo the id
/// back to the client, and log every 4xx/5xx with its attached report.
pub async fn trace_requests(request: Request<Body>, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let span = info_span!(
        "request",
        %request_id,
        method = %method,
        path = %path,
    );
    let start = Instant::now();

    let mut response = next.run(request).instrument(span.clone()).await;

    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        let elapsed_ms = start.elapsed().as_millis();
        let (source, messages) = match response.extensions_mut().remove::<ErrorReport>() {
            Some(report) => (report.source, report.messages),
            None => ("unknown", Vec::new()),
        };
        let detail = messages
            .first()
            .map(String::as_str)
            .unwrap_or("no diagnostic available");

        span.in_scope(|| {
            if status.is_server_error() {
                error!(
                    target = "texforge::http::response",
                    status = status.as_u16(),
                    elapsed_ms,
                    source,
                    detail,
                    chain = ?messages,
                    "request failed",
                );
            } else {
                warn!(
                    target = "texforge::http::response",
                    status = status.as_u16(),
                    elapsed_ms,
                    source,
                    detail,
                    chain = ?messages,
                    "client request error",
                );
            }
        });
    }

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
