//! Request tracing middleware

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use super::PARTY_HEADER;

/// Logs method, path, acting party, status and latency of every request
pub async fn request_tracing(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let party = request
        .headers()
        .get(PARTY_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());

    let start = Instant::now();

    tracing::debug!(method = %method, path = %path, party = ?party, "Request started");

    let response = next.run(request).await;

    let duration_ms = start.elapsed().as_millis() as u64;
    let status = response.status().as_u16();

    if response.status().is_server_error() {
        tracing::error!(
            method = %method,
            path = %path,
            party = ?party,
            status,
            duration_ms,
            "Request completed with error"
        );
    } else if response.status().is_client_error() {
        tracing::warn!(
            method = %method,
            path = %path,
            party = ?party,
            status,
            duration_ms,
            "Request completed with client error"
        );
    } else {
        tracing::info!(
            method = %method,
            path = %path,
            status,
            duration_ms,
            "Request completed"
        );
    }

    response
}
