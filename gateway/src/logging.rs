use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

/// Liveness checks hit on a fixed schedule by orchestrators.
fn is_probe(path: &str) -> bool {
    path == "/health"
}

/// Middleware that logs HTTP requests at INFO level.
///
/// Health probes are logged at DEBUG so they don't drown out predictions.
pub async fn request_logger(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    let status = response.status();
    let duration = start.elapsed();

    if is_probe(&path) {
        tracing::debug!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "HTTP request"
        );
    } else {
        tracing::info!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "HTTP request"
        );
    }

    response
}
