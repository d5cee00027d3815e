use axum::{
    body::{to_bytes, Body, HttpBody},
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Instant;

/// Bodies on these paths carry credentials and are never logged
const REDACTED_PATHS: &[&str] = &["/bridge/auth"];

const MAX_BODY_BYTES: usize = 64 * 1024;

/// Middleware that logs bridge requests and responses
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let redacted = REDACTED_PATHS.contains(&uri.path());
    let start = Instant::now();

    let (parts, body) = request.into_parts();

    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(request_id = %request_id, "Failed to read request body: {}", e);
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    let request_body = if redacted {
        format!("[redacted, {} bytes]", bytes.len())
    } else {
        truncate_body(&String::from_utf8_lossy(&bytes), 2000)
    };

    tracing::info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        body = %request_body,
        "→ Bridge request"
    );

    let request = Request::from_parts(parts, Body::from(bytes));
    let response = next.run(request).await;

    let status = response.status();

    // Bodies that may exceed the buffer limit pass through unlogged
    let fits = response
        .body()
        .size_hint()
        .upper()
        .is_some_and(|len| len <= MAX_BODY_BYTES as u64);
    if !fits {
        tracing::info!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            status = %status.as_u16(),
            latency_ms = %start.elapsed().as_millis(),
            "← Bridge response (body not logged)"
        );
        return response;
    }

    let (parts, body) = response.into_parts();

    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(request_id = %request_id, "Failed to read response body: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let response_body = truncate_body(&String::from_utf8_lossy(&bytes), 2000);
    let latency = start.elapsed();

    tracing::info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %status.as_u16(),
        latency_ms = %latency.as_millis(),
        body = %response_body,
        "← Bridge response"
    );

    Response::from_parts(parts, Body::from(bytes))
}

/// Truncate body for logging, adding ellipsis if truncated
fn truncate_body(body: &str, max_len: usize) -> String {
    let body = body.trim();
    if body.len() <= max_len {
        return body.to_string();
    }
    let mut end = max_len;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated, {} bytes total]", &body[..end], body.len())
}
