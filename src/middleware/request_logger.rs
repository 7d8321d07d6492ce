use axum::{
    body::{Body, HttpBody},
    extract::State,
    http::{HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Instant;
use uuid::Uuid;

use crate::utils::sanitize::sanitize_json;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_BODY_LOG_SIZE: usize = 1024; // 1KB limit for body logging
/// Bodies above this are refused while body logging is on.
pub const MAX_BODY_READ_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLogConfig {
    pub log_body: bool,
}

pub async fn request_logger_middleware(
    State(config): State<RequestLogConfig>,
    mut req: Request<Body>,
    next: Next<Body>,
) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let header_value = HeaderValue::from_str(&request_id)
        .unwrap_or_else(|_| HeaderValue::from_static("invalid"));
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();

    req.headers_mut().insert(REQUEST_ID_HEADER, header_value.clone());

    if config.log_body {
        let (parts, mut body) = req.into_parts();
        let mut bytes = Vec::new();
        while let Some(chunk) = body.data().await {
            match chunk {
                Ok(chunk) if bytes.len() + chunk.len() <= MAX_BODY_READ_SIZE => {
                    bytes.extend_from_slice(&chunk)
                }
                Ok(_) => {
                    tracing::warn!(
                        request_id = %request_id,
                        method = %method,
                        uri = %uri,
                        limit = MAX_BODY_READ_SIZE,
                        "Request body too large"
                    );
                    return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
                }
                Err(e) => {
                    tracing::warn!(
                        request_id = %request_id,
                        method = %method,
                        uri = %uri,
                        error = %e,
                        "Failed to read request body"
                    );
                    return (StatusCode::BAD_REQUEST, "Failed to read request body").into_response();
                }
            }
        }

        tracing::info!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            body_size = bytes.len(),
            body = %describe_body(&bytes),
            "Incoming request"
        );

        req = Request::from_parts(parts, Body::from(bytes));
    } else {
        tracing::info!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            "Incoming request"
        );
    }

    let mut response = next.run(req).await;

    tracing::info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %response.status().as_u16(),
        latency_ms = start.elapsed().as_millis(),
        "Outgoing response"
    );

    response.headers_mut().insert(REQUEST_ID_HEADER, header_value);
    response
}

fn describe_body(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "[empty]".to_string();
    }
    if bytes.len() > MAX_BODY_LOG_SIZE {
        return format!("[{} bytes, not logged]", bytes.len());
    }
    match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(json) => serde_json::to_string(&sanitize_json(&json))
            .unwrap_or_else(|_| "[invalid json]".to_string()),
        Err(_) => format!("[non-json, {} bytes]", bytes.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware, routing::post, Router};
    use tower::ServiceExt;

    fn app(log_body: bool) -> Router {
        Router::new()
            .route("/test", post(|body: String| async move { body }))
            .layer(middleware::from_fn_with_state(
                RequestLogConfig { log_body },
                request_logger_middleware,
            ))
    }

    #[tokio::test]
    async fn test_request_logger_adds_request_id() {
        let response = app(false)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn keeps_caller_request_id() {
        let response = app(false)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/test")
                    .header(REQUEST_ID_HEADER, "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-42");
    }

    #[tokio::test]
    async fn body_logging_passes_body_through() {
        let mut response = app(true)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/test")
                    .body(Body::from(r#"{"walletAddress":"0xabc"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let mut echoed = Vec::new();
        while let Some(chunk) = response.body_mut().data().await {
            echoed.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(echoed, br#"{"walletAddress":"0xabc"}"#);
    }

    #[tokio::test]
    async fn body_past_read_limit_is_refused() {
        let response = app(true)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/test")
                    .body(Body::from(vec![b'a'; MAX_BODY_READ_SIZE + 1]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        // Without body logging the middleware leaves the body alone
        let response = app(false)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/test")
                    .body(Body::from(vec![b'a'; MAX_BODY_READ_SIZE + 1]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn oversized_bodies_are_summarised() {
        let big = vec![b'a'; MAX_BODY_LOG_SIZE + 1];
        assert_eq!(describe_body(&big), format!("[{} bytes, not logged]", big.len()));
        assert_eq!(describe_body(b"plain"), "[non-json, 5 bytes]");
    }
}
