//! Response handling and error mapping.
//!
//! # Responsibilities
//! - Map proxy failures to HTTP status codes with a JSON body
//! - Strip hop-by-hop headers from backend responses
//! - Render caught panics as 500 responses
//!
//! # Design Decisions
//! - Backend failures are answered once, never retried
//! - Backend timeouts result in 504 Gateway Timeout
//! - Fault details in 500 bodies only when explicitly exposed

use std::any::Any;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failures surfaced to the client.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Connection to the backend could not be made or broke before headers.
    #[error("backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("backend did not respond within {0:?}")]
    BackendTimeout(Duration),

    /// Backend body stream failed while being buffered.
    #[error("backend response body failed: {0}")]
    UpstreamBody(String),

    #[error("backend response exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("request body rejected: {0}")]
    RequestBody(String),

    #[error("internal fault: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Classify a reqwest failure while waiting for response headers.
    pub fn from_send(error: reqwest::Error, timeout: Duration) -> Self {
        if error.is_timeout() {
            ProxyError::BackendTimeout(timeout)
        } else {
            ProxyError::BackendUnreachable(error_chain(&error))
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::BackendUnreachable(_)
            | ProxyError::UpstreamBody(_)
            | ProxyError::BodyTooLarge { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::BackendTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::RequestBody(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::BackendUnreachable(_) => "unreachable",
            ProxyError::BackendTimeout(_) => "timeout",
            ProxyError::UpstreamBody(_) => "body",
            ProxyError::BodyTooLarge { .. } => "too_large",
            ProxyError::RequestBody(_) => "request_body",
            ProxyError::Internal(_) => "internal",
        }
    }

    /// Render the error; internal details are elided unless `expose_details`.
    pub fn to_response(&self, expose_details: bool) -> Response {
        let status = self.status();
        let message = match self {
            ProxyError::Internal(_) if !expose_details => "An internal error occurred".to_string(),
            other => other.to_string(),
        };
        error_response(status, message)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

fn error_response(status: StatusCode, message: String) -> Response {
    let body = ErrorBody {
        error: status.canonical_reason().unwrap_or("Error"),
        message,
    };
    (status, Json(body)).into_response()
}

/// Response for a panic caught by the middleware stack.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>, expose_details: bool) -> Response<Body> {
    let detail = panic
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_else(|| "unknown panic".to_string());

    tracing::error!(panic = %detail, "Handler panicked");
    ProxyError::Internal(detail).to_response(expose_details)
}

const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove hop-by-hop headers, including any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

/// Build a header value, falling back when the input is not a valid value.
pub fn header_value_or(value: &str, fallback: &'static str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static(fallback))
}

/// Flatten an error and its sources into one line.
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}
