//! Response interceptor.
//!
//! # Per-request flow
//! ```text
//! AwaitingHeaders ──(binary / HEAD / 204 / 304)──▶ PassThrough (stream, headers rewritten)
//!        │
//!        ▼
//! BufferingBody ──(backend reset / over limit)──▶ 502, (stalled body)──▶ 504
//!        │
//!        ▼
//! Classified → Rewriting: decode → rewrite URLs → rewrite headers → encode
//!        │                 (decode failure: original body, encode failure: plain body)
//!        ▼
//! Emitting (Content-Length recomputed) → Done
//! ```
//!
//! # Design Decisions
//! - The whole body is buffered: decompression and substitution need the
//!   complete stream since matches may straddle chunk boundaries
//! - Codec work runs on the blocking pool
//! - Nothing is written to the client before the body is complete, so any
//!   buffering failure can still be answered with a proxy error

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::Response,
};

use crate::http::response::{error_chain, strip_hop_by_hop, ProxyError};
use crate::observability::metrics;
use crate::rewrite::codec::{self, CodecError, Encoding};
use crate::rewrite::context::RewriteContext;
use crate::rewrite::headers::{strip_content_length, HeaderRewriter};
use crate::rewrite::url::UrlRewriter;

const TEXTUAL_MARKERS: [&str; 5] = ["text", "json", "xml", "javascript", "css"];

/// True when a `Content-Type` names a text format worth rewriting.
pub fn is_textual(content_type: Option<&HeaderValue>) -> bool {
    content_type
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.to_ascii_lowercase())
        .is_some_and(|ct| TEXTUAL_MARKERS.iter().any(|marker| ct.contains(marker)))
}

/// Why a body bypasses rewriting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassReason {
    /// HEAD, 1xx, 204 and 304 carry no body.
    HeaderOnly,
    Binary,
}

/// Decision taken once backend headers arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Rewrite,
    PassThrough(PassReason),
}

/// Decide how to handle a backend response from its status and headers.
pub fn classify(method: &Method, status: StatusCode, headers: &HeaderMap) -> Disposition {
    if method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return Disposition::PassThrough(PassReason::HeaderOnly);
    }
    if !is_textual(headers.get(header::CONTENT_TYPE)) {
        return Disposition::PassThrough(PassReason::Binary);
    }
    Disposition::Rewrite
}

/// What happened to a buffered body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteOutcome {
    Rewritten,
    Unchanged,
    DecodeFailed,
    EncodeFailed,
    UnsupportedEncoding,
}

impl RewriteOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewriteOutcome::Rewritten => "rewritten",
            RewriteOutcome::Unchanged => "unchanged",
            RewriteOutcome::DecodeFailed => "decode_failed",
            RewriteOutcome::EncodeFailed => "encode_failed",
            RewriteOutcome::UnsupportedEncoding => "unsupported_encoding",
        }
    }
}

/// A fully buffered backend response.
#[derive(Debug, Clone)]
pub struct InterceptedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Body as received; replaced by the rewritten body after the pass.
    pub raw_body: Bytes,
    /// `None` when the backend used a coding we cannot decode.
    pub content_encoding: Option<Encoding>,
    pub is_textual: bool,
}

impl InterceptedResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, raw_body: Bytes) -> Self {
        let content_encoding = match headers.get(header::CONTENT_ENCODING) {
            None => Some(Encoding::Identity),
            Some(value) => value.to_str().ok().and_then(Encoding::parse),
        };
        let is_textual = is_textual(headers.get(header::CONTENT_TYPE));

        Self {
            status,
            headers,
            raw_body,
            content_encoding,
            is_textual,
        }
    }

    /// Emit: final headers with a recomputed `Content-Length`, then the body.
    pub fn into_response(self) -> Response {
        let InterceptedResponse {
            status,
            mut headers,
            raw_body,
            ..
        } = self;

        strip_hop_by_hop(&mut headers);
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(raw_body.len()));

        let mut response = Response::new(Body::from(raw_body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

/// Result of the synchronous decode → rewrite → encode step.
#[derive(Debug)]
pub enum BodyTransform {
    /// No backend reference found; the original bytes stay.
    Unchanged,
    Rewritten(Vec<u8>),
    DecodeFailed(CodecError),
    /// Rewrite succeeded but re-encoding did not; carries the plain body.
    EncodeFailed { plain: Vec<u8>, error: CodecError },
}

/// Decode, rewrite and re-encode a body. CPU bound.
pub fn transform_body(
    urls: &UrlRewriter,
    ctx: &RewriteContext,
    raw: &[u8],
    encoding: Encoding,
    decode_limit: usize,
) -> BodyTransform {
    let plain = match codec::decode_limited(raw, encoding, decode_limit) {
        Ok(plain) => plain,
        Err(error) => return BodyTransform::DecodeFailed(error),
    };

    let rewritten = match urls.rewrite_bytes(&plain, ctx) {
        Cow::Borrowed(_) => return BodyTransform::Unchanged,
        Cow::Owned(rewritten) => rewritten,
    };

    match codec::encode(&rewritten, encoding) {
        Ok(encoded) => BodyTransform::Rewritten(encoded),
        Err(error) => BodyTransform::EncodeFailed {
            plain: rewritten,
            error,
        },
    }
}

/// Drives codec, URL engine and header rewriter for buffered responses.
#[derive(Debug)]
pub struct ResponseInterceptor {
    urls: Arc<UrlRewriter>,
    headers: HeaderRewriter,
    max_body_bytes: usize,
    body_timeout: Duration,
}

impl ResponseInterceptor {
    /// `body_timeout` bounds how long the backend may take to deliver the
    /// rest of a body once its headers arrived.
    pub fn new(
        urls: Arc<UrlRewriter>,
        headers: HeaderRewriter,
        max_body_bytes: usize,
        body_timeout: Duration,
    ) -> Self {
        Self {
            urls,
            headers,
            max_body_bytes,
            body_timeout,
        }
    }

    fn decode_limit(&self) -> usize {
        codec::DEFAULT_DECODE_LIMIT.max(self.max_body_bytes)
    }

    /// Handle a backend response on a rewriting route.
    pub async fn intercept(
        &self,
        method: &Method,
        upstream: reqwest::Response,
        ctx: &RewriteContext,
    ) -> Result<Response, ProxyError> {
        let status = upstream.status();

        if let Disposition::PassThrough(reason) = classify(method, status, upstream.headers()) {
            tracing::debug!(status = %status, reason = ?reason, "Body passed through");
            metrics::record_rewrite(match reason {
                PassReason::HeaderOnly => "header_only",
                PassReason::Binary => "binary",
            });
            return Ok(self.pass_through(upstream, ctx));
        }

        if upstream
            .content_length()
            .is_some_and(|len| len > self.max_body_bytes as u64)
        {
            return Err(ProxyError::BodyTooLarge {
                limit: self.max_body_bytes,
            });
        }

        let headers = upstream.headers().clone();
        let body = tokio::time::timeout(self.body_timeout, buffer_body(upstream, self.max_body_bytes))
            .await
            .map_err(|_| ProxyError::BackendTimeout(self.body_timeout))??;

        let (response, outcome) = self
            .rewrite(InterceptedResponse::new(status, headers, body), ctx)
            .await?;

        tracing::debug!(
            status = %status,
            outcome = outcome.as_str(),
            bytes = response.raw_body.len(),
            "Response rewritten"
        );
        metrics::record_rewrite(outcome.as_str());
        Ok(response.into_response())
    }

    /// Stream a backend response untouched apart from Location and Set-Cookie.
    pub fn pass_through(&self, upstream: reqwest::Response, ctx: &RewriteContext) -> Response {
        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);
        self.headers.rewrite_headers(&mut headers, ctx);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }

    /// Run the rewrite pass over a buffered response.
    pub async fn rewrite(
        &self,
        response: InterceptedResponse,
        ctx: &RewriteContext,
    ) -> Result<(InterceptedResponse, RewriteOutcome), ProxyError> {
        let InterceptedResponse {
            status,
            mut headers,
            raw_body,
            content_encoding,
            is_textual,
        } = response;

        self.headers.rewrite_headers(&mut headers, ctx);

        let emit = |headers: HeaderMap, body: Bytes, encoding: Option<Encoding>| InterceptedResponse {
            status,
            headers,
            raw_body: body,
            content_encoding: encoding,
            is_textual,
        };

        if !is_textual || raw_body.is_empty() {
            return Ok((emit(headers, raw_body, content_encoding), RewriteOutcome::Unchanged));
        }

        let Some(encoding) = content_encoding else {
            tracing::warn!(
                content_encoding = ?headers.get(header::CONTENT_ENCODING),
                "Unsupported content-encoding, body forwarded untouched"
            );
            return Ok((emit(headers, raw_body, None), RewriteOutcome::UnsupportedEncoding));
        };

        let urls = Arc::clone(&self.urls);
        let task_ctx = ctx.clone();
        let task_body = raw_body.clone();
        let limit = self.decode_limit();
        let transform = tokio::task::spawn_blocking(move || {
            transform_body(&urls, &task_ctx, &task_body, encoding, limit)
        })
        .await
        .map_err(|e| ProxyError::Internal(format!("rewrite task failed: {}", e)))?;

        let result = match transform {
            BodyTransform::Unchanged => (
                emit(headers, raw_body, Some(encoding)),
                RewriteOutcome::Unchanged,
            ),
            BodyTransform::Rewritten(body) => {
                strip_content_length(&mut headers);
                (
                    emit(headers, Bytes::from(body), Some(encoding)),
                    RewriteOutcome::Rewritten,
                )
            }
            BodyTransform::DecodeFailed(error) => {
                tracing::warn!(encoding = %encoding, error = %error, "Decode failed, forwarding original body");
                (
                    emit(headers, raw_body, Some(encoding)),
                    RewriteOutcome::DecodeFailed,
                )
            }
            BodyTransform::EncodeFailed { plain, error } => {
                tracing::warn!(encoding = %encoding, error = %error, "Re-encode failed, forwarding rewritten body uncompressed");
                headers.remove(header::CONTENT_ENCODING);
                strip_content_length(&mut headers);
                (
                    emit(headers, Bytes::from(plain), Some(Encoding::Identity)),
                    RewriteOutcome::EncodeFailed,
                )
            }
        };

        Ok(result)
    }
}

/// Accumulate the full backend body, refusing anything over `limit` bytes.
pub async fn buffer_body(mut upstream: reqwest::Response, limit: usize) -> Result<Bytes, ProxyError> {
    let mut body = Vec::with_capacity(
        upstream
            .content_length()
            .map_or(0, |len| len.min(limit as u64) as usize),
    );

    while let Some(chunk) = upstream
        .chunk()
        .await
        .map_err(|e| ProxyError::UpstreamBody(error_chain(&e)))?
    {
        if body.len() + chunk.len() > limit {
            return Err(ProxyError::BodyTooLarge { limit });
        }
        body.extend_from_slice(&chunk);
    }

    Ok(Bytes::from(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CookieConfig;
    use crate::rewrite::context::{BackendOrigin, ProxyScheme};

    fn interceptor() -> ResponseInterceptor {
        interceptor_with_limit(1024 * 1024)
    }

    fn interceptor_with_limit(max_body_bytes: usize) -> ResponseInterceptor {
        let urls = Arc::new(UrlRewriter::new(&BackendOrigin::parse("https://origin.example").unwrap()).unwrap());
        let headers = HeaderRewriter::new(Arc::clone(&urls), CookieConfig::default());
        ResponseInterceptor::new(urls, headers, max_body_bytes, Duration::from_secs(5))
    }

    fn upstream_html(body: Vec<u8>) -> reqwest::Response {
        let response = axum::http::Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/html")
            .body(body)
            .unwrap();
        reqwest::Response::from(response)
    }

    async fn assert_compressed_rewrite(encoding: Encoding) {
        let page = br#"<link href="//origin.example/s.css"><a href="https://origin.example/x">x</a>"#;
        let compressed = codec::encode(page, encoding).unwrap();
        let mut headers = html_headers(Some(encoding.as_str()));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(compressed.len()));

        let response = InterceptedResponse::new(StatusCode::OK, headers, Bytes::from(compressed));
        let (out, outcome) = interceptor().rewrite(response, &ctx()).await.unwrap();

        assert_eq!(outcome, RewriteOutcome::Rewritten);
        assert_eq!(out.headers[header::CONTENT_ENCODING], encoding.as_str());
        assert!(out.headers.get(header::CONTENT_LENGTH).is_none());
        let plain = codec::decode(&out.raw_body, encoding).unwrap();
        assert_eq!(
            plain,
            br#"<link href="//proxyhost/s.css"><a href="http://proxyhost/x">x</a>"#
        );
    }

    fn ctx() -> RewriteContext {
        RewriteContext::new(ProxyScheme::Http, "proxyhost")
    }

    fn html_headers(encoding: Option<&'static str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html; charset=UTF-8"));
        if let Some(encoding) = encoding {
            headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static(encoding));
        }
        headers
    }

    #[test]
    fn textual_classification() {
        for ct in ["text/html", "application/json", "application/xml", "application/javascript", "text/css"] {
            assert!(is_textual(Some(&HeaderValue::from_static(ct))), "{ct}");
        }
        assert!(!is_textual(Some(&HeaderValue::from_static("image/png"))));
        assert!(!is_textual(None));
    }

    #[test]
    fn classify_dispositions() {
        let html = html_headers(None);
        assert_eq!(classify(&Method::GET, StatusCode::OK, &html), Disposition::Rewrite);
        assert_eq!(
            classify(&Method::HEAD, StatusCode::OK, &html),
            Disposition::PassThrough(PassReason::HeaderOnly)
        );
        assert_eq!(
            classify(&Method::GET, StatusCode::NOT_MODIFIED, &html),
            Disposition::PassThrough(PassReason::HeaderOnly)
        );

        let mut png = HeaderMap::new();
        png.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
        assert_eq!(
            classify(&Method::GET, StatusCode::OK, &png),
            Disposition::PassThrough(PassReason::Binary)
        );
    }

    #[tokio::test]
    async fn gzip_body_is_rewritten_and_reencoded() {
        let page = br#"<a href="https://origin.example/x">x</a>"#;
        let gz = codec::encode(page, Encoding::Gzip).unwrap();
        let mut headers = html_headers(Some("gzip"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(gz.len()));

        let response = InterceptedResponse::new(StatusCode::OK, headers, Bytes::from(gz));
        let (out, outcome) = interceptor().rewrite(response, &ctx()).await.unwrap();

        assert_eq!(outcome, RewriteOutcome::Rewritten);
        assert_eq!(out.headers[header::CONTENT_ENCODING], "gzip");
        let plain = codec::decode(&out.raw_body, Encoding::Gzip).unwrap();
        assert_eq!(plain, br#"<a href="http://proxyhost/x">x</a>"#);

        let emitted = out.into_response();
        let length: usize = emitted.headers()[header::CONTENT_LENGTH].to_str().unwrap().parse().unwrap();
        let body = axum::body::to_bytes(emitted.into_body(), usize::MAX).await.unwrap();
        assert_eq!(length, body.len());
    }

    #[tokio::test]
    async fn deflate_body_is_rewritten_and_reencoded() {
        assert_compressed_rewrite(Encoding::Deflate).await;
    }

    #[tokio::test]
    async fn brotli_body_is_rewritten_and_reencoded() {
        assert_compressed_rewrite(Encoding::Brotli).await;
    }

    #[tokio::test]
    async fn declared_length_over_limit_is_refused() {
        let upstream = upstream_html(vec![b'a'; 64]);
        let err = interceptor_with_limit(16)
            .intercept(&Method::GET, upstream, &ctx())
            .await
            .unwrap_err();

        assert!(matches!(err, ProxyError::BodyTooLarge { limit: 16 }));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn buffering_stops_at_limit() {
        let err = buffer_body(upstream_html(vec![b'a'; 64]), 16).await.unwrap_err();
        assert!(matches!(err, ProxyError::BodyTooLarge { limit: 16 }));

        let body = buffer_body(upstream_html(vec![b'a'; 16]), 16).await.unwrap();
        assert_eq!(body.len(), 16);
    }

    #[tokio::test]
    async fn corrupt_body_is_forwarded_untouched() {
        let mut gz = codec::encode(br#"<a href="https://origin.example/x">x</a>"#, Encoding::Gzip).unwrap();
        gz.truncate(gz.len() / 2);
        let garbage = Bytes::from(gz);
        let response = InterceptedResponse::new(StatusCode::OK, html_headers(Some("gzip")), garbage.clone());

        let (out, outcome) = interceptor().rewrite(response, &ctx()).await.unwrap();

        assert_eq!(outcome, RewriteOutcome::DecodeFailed);
        assert_eq!(out.raw_body, garbage);
        assert_eq!(out.headers[header::CONTENT_ENCODING], "gzip");
    }

    #[tokio::test]
    async fn unsupported_encoding_is_forwarded_untouched() {
        let body = Bytes::from_static(b"opaque https://origin.example bytes");
        let response = InterceptedResponse::new(StatusCode::OK, html_headers(Some("zstd")), body.clone());

        let (out, outcome) = interceptor().rewrite(response, &ctx()).await.unwrap();

        assert_eq!(outcome, RewriteOutcome::UnsupportedEncoding);
        assert_eq!(out.raw_body, body);
    }

    #[tokio::test]
    async fn headers_rewritten_even_when_body_unchanged() {
        let mut headers = html_headers(None);
        headers.insert(header::LOCATION, HeaderValue::from_static("https://origin.example/moved"));
        headers.append(header::SET_COOKIE, HeaderValue::from_static("sid=1; Domain=origin.example; Secure"));
        let response = InterceptedResponse::new(StatusCode::FOUND, headers, Bytes::from_static(b"moved"));

        let (out, outcome) = interceptor().rewrite(response, &ctx()).await.unwrap();

        assert_eq!(outcome, RewriteOutcome::Unchanged);
        assert_eq!(out.raw_body, Bytes::from_static(b"moved"));
        assert_eq!(out.headers[header::LOCATION], "http://proxyhost/moved");
        assert_eq!(out.headers[header::SET_COOKIE], "sid=1; Path=/");
    }

    #[test]
    fn transform_identity_body() {
        let urls = UrlRewriter::new(&BackendOrigin::parse("https://origin.example").unwrap()).unwrap();
        let out = transform_body(
            &urls,
            &ctx(),
            b"fetch('https://origin.example/wp-json/')",
            Encoding::Identity,
            1024,
        );
        match out {
            BodyTransform::Rewritten(body) => assert_eq!(body, b"fetch('http://proxyhost/wp-json/')"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
