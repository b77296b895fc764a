//! Outbound client for the mirrored backend.
//!
//! # Responsibilities
//! - Map the inbound URI onto the backend origin
//! - Apply the outbound header policy
//! - Bound the wait for response headers
//!
//! # Design Decisions
//! - Redirects are never followed: the client must see them, rewritten
//! - No automatic decompression; the interceptor owns content codings
//! - One attempt per request, no retries

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Bytes,
    http::{header, HeaderMap, HeaderValue, Method, Uri},
};

use crate::config::BackendConfig;
use crate::http::request::X_REQUEST_ID;
use crate::http::response::{strip_hop_by_hop, ProxyError};
use crate::rewrite::{BackendOrigin, RewriteContext};

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// HTTP client bound to one backend origin.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    origin: BackendOrigin,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(origin: BackendOrigin, config: &BackendConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            origin,
            timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    /// Headers sent to the backend for an inbound request.
    ///
    /// `force_identity` asks the backend for an uncompressed body.
    pub fn outbound_headers(
        &self,
        inbound: &HeaderMap,
        ctx: &RewriteContext,
        client_ip: Option<SocketAddr>,
        force_identity: bool,
    ) -> HeaderMap {
        let mut headers = inbound.clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        if force_identity {
            headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        }

        for name in [header::ORIGIN, header::REFERER] {
            let mapped = headers
                .get(&name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| ctx.to_backend(v, &self.origin))
                .and_then(|v| HeaderValue::from_str(&v).ok());
            if let Some(value) = mapped {
                headers.insert(name, value);
            }
        }

        if let Some(addr) = client_ip {
            let forwarded = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
                Some(existing) => format!("{}, {}", existing, addr.ip()),
                None => addr.ip().to_string(),
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded) {
                headers.insert(X_FORWARDED_FOR, value);
            }
        }

        headers
    }

    /// Send the request and wait for the backend's response headers.
    pub async fn forward(
        &self,
        method: Method,
        uri: &Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<reqwest::Response, ProxyError> {
        let url = self.origin.join(uri);
        let request_id = headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();

        tracing::debug!(
            request_id = %request_id,
            method = %method,
            url = %url,
            "Forwarding to backend"
        );

        let send = self
            .client
            .request(method, url)
            .headers(headers)
            .body(body)
            .send();

        match tokio::time::timeout(self.timeout, send).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(ProxyError::from_send(e, self.timeout)),
            Err(_) => Err(ProxyError::BackendTimeout(self.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::ProxyScheme;

    fn client() -> UpstreamClient {
        UpstreamClient::new(
            BackendOrigin::parse("https://origin.example").unwrap(),
            &BackendConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn outbound_header_policy() {
        let ctx = RewriteContext::new(ProxyScheme::Http, "mirror.test");
        let mut inbound = HeaderMap::new();
        inbound.insert(header::HOST, HeaderValue::from_static("mirror.test"));
        inbound.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));
        inbound.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        inbound.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip, br"));
        inbound.insert(header::ORIGIN, HeaderValue::from_static("http://mirror.test"));
        inbound.insert(header::REFERER, HeaderValue::from_static("http://mirror.test/post?p=1"));
        inbound.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        inbound.insert(header::COOKIE, HeaderValue::from_static("wp-postpass_x=1"));

        let addr: SocketAddr = "192.0.2.7:5555".parse().unwrap();
        let out = client().outbound_headers(&inbound, &ctx, Some(addr), true);

        assert!(out.get(header::HOST).is_none());
        assert!(out.get(header::CONTENT_LENGTH).is_none());
        assert!(out.get(header::CONNECTION).is_none());
        assert_eq!(out[header::ACCEPT_ENCODING], "identity");
        assert_eq!(out[header::ORIGIN], "https://origin.example");
        assert_eq!(out[header::REFERER], "https://origin.example/post?p=1");
        assert_eq!(out["x-forwarded-for"], "10.0.0.1, 192.0.2.7");
        assert_eq!(out[header::COOKIE], "wp-postpass_x=1");
    }

    #[test]
    fn pass_through_keeps_client_encoding_and_foreign_referer() {
        let ctx = RewriteContext::new(ProxyScheme::Http, "mirror.test");
        let mut inbound = HeaderMap::new();
        inbound.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        inbound.insert(header::REFERER, HeaderValue::from_static("https://search.example/?q=x"));

        let out = client().outbound_headers(&inbound, &ctx, None, false);

        assert_eq!(out[header::ACCEPT_ENCODING], "gzip");
        assert_eq!(out[header::REFERER], "https://search.example/?q=x");
        assert!(out.get("x-forwarded-for").is_none());
    }
}
