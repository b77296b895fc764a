//! Backend origin and per-request rewrite context.

use axum::http::{header, HeaderMap, Uri};
use thiserror::Error;
use url::Url;

use crate::config::{PublicScheme, RewriteConfig};

/// Why a backend origin string was rejected.
#[derive(Debug, Error)]
pub enum OriginError {
    #[error("invalid URL: {0}")]
    Invalid(#[from] url::ParseError),

    #[error("scheme '{0}' is not http or https")]
    UnsupportedScheme(String),

    #[error("URL has no host")]
    MissingHost,

    #[error("origin must not carry a path, query or fragment (got '{0}')")]
    NotAnOrigin(String),
}

/// Scheme and authority of the mirrored site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOrigin {
    url: Url,
    authority: String,
}

impl BackendOrigin {
    /// Parse an absolute `http(s)://host[:port]` origin.
    pub fn parse(origin: &str) -> Result<Self, OriginError> {
        let url = Url::parse(origin.trim())?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(OriginError::UnsupportedScheme(url.scheme().to_string()));
        }
        let host = url.host_str().ok_or(OriginError::MissingHost)?;
        if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
            return Err(OriginError::NotAnOrigin(origin.to_string()));
        }

        let authority = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        Ok(Self { url, authority })
    }

    /// `http` or `https`.
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Host with the port when it is not the scheme default.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// `scheme://authority` without a trailing slash.
    pub fn origin(&self) -> String {
        format!("{}://{}", self.scheme(), self.authority)
    }

    /// Absolute backend URL for an inbound path and query.
    pub fn join(&self, uri: &Uri) -> Url {
        let mut url = self.url.clone();
        url.set_path(uri.path());
        url.set_query(uri.query());
        url
    }
}

/// Scheme the client used to reach the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyScheme {
    Http,
    Https,
}

impl ProxyScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyScheme::Http => "http",
            ProxyScheme::Https => "https",
        }
    }
}

/// Everything the rewrite pass needs to know about the client side.
///
/// Built once per request and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteContext {
    scheme: ProxyScheme,
    host: String,
    proxy_origin: String,
    referer_override: Option<String>,
}

impl RewriteContext {
    /// Context for a client reaching the proxy at `scheme://host`.
    pub fn new(scheme: ProxyScheme, host: impl Into<String>) -> Self {
        let host = host.into();
        let proxy_origin = format!("{}://{}", scheme.as_str(), host);
        Self {
            scheme,
            host,
            proxy_origin,
            referer_override: None,
        }
    }

    /// Attach the client's `Referer`.
    pub fn with_referer(mut self, referer: Option<String>) -> Self {
        self.referer_override = referer;
        self
    }

    /// Derive the context from an inbound request.
    ///
    /// The host comes from `Host`, then the request URI authority (HTTP/2),
    /// then `fallback_host`.
    pub fn from_request(
        headers: &HeaderMap,
        uri: &Uri,
        config: &RewriteConfig,
        fallback_host: &str,
    ) -> Self {
        let host = headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
            .or_else(|| uri.authority().map(|a| a.to_string()))
            .unwrap_or_else(|| fallback_host.to_string());

        let scheme = match config.public_scheme {
            PublicScheme::Http => ProxyScheme::Http,
            PublicScheme::Https => ProxyScheme::Https,
            PublicScheme::Auto => {
                let forwarded_https = config.trust_forwarded_proto
                    && headers
                        .get("x-forwarded-proto")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.split(',').next())
                        .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"));
                if forwarded_https {
                    ProxyScheme::Https
                } else {
                    ProxyScheme::Http
                }
            }
        };

        let referer = headers
            .get(header::REFERER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Self::new(scheme, host).with_referer(referer)
    }

    pub fn scheme(&self) -> ProxyScheme {
        self.scheme
    }

    /// The `Host` value the client used.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// `scheme://host` of the proxy.
    pub fn proxy_origin(&self) -> &str {
        &self.proxy_origin
    }

    /// Proxy origin with a trailing slash.
    pub fn proxy_root(&self) -> String {
        format!("{}/", self.proxy_origin)
    }

    pub fn referer(&self) -> Option<&str> {
        self.referer_override.as_deref()
    }

    /// True when the client talks plain http to the proxy.
    pub fn is_plaintext(&self) -> bool {
        self.scheme == ProxyScheme::Http
    }

    /// Map an absolute URL on the proxy host back onto the backend origin.
    ///
    /// Returns `None` for URLs on any other host.
    pub fn to_backend(&self, value: &str, backend: &BackendOrigin) -> Option<String> {
        let (_, rest) = value.split_once("://")?;
        let host = rest.get(..self.host.len())?;
        if !host.eq_ignore_ascii_case(&self.host) {
            return None;
        }
        let tail = &rest[self.host.len()..];
        if !(tail.is_empty() || tail.starts_with(['/', '?', '#'])) {
            return None;
        }
        Some(format!("{}{}", backend.origin(), tail))
    }
}
