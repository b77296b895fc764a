//! Location and Set-Cookie rewriting.
//!
//! # Responsibilities
//! - Point `Location` redirects at the proxy origin
//! - Rebind `Set-Cookie` to the proxy host (drop `Domain`, optionally `Secure`)
//! - Drop `Content-Length` after body mutation; emission recomputes it
//!
//! # Design Decisions
//! - Each cookie is rewritten independently, order preserved
//! - Cookies that do not parse are forwarded unchanged, never dropped

use std::fmt;
use std::sync::Arc;

use axum::http::{header, HeaderMap, HeaderValue};

use crate::config::CookieConfig;
use crate::rewrite::context::RewriteContext;
use crate::rewrite::url::UrlRewriter;

/// One attribute of a `Set-Cookie` value.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Attribute {
    Domain(String),
    Path(String),
    Secure,
    SameSite(String),
    Other(String),
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::Domain(v) => write!(f, "Domain={}", v),
            Attribute::Path(v) => write!(f, "Path={}", v),
            Attribute::Secure => f.write_str("Secure"),
            Attribute::SameSite(v) => write!(f, "SameSite={}", v),
            Attribute::Other(raw) => f.write_str(raw),
        }
    }
}

/// Parsed view over a single `Set-Cookie` value.
///
/// Attributes the proxy does not care about are kept verbatim and in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieAttributes {
    pair: String,
    attributes: Vec<Attribute>,
}

impl CookieAttributes {
    /// Parse a `Set-Cookie` value. `None` when there is no `name=value` pair.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(';');
        let pair = parts.next()?.trim();
        let (name, _) = pair.split_once('=')?;
        if name.trim().is_empty() {
            return None;
        }

        let attributes = parts
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                let (key, value) = match part.split_once('=') {
                    Some((k, v)) => (k.trim(), Some(v.trim())),
                    None => (part, None),
                };
                match (key.to_ascii_lowercase().as_str(), value) {
                    ("domain", Some(v)) => Attribute::Domain(v.to_string()),
                    ("path", Some(v)) => Attribute::Path(v.to_string()),
                    ("secure", None) => Attribute::Secure,
                    ("samesite", Some(v)) => Attribute::SameSite(v.to_string()),
                    _ => Attribute::Other(part.to_string()),
                }
            })
            .collect();

        Some(Self {
            pair: pair.to_string(),
            attributes,
        })
    }

    pub fn path(&self) -> Option<&str> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::Path(v) => Some(v.as_str()),
            _ => None,
        })
    }

    pub fn secure(&self) -> bool {
        self.attributes.iter().any(|a| matches!(a, Attribute::Secure))
    }

    pub fn remove_domain(&mut self) {
        self.attributes.retain(|a| !matches!(a, Attribute::Domain(_)));
    }

    /// Drop `Secure`; returns whether it was present.
    ///
    /// `SameSite=None` without `Secure` is rejected by browsers, so it
    /// becomes `SameSite=Lax`.
    pub fn remove_secure(&mut self) -> bool {
        let had_secure = self.secure();
        self.attributes.retain(|a| !matches!(a, Attribute::Secure));
        if had_secure {
            for attribute in &mut self.attributes {
                if let Attribute::SameSite(v) = attribute {
                    if v.eq_ignore_ascii_case("none") {
                        *v = "Lax".to_string();
                    }
                }
            }
        }
        had_secure
    }

    pub fn set_default_path(&mut self) {
        if self.path().is_none() {
            self.attributes.push(Attribute::Path("/".to_string()));
        }
    }
}

impl fmt::Display for CookieAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pair)?;
        for attribute in &self.attributes {
            write!(f, "; {}", attribute)?;
        }
        Ok(())
    }
}

/// Rewrites redirect and cookie headers for the proxy origin.
#[derive(Debug, Clone)]
pub struct HeaderRewriter {
    urls: Arc<UrlRewriter>,
    cookies: CookieConfig,
}

impl HeaderRewriter {
    pub fn new(urls: Arc<UrlRewriter>, cookies: CookieConfig) -> Self {
        Self { urls, cookies }
    }

    /// Rewrite a `Location` value.
    ///
    /// Backend origins become the proxy origin. On a plain-http proxy an
    /// `https://` URL that already names the proxy host is downgraded.
    pub fn rewrite_location(&self, location: &str, ctx: &RewriteContext) -> String {
        let rewritten = self.urls.rewrite(location, ctx);
        if !ctx.is_plaintext() {
            return rewritten;
        }

        let Some(rest) = strip_prefix_ignore_case(&rewritten, "https://") else {
            return rewritten;
        };
        let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
        if authority.eq_ignore_ascii_case(ctx.host()) {
            format!("http://{}", rest)
        } else {
            rewritten
        }
    }

    /// Rewrite a single `Set-Cookie` value.
    pub fn rewrite_cookie(&self, raw: &str, ctx: &RewriteContext) -> String {
        let Some(mut cookie) = CookieAttributes::parse(raw) else {
            tracing::debug!(cookie = %raw, "Unparseable Set-Cookie forwarded unchanged");
            return raw.to_string();
        };

        if self.cookies.strip_domain {
            cookie.remove_domain();
        }
        if self.cookies.strip_secure_on_http && ctx.is_plaintext() {
            cookie.remove_secure();
        }
        if self.cookies.default_path {
            cookie.set_default_path();
        }
        cookie.to_string()
    }

    /// Rewrite every `Set-Cookie` value, preserving order.
    pub fn rewrite_set_cookie<S: AsRef<str>>(&self, values: &[S], ctx: &RewriteContext) -> Vec<String> {
        values
            .iter()
            .map(|value| self.rewrite_cookie(value.as_ref(), ctx))
            .collect()
    }

    /// Apply Location and Set-Cookie rewriting to a header map in place.
    pub fn rewrite_headers(&self, headers: &mut HeaderMap, ctx: &RewriteContext) {
        if let Some(location) = headers.get(header::LOCATION).and_then(|v| v.to_str().ok()) {
            let rewritten = self.rewrite_location(location, ctx);
            if let Ok(value) = HeaderValue::from_str(&rewritten) {
                headers.insert(header::LOCATION, value);
            }
        }

        let cookies: Vec<HeaderValue> = headers.get_all(header::SET_COOKIE).iter().cloned().collect();
        if cookies.is_empty() {
            return;
        }
        headers.remove(header::SET_COOKIE);
        for original in cookies {
            let value = original
                .to_str()
                .ok()
                .map(|raw| self.rewrite_cookie(raw, ctx))
                .and_then(|rewritten| HeaderValue::from_str(&rewritten).ok())
                .unwrap_or(original);
            headers.append(header::SET_COOKIE, value);
        }
    }
}

/// Remove `Content-Length`; the emitter recomputes it from the final body.
pub fn strip_content_length(headers: &mut HeaderMap) {
    headers.remove(header::CONTENT_LENGTH);
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &value[prefix.len()..])
}
