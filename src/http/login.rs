//! Password-protected post submission.
//!
//! The backend answers a password submission with a near-blank page, so the
//! proxy forwards the submission, keeps the cookies it sets and sends the
//! client back where it came from with a synthetic redirect.

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
};

use crate::http::response::header_value_or;
use crate::rewrite::{HeaderRewriter, RewriteContext};

/// Builds the synthetic redirect for a password submission.
#[derive(Debug, Clone)]
pub struct LoginFlow {
    headers: HeaderRewriter,
}

impl LoginFlow {
    pub fn new(headers: HeaderRewriter) -> Self {
        Self { headers }
    }

    /// Redirect target: the client's `Referer` on the proxy origin, else the proxy root.
    pub fn target(&self, ctx: &RewriteContext) -> String {
        ctx.referer()
            .map(|referer| self.headers.rewrite_location(referer, ctx))
            .filter(|target| HeaderValue::from_str(target).is_ok())
            .unwrap_or_else(|| ctx.proxy_root())
    }

    /// Synthesize the 302 from the backend's response headers.
    ///
    /// The backend status and body are discarded; only `Set-Cookie` survives.
    pub fn respond(&self, upstream: &HeaderMap, ctx: &RewriteContext) -> Response {
        let target = self.target(ctx);
        let cookies: Vec<&str> = upstream
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();

        let body = redirect_page(&target);

        let mut headers = HeaderMap::new();
        headers.insert(header::LOCATION, header_value_or(&target, "/"));
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        for cookie in self.headers.rewrite_set_cookie(&cookies, ctx) {
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                headers.append(header::SET_COOKIE, value);
            }
        }

        tracing::debug!(location = %target, cookies = cookies.len(), "Password submission redirected");

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = StatusCode::FOUND;
        *response.headers_mut() = headers;
        response
    }
}

fn redirect_page(target: &str) -> String {
    let escaped = escape_html(target);
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">\
         <meta http-equiv=\"refresh\" content=\"0;url={escaped}\">\
         <title>Redirecting</title></head>\
         <body><p>Redirecting to <a href=\"{escaped}\">{escaped}</a></p></body></html>\n"
    )
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
