//! URL rewrite engine.
//!
//! Replaces references to the backend origin with the proxy origin using
//! host-anchored patterns. Passes, in order:
//!
//! 1. absolute URLs: `http(s)://backend` → proxy origin
//! 2. protocol-relative: `//backend` → `//<client host>`
//! 3. bare host as an attribute value: `href="backend/..."`, `src`, `action`, `data-src`
//! 4. bare host inside CSS `url(...)`, quoting preserved
//! 5. JSON-escaped: `https:\/\/backend` and `\/\/backend`
//! 6. percent-encoded: `https%3A%2F%2Fbackend` (redirect parameters)
//!
//! API and discovery endpoints need no rule of their own: pass 1 rewrites
//! them at the origin boundary and leaves the path intact.
//!
//! A match only counts when the bytes after the host cannot continue a host
//! name, so `backend.evil.com`, `backend:8443` and `backend%3A8443` are never
//! touched. The proxy origin never matches a rule, which makes the engine
//! idempotent.

use std::borrow::Cow;

use regex::bytes::{Captures, Regex};

use crate::rewrite::context::{BackendOrigin, RewriteContext};

/// Bytes that may continue a host (or host:port) and therefore break the
/// origin boundary.
fn is_host_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_' | b':')
}

/// True when `rest` starts with a host continuation, including a
/// percent-encoded port separator.
fn continues_host(rest: &[u8]) -> bool {
    match rest.first() {
        Some(&b) if is_host_byte(b) => true,
        Some(b'%') => rest.get(..3).is_some_and(|esc| esc.eq_ignore_ascii_case(b"%3A")),
        _ => false,
    }
}

#[derive(Debug, Clone, Copy)]
enum Render {
    ProxyOrigin,
    ProtocolRelative,
    Attribute,
    CssUrl,
    JsonEscaped,
    JsonEscapedRelative,
    PercentEncoded,
}

#[derive(Debug)]
struct Rule {
    name: &'static str,
    pattern: Regex,
    render: Render,
}

/// Compiled rewrite rules for one backend origin.
#[derive(Debug)]
pub struct UrlRewriter {
    prefilter: Regex,
    rules: Vec<Rule>,
}

impl UrlRewriter {
    /// Compile the rule set for `backend`.
    pub fn new(backend: &BackendOrigin) -> Result<Self, regex::Error> {
        let host = regex::escape(backend.authority());

        let specs: [(&'static str, String, Render); 8] = [
            ("absolute", format!(r"https?://{host}"), Render::ProxyOrigin),
            ("protocol_relative", format!(r"//{host}"), Render::ProtocolRelative),
            (
                "attribute",
                format!(r#"\b(?P<attr>data-src|href|src|action)(?P<eq>\s*=\s*)(?P<quote>["']?){host}"#),
                Render::Attribute,
            ),
            (
                "css_url",
                format!(r#"url\((?P<ws>\s*)(?P<quote>["']?){host}"#),
                Render::CssUrl,
            ),
            ("json_escaped", format!(r"https?:\\/\\/{host}"), Render::JsonEscaped),
            ("json_escaped_relative", format!(r"\\/\\/{host}"), Render::JsonEscapedRelative),
            ("percent_encoded", format!(r"https?%3A%2F%2F{host}"), Render::PercentEncoded),
            // Some encoders leave the colon alone.
            ("percent_encoded_colon", format!(r"https?:%2F%2F{host}"), Render::PercentEncoded),
        ];

        let rules = specs
            .into_iter()
            .map(|(name, pattern, render)| {
                Ok(Rule {
                    name,
                    pattern: Regex::new(&format!("(?i-u){pattern}"))?,
                    render,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(Self {
            prefilter: Regex::new(&format!("(?i-u){host}"))?,
            rules,
        })
    }

    /// Rewrite a text body.
    pub fn rewrite(&self, text: &str, ctx: &RewriteContext) -> String {
        match self.rewrite_bytes(text.as_bytes(), ctx) {
            Cow::Borrowed(_) => text.to_string(),
            Cow::Owned(bytes) => String::from_utf8(bytes)
                .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()),
        }
    }

    /// Rewrite a body without assuming any character encoding.
    ///
    /// Returns `Cow::Borrowed` when nothing matched.
    pub fn rewrite_bytes<'a>(&self, body: &'a [u8], ctx: &RewriteContext) -> Cow<'a, [u8]> {
        if !self.prefilter.is_match(body) {
            return Cow::Borrowed(body);
        }

        let mut current = Cow::Borrowed(body);
        for rule in &self.rules {
            if let Some(next) = self.apply(rule, &current, ctx) {
                tracing::trace!(rule = rule.name, "rewrite rule matched");
                current = Cow::Owned(next);
            }
        }
        current
    }

    fn apply(&self, rule: &Rule, input: &[u8], ctx: &RewriteContext) -> Option<Vec<u8>> {
        let mut out: Option<Vec<u8>> = None;
        let mut last = 0;

        for caps in rule.pattern.captures_iter(input) {
            let Some(m) = caps.get(0) else { continue };
            if continues_host(&input[m.end()..]) {
                continue;
            }

            let buf = out.get_or_insert_with(|| Vec::with_capacity(input.len() + 64));
            buf.extend_from_slice(&input[last..m.start()]);
            render(rule.render, &caps, ctx, buf);
            last = m.end();
        }

        out.map(|mut buf| {
            buf.extend_from_slice(&input[last..]);
            buf
        })
    }
}

fn render(kind: Render, caps: &Captures<'_>, ctx: &RewriteContext, out: &mut Vec<u8>) {
    let group = |name: &str| caps.name(name).map_or(&[][..], |m| m.as_bytes());

    match kind {
        Render::ProxyOrigin => out.extend_from_slice(ctx.proxy_origin().as_bytes()),
        Render::ProtocolRelative => {
            out.extend_from_slice(b"//");
            out.extend_from_slice(ctx.host().as_bytes());
        }
        Render::Attribute => {
            out.extend_from_slice(group("attr"));
            out.extend_from_slice(group("eq"));
            out.extend_from_slice(group("quote"));
            out.extend_from_slice(ctx.proxy_origin().as_bytes());
        }
        Render::CssUrl => {
            out.extend_from_slice(b"url(");
            out.extend_from_slice(group("ws"));
            out.extend_from_slice(group("quote"));
            out.extend_from_slice(ctx.proxy_origin().as_bytes());
        }
        Render::JsonEscaped => {
            out.extend_from_slice(ctx.proxy_origin().replace('/', r"\/").as_bytes());
        }
        Render::JsonEscapedRelative => {
            out.extend_from_slice(br"\/\/");
            out.extend_from_slice(ctx.host().as_bytes());
        }
        Render::PercentEncoded => {
            let encoded = ctx.proxy_origin().replace(':', "%3A").replace('/', "%2F");
            out.extend_from_slice(encoded.as_bytes());
        }
    }
}
