//! Route matching logic.
//!
//! # Responsibilities
//! - Match host header (exact match, case-insensitive)
//! - Match path prefix or exact path (case-sensitive)
//! - Match a query parameter value
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - Host matching is case-insensitive, port included when the client sent one
//! - Path matching is case-sensitive
//! - Empty condition = always matches (wildcard)
//! - No regex to guarantee O(n) matching

use axum::body::Body;
use axum::http::{header, Request};

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, req: &Request<Body>) -> bool;
}

/// Matches the Host header.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    expected_host: String,
}

impl HostMatcher {
    /// The host is normalized to lowercase for case-insensitive matching.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            expected_host: host.into().to_lowercase(),
        }
    }
}

impl Matcher for HostMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        req.headers()
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
            .or_else(|| req.uri().authority().map(|a| a.to_string()))
            .is_some_and(|h| h.eq_ignore_ascii_case(&self.expected_host))
    }
}

/// Matches the request path prefix.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        req.uri().path().starts_with(&self.prefix)
    }
}

/// Matches one path exactly.
#[derive(Debug, Clone)]
pub struct ExactPathMatcher {
    path: String,
}

impl ExactPathMatcher {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl Matcher for ExactPathMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        req.uri().path() == self.path
    }
}

/// Matches when the query string carries `name=value`.
///
/// The query is form-decoded, so `action=post%70ass` matches `postpass`.
#[derive(Debug, Clone)]
pub struct QueryParamMatcher {
    name: String,
    value: String,
}

impl QueryParamMatcher {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl Matcher for QueryParamMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        let Some(query) = req.uri().query() else {
            return false;
        };
        url::form_urlencoded::parse(query.as_bytes()).any(|(k, v)| k == self.name && v == self.value)
    }
}

/// Combines multiple matchers with AND semantics.
#[derive(Debug)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        self.matchers.iter().all(|m| m.matches(req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_matcher() {
        let matcher = HostMatcher::new("mirror.test:3000");

        let req1 = Request::builder()
            .header("Host", "mirror.test:3000")
            .body(Body::default())
            .unwrap();
        assert!(matcher.matches(&req1));

        let req2 = Request::builder()
            .header("Host", "MIRROR.TEST:3000")
            .body(Body::default())
            .unwrap();
        assert!(matcher.matches(&req2)); // Case insensitive

        let req3 = Request::builder()
            .header("Host", "mirror.test")
            .body(Body::default())
            .unwrap();
        assert!(!matcher.matches(&req3));
    }

    #[test]
    fn test_path_matcher() {
        let matcher = PathPrefixMatcher::new("/wp-content/uploads");

        let req1 = Request::builder()
            .uri("http://mirror.test/wp-content/uploads/2024/a.png")
            .body(Body::default())
            .unwrap();
        assert!(matcher.matches(&req1));

        let req2 = Request::builder()
            .uri("http://mirror.test/wp-content/themes/style.css")
            .body(Body::default())
            .unwrap();
        assert!(!matcher.matches(&req2));
    }

    #[test]
    fn test_exact_path_and_query() {
        let matcher = AndMatcher::new(vec![
            Box::new(ExactPathMatcher::new("/wp-login.php")),
            Box::new(QueryParamMatcher::new("action", "postpass")),
        ]);

        let hit = Request::builder()
            .uri("/wp-login.php?foo=1&action=post%70ass")
            .body(Body::default())
            .unwrap();
        assert!(matcher.matches(&hit));

        let wrong_action = Request::builder()
            .uri("/wp-login.php?action=login")
            .body(Body::default())
            .unwrap();
        assert!(!matcher.matches(&wrong_action));

        let sub_path = Request::builder()
            .uri("/wp-login.php/extra?action=postpass")
            .body(Body::default())
            .unwrap();
        assert!(!matcher.matches(&sub_path));

        let no_query = Request::builder()
            .uri("/wp-login.php")
            .body(Body::default())
            .unwrap();
        assert!(!matcher.matches(&no_query));
    }
}
