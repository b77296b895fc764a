//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up the matching route for a request
//! - Fall back to the rewriting default when nothing matches
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan in priority order (acceptable for typical route counts)
//! - The login route is compiled ahead of every configured route
//! - Stable sort: equal priorities keep file order

use axum::body::Body;
use axum::http::Request;

use crate::config::{LoginConfig, RouteAction, RouteConfig};
use crate::routing::matcher::{
    AndMatcher, ExactPathMatcher, HostMatcher, Matcher, PathPrefixMatcher, QueryParamMatcher,
};

/// Name reported for requests that hit no configured route.
pub const DEFAULT_ROUTE: &str = "default";
/// Name of the compiled login route.
pub const LOGIN_ROUTE: &str = "login";

/// How a matched request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Rewrite,
    PassThrough,
    /// Password-protected post submission.
    Login,
}

impl From<RouteAction> for Dispatch {
    fn from(action: RouteAction) -> Self {
        match action {
            RouteAction::Rewrite => Dispatch::Rewrite,
            RouteAction::PassThrough => Dispatch::PassThrough,
        }
    }
}

/// Result of a route lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchedRoute<'a> {
    pub name: &'a str,
    pub dispatch: Dispatch,
}

#[derive(Debug)]
struct CompiledRoute {
    name: String,
    matcher: AndMatcher,
    dispatch: Dispatch,
}

/// Compiled route table.
#[derive(Debug)]
pub struct Router {
    routes: Vec<CompiledRoute>,
}

impl Router {
    /// Compile the route table.
    pub fn from_config(routes: &[RouteConfig], login: &LoginConfig) -> Self {
        let mut sorted: Vec<&RouteConfig> = routes.iter().collect();
        sorted.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut compiled = Vec::with_capacity(sorted.len() + 1);

        if login.enabled {
            compiled.push(CompiledRoute {
                name: LOGIN_ROUTE.to_string(),
                matcher: AndMatcher::new(vec![
                    Box::new(ExactPathMatcher::new(login.path.clone())),
                    Box::new(QueryParamMatcher::new(
                        login.query_param.clone(),
                        login.query_value.clone(),
                    )),
                ]),
                dispatch: Dispatch::Login,
            });
        }

        for route in sorted {
            let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();
            if let Some(host) = &route.host {
                matchers.push(Box::new(HostMatcher::new(host.clone())));
            }
            if let Some(prefix) = &route.path_prefix {
                matchers.push(Box::new(PathPrefixMatcher::new(prefix.clone())));
            }
            compiled.push(CompiledRoute {
                name: route.name.clone(),
                matcher: AndMatcher::new(matchers),
                dispatch: route.action.into(),
            });
        }

        tracing::debug!(routes = compiled.len(), "Route table compiled");
        Self { routes: compiled }
    }

    /// First matching route, or the rewriting default.
    pub fn match_request(&self, req: &Request<Body>) -> MatchedRoute<'_> {
        self.routes
            .iter()
            .find(|route| route.matcher.matches(req))
            .map(|route| MatchedRoute {
                name: &route.name,
                dispatch: route.dispatch,
            })
            .unwrap_or(MatchedRoute {
                name: DEFAULT_ROUTE,
                dispatch: Dispatch::Rewrite,
            })
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
