//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the mirroring proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// The origin being mirrored.
    pub backend: BackendConfig,

    /// Body rewriting settings.
    pub rewrite: RewriteConfig,

    /// Set-Cookie rewriting policy.
    pub cookies: CookieConfig,

    /// Password-submission special case.
    pub login: LoginConfig,

    /// Declarative route table.
    pub routes: Vec<RouteConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
        }
    }
}

/// Backend origin configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Scheme and host of the mirrored site (e.g., "https://origin.example").
    pub origin: String,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Time allowed for the backend to answer a single request, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            origin: "https://example.com".to_string(),
            connect_timeout_secs: 5,
            request_timeout_secs: 30,
        }
    }
}

/// Scheme the proxy is reached over by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PublicScheme {
    /// Infer from `X-Forwarded-Proto` (when trusted), else plain http.
    #[default]
    Auto,
    Http,
    Https,
}

/// Body rewriting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RewriteConfig {
    /// Scheme used when building the proxy origin.
    pub public_scheme: PublicScheme,

    /// Honour `X-Forwarded-Proto` when `public_scheme` is `auto`.
    pub trust_forwarded_proto: bool,

    /// Largest backend body that will be buffered for rewriting.
    pub max_body_bytes: usize,

    /// Largest client request body forwarded to the backend.
    pub max_request_body_bytes: usize,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            public_scheme: PublicScheme::Auto,
            trust_forwarded_proto: true,
            max_body_bytes: 10 * 1024 * 1024,
            max_request_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Set-Cookie rewriting policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Remove `Domain=` so cookies bind to the proxy host.
    pub strip_domain: bool,

    /// Remove `Secure` when the proxy is served over plain http.
    pub strip_secure_on_http: bool,

    /// Append `Path=/` when the backend sent no path.
    pub default_path: bool,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            strip_domain: true,
            strip_secure_on_http: true,
            default_path: true,
        }
    }
}

/// Password-submission endpoint that gets a synthesized redirect.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoginConfig {
    /// Enable the special case.
    pub enabled: bool,

    /// Exact request path.
    pub path: String,

    /// Query parameter carrying the action.
    pub query_param: String,

    /// Value of `query_param` that marks a password submission.
    pub query_value: String,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/wp-login.php".to_string(),
            query_param: "action".to_string(),
            query_value: "postpass".to_string(),
        }
    }
}

/// What the proxy does with a matched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RouteAction {
    /// Buffer, decode, rewrite and re-encode text bodies.
    #[default]
    Rewrite,
    /// Stream the body untouched; only Location and Set-Cookie are rewritten.
    PassThrough,
}

/// Route configuration mapping requests to an action.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Host header to match (exact match).
    pub host: Option<String>,

    /// Path prefix to match.
    pub path_prefix: Option<String>,

    /// Action applied to matching requests.
    #[serde(default)]
    pub action: RouteAction,

    /// Route priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 60 }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Include fault details in 500 responses (development setups).
    pub expose_errors: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
            expose_errors: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_uses_defaults() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [backend]
            origin = "https://origin.example"
            "#,
        )
        .unwrap();

        assert_eq!(config.backend.origin, "https://origin.example");
        assert_eq!(config.listener.bind_address, "0.0.0.0:3000");
        assert_eq!(config.rewrite.public_scheme, PublicScheme::Auto);
        assert!(config.login.enabled);
        assert!(config.routes.is_empty());
    }

    #[test]
    fn routes_parse_actions() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [[routes]]
            name = "api"
            path_prefix = "/v1"
            action = "pass_through"
            priority = 10

            [[routes]]
            name = "pages"
            path_prefix = "/"
            "#,
        )
        .unwrap();

        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[0].action, RouteAction::PassThrough);
        assert_eq!(config.routes[1].action, RouteAction::Rewrite);
        assert_eq!(config.routes[1].priority, 0);
    }
}
