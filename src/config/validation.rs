//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Backend origin is an absolute http(s) URL with a host
//! - Validate value ranges (timeouts > 0, limits > 0, addresses parse)
//! - Route and login paths are absolute
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::rewrite::BackendOrigin;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("backend.origin: {0}")]
    BackendOrigin(String),

    #[error("listener.bind_address '{0}' is not a socket address")]
    BindAddress(String),

    #[error("observability.metrics_address '{0}' is not a socket address")]
    MetricsAddress(String),

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} '{path}' must start with '/'")]
    RelativePath { field: String, path: String },

    #[error("route '{0}' has neither host nor path_prefix")]
    EmptyRoute(String),

    #[error("login.query_param must not be empty")]
    EmptyLoginParam,
}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = BackendOrigin::parse(&config.backend.origin) {
        errors.push(ValidationError::BackendOrigin(e.to_string()));
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    let positive: [(&'static str, u64); 5] = [
        ("backend.connect_timeout_secs", config.backend.connect_timeout_secs),
        ("backend.request_timeout_secs", config.backend.request_timeout_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
        ("rewrite.max_body_bytes", config.rewrite.max_body_bytes as u64),
        ("rewrite.max_request_body_bytes", config.rewrite.max_request_body_bytes as u64),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    for route in &config.routes {
        if route.host.is_none() && route.path_prefix.is_none() {
            errors.push(ValidationError::EmptyRoute(route.name.clone()));
        }
        if let Some(prefix) = &route.path_prefix {
            if !prefix.starts_with('/') {
                errors.push(ValidationError::RelativePath {
                    field: format!("routes.{}.path_prefix", route.name),
                    path: prefix.clone(),
                });
            }
        }
    }

    if config.login.enabled {
        if !config.login.path.starts_with('/') {
            errors.push(ValidationError::RelativePath {
                field: "login.path".to_string(),
                path: config.login.path.clone(),
            });
        }
        if config.login.query_param.is_empty() {
            errors.push(ValidationError::EmptyLoginParam);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
