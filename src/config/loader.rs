//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Backend origin URL.
pub const ENV_BACKEND_ORIGIN: &str = "MIRROR_BACKEND_ORIGIN";
/// Full listen address.
pub const ENV_LISTEN: &str = "MIRROR_LISTEN";
/// Listen port only; keeps the configured bind host.
pub const ENV_PORT: &str = "MIRROR_PORT";
/// Log level override.
pub const ENV_LOG_LEVEL: &str = "MIRROR_LOG_LEVEL";
/// Deployment flavour; `production` hides fault details.
pub const ENV_MODE: &str = "MIRROR_ENV";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn read_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Build the final configuration: optional file, then environment overrides,
/// then validation.
pub fn resolve_config(path: Option<&Path>) -> Result<ProxyConfig, ConfigError> {
    let mut config = match path {
        Some(path) => read_config(path)?,
        None => ProxyConfig::default(),
    };

    apply_env_overrides(&mut config, std::env::vars());
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Layer environment variables over a configuration.
///
/// Unknown variables are ignored; values are not validated here.
pub fn apply_env_overrides<I, K, V>(config: &mut ProxyConfig, vars: I)
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    for (key, value) in vars {
        let value = value.into();
        match key.as_ref() {
            ENV_BACKEND_ORIGIN => config.backend.origin = value,
            ENV_LISTEN => config.listener.bind_address = value,
            ENV_PORT => {
                let host = config
                    .listener
                    .bind_address
                    .rsplit_once(':')
                    .map(|(host, _)| host.to_string())
                    .unwrap_or_else(|| "0.0.0.0".to_string());
                config.listener.bind_address = format!("{}:{}", host, value);
            }
            ENV_LOG_LEVEL => config.observability.log_level = value,
            ENV_MODE => {
                config.observability.expose_errors = !value.eq_ignore_ascii_case("production");
            }
            _ => {}
        }
    }
}
