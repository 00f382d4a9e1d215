//! Process-wide configuration.
//!
//! Loaded from TOML. `vault_secret` supports `${ENV_VAR}` indirection so
//! the secret itself never has to live in the config file.

mod types;

use thiserror::Error;

pub use types::{Config, SanitizedConfig, StreamsConfig, WorkersConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("environment variable not set: {0}")]
    MissingEnvVar(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Parse and validate a config from its TOML source.
pub fn load_config_from_str(source: &str) -> Result<Config, ConfigError> {
    let mut config: Config = toml::from_str(source)?;
    config.vault_secret = expand_env(&config.vault_secret)?;
    validate_config(&config)?;
    Ok(config)
}

/// Expand a `${ENV_VAR}` reference, passing plain values through.
fn expand_env(value: &str) -> Result<String, ConfigError> {
    let Some(name) = value
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    else {
        return Ok(value.to_string());
    };
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

/// Validate invariants the type system can't.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.vault_secret.is_empty() {
        return Err(ConfigError::Invalid("vault_secret must not be empty".to_string()));
    }
    if config.streams.indexer_max_timeout_ms == 0 {
        return Err(ConfigError::Invalid(
            "streams.indexer_max_timeout_ms must be positive".to_string(),
        ));
    }
    for name in &config.workers.disabled {
        if !crate::worker::WORKER_NAMES.contains(&name.as_str()) {
            return Err(ConfigError::Invalid(format!("unknown worker name: {name}")));
        }
    }
    Ok(())
}
