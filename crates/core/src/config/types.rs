use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Secret used to encrypt indexer credentials at rest.
    /// Can use ${ENV_VAR} syntax to read from environment.
    pub vault_secret: String,
    #[serde(default)]
    pub streams: StreamsConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
}

/// Stream search configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamsConfig {
    /// Upper bound on how long a stream request waits for indexer
    /// fan-out before returning what has arrived (milliseconds).
    #[serde(default = "default_indexer_max_timeout_ms")]
    pub indexer_max_timeout_ms: u64,
    /// Pull long-term store updates in the background instead of
    /// blocking the request.
    #[serde(default)]
    pub lazy_pull: bool,
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            indexer_max_timeout_ms: default_indexer_max_timeout_ms(),
            lazy_pull: false,
        }
    }
}

impl StreamsConfig {
    pub fn indexer_max_timeout(&self) -> Duration {
        Duration::from_millis(self.indexer_max_timeout_ms)
    }
}

fn default_indexer_max_timeout_ms() -> u64 {
    5_000
}

/// Background worker configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WorkersConfig {
    /// Worker names that must not be scheduled.
    #[serde(default)]
    pub disabled: Vec<String>,
}

impl WorkersConfig {
    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled.iter().any(|n| n == name)
    }
}

/// Sanitized config for external surfaces (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub vault_secret_configured: bool,
    pub streams: StreamsConfig,
    pub workers: WorkersConfig,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            vault_secret_configured: !config.vault_secret.is_empty(),
            streams: config.streams.clone(),
            workers: config.workers.clone(),
        }
    }
}
