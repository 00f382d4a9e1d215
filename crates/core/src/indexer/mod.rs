//! Indexer records.
//!
//! An indexer is a remote torznab-speaking search provider. Records are
//! persisted with the credential encrypted at rest; `(kind, id)` is the
//! primary key and `"{kind}:{id}"` the composite id used on external
//! surfaces.

mod credential;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::torznab::TorznabClient;

pub use credential::CredentialError;

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("invalid composite id format: expected {{kind}}:{{id}}")]
    InvalidCompositeId,
    #[error("invalid indexer kind: {0}")]
    InvalidKind(String),
    #[error("invalid torznab url: {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("failed to build client: {0}")]
    Client(String),
}

/// The kind of torznab backend an indexer record points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexerKind {
    Jackett,
}

impl IndexerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IndexerKind::Jackett => "jackett",
        }
    }

    pub fn parse(value: &str) -> Result<Self, IndexerError> {
        match value {
            "jackett" => Ok(IndexerKind::Jackett),
            other => Err(IndexerError::InvalidKind(other.to_string())),
        }
    }
}

impl fmt::Display for IndexerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split a `"{kind}:{id}"` composite id.
pub fn parse_composite_id(composite: &str) -> Result<(IndexerKind, String), IndexerError> {
    let (kind, id) = composite
        .split_once(':')
        .ok_or(IndexerError::InvalidCompositeId)?;
    Ok((IndexerKind::parse(kind)?, id.to_string()))
}

static TORZNAB_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?P<base_url>https?://.+?)/api/v2\.0/indexers/(?P<indexer_id>[^/]+)/results/torznab/?$")
        .unwrap()
});

/// The two halves of a Jackett torznab feed URL.
///
/// The compact encoded form (`scheme:host::indexer`) doubles as the stable
/// record id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorznabUrl {
    pub base_url: String,
    pub indexer_id: String,
}

impl TorznabUrl {
    /// Parse either a full feed URL or the compact encoded form.
    pub fn parse(raw: &str) -> Result<Self, IndexerError> {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            let caps = TORZNAB_URL_RE
                .captures(raw)
                .ok_or_else(|| IndexerError::InvalidUrl(raw.to_string()))?;
            return Ok(Self {
                base_url: caps["base_url"].to_string(),
                indexer_id: caps["indexer_id"].to_string(),
            });
        }

        let (scheme_host, indexer_id) = raw
            .split_once("::")
            .ok_or_else(|| IndexerError::InvalidUrl(raw.to_string()))?;
        let (scheme, host) = scheme_host
            .split_once(':')
            .ok_or_else(|| IndexerError::InvalidUrl(raw.to_string()))?;
        Ok(Self {
            base_url: format!("{}://{}", scheme, host),
            indexer_id: indexer_id.to_string(),
        })
    }

    /// The compact `scheme:host::indexer` form.
    pub fn encode(&self) -> Result<String, IndexerError> {
        let (scheme, rest) = self
            .base_url
            .split_once("://")
            .ok_or_else(|| IndexerError::InvalidUrl(self.base_url.clone()))?;
        let host = rest.trim_end_matches('/');
        Ok(format!("{}:{}::{}", scheme, host, self.indexer_id))
    }

    /// The full feed URL.
    pub fn feed_url(&self) -> String {
        format!(
            "{}/api/v2.0/indexers/{}/results/torznab",
            self.base_url.trim_end_matches('/'),
            self.indexer_id
        )
    }
}

/// A persisted indexer record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorznabIndexer {
    pub kind: IndexerKind,
    pub id: String,
    pub name: String,
    pub url: String,
    /// Encrypted at rest; use [`TorznabIndexer::api_key`] to read.
    pub api_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TorznabIndexer {
    /// Build a new record from a torznab feed URL, encrypting the key.
    pub fn new(
        kind: IndexerKind,
        url: &str,
        api_key: &str,
        vault_secret: &str,
    ) -> Result<Self, IndexerError> {
        match kind {
            IndexerKind::Jackett => {
                let parsed = TorznabUrl::parse(url)?;
                let now = Utc::now();
                let mut indexer = Self {
                    kind,
                    id: parsed.encode()?,
                    name: parsed.indexer_id.clone(),
                    url: url.to_string(),
                    api_key: String::new(),
                    created_at: now,
                    updated_at: now,
                };
                indexer.set_api_key(api_key, vault_secret)?;
                Ok(indexer)
            }
        }
    }

    pub fn composite_id(&self) -> String {
        format!("{}:{}", self.kind, self.id)
    }

    pub fn set_api_key(&mut self, api_key: &str, vault_secret: &str) -> Result<(), IndexerError> {
        self.api_key = credential::encrypt(vault_secret, api_key)?;
        Ok(())
    }

    /// Decrypt the stored credential.
    pub fn api_key(&self, vault_secret: &str) -> Result<String, IndexerError> {
        if self.api_key.is_empty() {
            return Ok(String::new());
        }
        Ok(credential::decrypt(vault_secret, &self.api_key)?)
    }
}

/// Builds live clients for indexer records. The wire implementation lives
/// outside this crate.
pub trait ClientFactory: Send + Sync {
    fn client(&self, indexer: &TorznabIndexer) -> Result<Arc<dyn TorznabClient>, IndexerError>;
}
