//! Torznab client contract.
//!
//! The wire codec (torznab XML) lives outside this crate; the engine only
//! consumes this trait. Capabilities are fetched once per indexer and
//! cached for a few hours with single-flight population.

mod magnet;
mod types;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::cache::{KeyedLocks, TtlCache};

pub use magnet::{parse_torrent, MagnetError, MagnetFetcher, MagnetResolver};
pub use types::{Caps, Function, Query, SearchParam, TorzFile, TorzResult};

const CAPS_CACHE_CAPACITY: usize = 256;
const CAPS_CACHE_LIFETIME: Duration = Duration::from_secs(3 * 60 * 60);

#[derive(Debug, Error)]
pub enum TorznabError {
    #[error("indexer connection failed: {0}")]
    ConnectionFailed(String),
    #[error("indexer api error: {0}")]
    Api(String),
    #[error("request timeout")]
    Timeout,
}

/// A live connection to one torznab indexer.
#[async_trait]
pub trait TorznabClient: Send + Sync {
    /// Stable identifier for logging, e.g. `jackett:localhost::rarbg`.
    fn id(&self) -> &str;

    /// Supported functions and parameter keys.
    async fn get_caps(&self) -> Result<Caps, TorznabError>;

    /// Execute a search query.
    async fn search(&self, query: &Query) -> Result<Vec<TorzResult>, TorznabError>;
}

/// Per-indexer capability cache with ensure-once population.
pub struct CapsCache {
    cache: TtlCache<String, Caps>,
    locks: KeyedLocks,
}

impl Default for CapsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CapsCache {
    pub fn new() -> Self {
        Self {
            cache: TtlCache::new(CAPS_CACHE_CAPACITY, CAPS_CACHE_LIFETIME),
            locks: KeyedLocks::new(),
        }
    }

    /// The capabilities of `client`, fetching at most once concurrently.
    pub async fn get(&self, client: &Arc<dyn TorznabClient>) -> Result<Caps, TorznabError> {
        let key = client.id().to_string();
        if let Some(caps) = self.cache.get(&key) {
            return Ok(caps);
        }

        let _guard = self.locks.acquire(&key).await;
        // Re-check: another task may have populated while we waited.
        if let Some(caps) = self.cache.get(&key) {
            return Ok(caps);
        }

        let caps = client.get_caps().await?;
        self.cache.insert(key, caps.clone());
        Ok(caps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTorznabClient;

    #[tokio::test]
    async fn test_caps_cache_fetches_once() {
        let client = Arc::new(MockTorznabClient::named("jackett:test::idx").with_caps(Caps {
            functions: [Function::Search].into(),
            params: [SearchParam::Query].into(),
        }));
        let cache = CapsCache::new();

        let as_trait: Arc<dyn TorznabClient> = client.clone();
        let first = cache.get(&as_trait).await.unwrap();
        let second = cache.get(&as_trait).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(client.caps_calls(), 1);
    }
}
