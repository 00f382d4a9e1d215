//! Mock magnet resolver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::torznab::{MagnetError, MagnetResolver, TorzFile};

/// Mock resolver mapping source links to `(hash, files)`, counting calls.
#[derive(Default)]
pub struct MockMagnetResolver {
    torrents: HashMap<String, (String, Vec<TorzFile>)>,
    calls: Arc<AtomicUsize>,
}

impl MockMagnetResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_torrent(mut self, source_link: &str, hash: &str, files: Vec<TorzFile>) -> Self {
        self.torrents
            .insert(source_link.to_string(), (hash.to_string(), files));
        self
    }

    /// Shared call counter, usable after the resolver is moved behind an
    /// `Arc<dyn MagnetResolver>`.
    pub fn clone_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl MagnetResolver for MockMagnetResolver {
    async fn resolve(&self, source_link: &str) -> Result<(String, Vec<TorzFile>), MagnetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.torrents
            .get(source_link)
            .map(|(hash, files)| (hash.to_lowercase(), files.clone()))
            .ok_or_else(|| MagnetError::Fetch(format!("no torrent at {}", source_link)))
    }
}
