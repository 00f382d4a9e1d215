//! Mock torznab client and client factory.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::indexer::{ClientFactory, IndexerError, TorznabIndexer};
use crate::torznab::{Caps, Query, TorzResult, TorznabClient, TorznabError};

/// Mock implementation of the torznab client.
///
/// Results can be configured globally or per query (matched by a substring
/// of the encoded query); searches are recorded for assertions.
pub struct MockTorznabClient {
    id: String,
    caps: Caps,
    default_results: Vec<TorzResult>,
    results_by_query: Vec<(String, Vec<TorzResult>)>,
    failure: Option<String>,
    search_delay: Option<Duration>,
    caps_calls: AtomicUsize,
    searches: Mutex<Vec<Query>>,
}

impl MockTorznabClient {
    pub fn named(id: &str) -> Self {
        Self {
            id: id.to_string(),
            caps: Caps::default(),
            default_results: Vec::new(),
            results_by_query: Vec::new(),
            failure: None,
            search_delay: None,
            caps_calls: AtomicUsize::new(0),
            searches: Mutex::new(Vec::new()),
        }
    }

    pub fn with_caps(mut self, caps: Caps) -> Self {
        self.caps = caps;
        self
    }

    /// Results returned for any query without a more specific match.
    pub fn with_results(mut self, results: Vec<TorzResult>) -> Self {
        self.default_results = results;
        self
    }

    /// Results returned when the encoded query contains `fragment`.
    pub fn with_results_for(mut self, fragment: &str, results: Vec<TorzResult>) -> Self {
        self.results_by_query.push((fragment.to_string(), results));
        self
    }

    pub fn with_failure(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub fn with_search_delay(mut self, delay: Duration) -> Self {
        self.search_delay = Some(delay);
        self
    }

    pub fn caps_calls(&self) -> usize {
        self.caps_calls.load(Ordering::SeqCst)
    }

    /// Every query that was searched, in order.
    pub fn searches(&self) -> Vec<Query> {
        self.searches.lock().unwrap().clone()
    }

    pub fn search_count(&self) -> usize {
        self.searches.lock().unwrap().len()
    }

    fn results_for(&self, query: &Query) -> Vec<TorzResult> {
        let encoded = query.encode();
        let found = self
            .results_by_query
            .iter()
            .find(|(fragment, _)| encoded.contains(fragment))
            .map(|(_, results)| results.clone())
            .unwrap_or_else(|| self.default_results.clone());

        found
            .into_iter()
            .map(|mut result| {
                if result.indexer.is_empty() {
                    result.indexer = self.id.clone();
                }
                result
            })
            .collect()
    }
}

#[async_trait]
impl TorznabClient for MockTorznabClient {
    fn id(&self) -> &str {
        &self.id
    }

    async fn get_caps(&self) -> Result<Caps, TorznabError> {
        self.caps_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.caps.clone())
    }

    async fn search(&self, query: &Query) -> Result<Vec<TorzResult>, TorznabError> {
        self.searches.lock().unwrap().push(query.clone());

        if let Some(delay) = self.search_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.failure {
            return Err(TorznabError::Api(message.clone()));
        }
        Ok(self.results_for(query))
    }
}

/// Mock client factory resolving indexer records by composite id.
#[derive(Default)]
pub struct MockClientFactory {
    clients: Mutex<HashMap<String, Arc<MockTorznabClient>>>,
}

impl MockClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, composite_id: &str, client: Arc<MockTorznabClient>) {
        self.clients
            .lock()
            .unwrap()
            .insert(composite_id.to_string(), client);
    }

    pub fn with_client(self, composite_id: &str, client: Arc<MockTorznabClient>) -> Self {
        self.register(composite_id, client);
        self
    }
}

impl ClientFactory for MockClientFactory {
    fn client(&self, indexer: &TorznabIndexer) -> Result<Arc<dyn TorznabClient>, IndexerError> {
        let clients = self.clients.lock().unwrap();
        clients
            .get(&indexer.composite_id())
            .map(|client| Arc::clone(client) as Arc<dyn TorznabClient>)
            .ok_or_else(|| {
                IndexerError::Client(format!("no client registered: {}", indexer.composite_id()))
            })
    }
}
