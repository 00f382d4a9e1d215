//! The crawl side of the torznab sync pipeline.
//!
//! `sync-torznab-indexer` loads every pending sync row, groups the rows by
//! indexer, and crawls each indexer on its own task. Within one indexer
//! the sync-key variants (`sid`, `sid:season`, `sid:season:episode`)
//! serialize to respect indexer rate limits, while the query plans inside
//! one variant fan out concurrently. Each variant tracks its own outcome:
//! `mark_synced` with the result count on success, `set_sync_error` on
//! failure so the row stays pending with a recorded cause.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::indexer::{ClientFactory, TorznabIndexer};
use crate::metadata::TitleProvider;
use crate::searcher::{build_plans, build_query_meta, complete_results, PlannedQuery};
use crate::store::{
    IndexerStore, SyncInfo, SyncInfoStore, TorrentCategory, TorrentInfoStore, TorrentItem,
};
use crate::stream_id::StreamIdNormalizer;
use crate::torznab::{Caps, CapsCache, MagnetResolver, TorzResult, TorznabClient};

use super::WorkerError;

/// Bounded fan-out for `.torrent` fetches during background sync.
const SYNC_MAGNET_FETCH_CONCURRENCY: usize = 5;

/// Executor of the `sync-torznab-indexer` worker.
pub struct TorznabSyncer {
    indexer_store: Arc<dyn IndexerStore>,
    sync_info: Arc<dyn SyncInfoStore>,
    torrents: Arc<dyn TorrentInfoStore>,
    titles: Arc<dyn TitleProvider>,
    normalizer: Arc<StreamIdNormalizer>,
    factory: Arc<dyn ClientFactory>,
    resolver: Arc<dyn MagnetResolver>,
    caps: CapsCache,
}

impl TorznabSyncer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        indexer_store: Arc<dyn IndexerStore>,
        sync_info: Arc<dyn SyncInfoStore>,
        torrents: Arc<dyn TorrentInfoStore>,
        titles: Arc<dyn TitleProvider>,
        normalizer: Arc<StreamIdNormalizer>,
        factory: Arc<dyn ClientFactory>,
        resolver: Arc<dyn MagnetResolver>,
    ) -> Self {
        Self {
            indexer_store,
            sync_info,
            torrents,
            titles,
            normalizer,
            factory,
            resolver,
            caps: CapsCache::new(),
        }
    }

    /// One crawl pass over every pending sync row.
    pub async fn run(&self) -> Result<(), WorkerError> {
        let pending = self.sync_info.get_sync_pending()?;
        if pending.is_empty() {
            debug!("no pending sync items");
            return Ok(());
        }

        let indexers = self.indexer_store.get_all()?;
        info!(count = pending.len(), "processing pending sync items");

        let mut items_by_indexer: HashMap<String, Vec<SyncInfo>> = HashMap::new();
        for item in pending {
            let key = format!("{}:{}", item.kind, item.indexer_id);
            items_by_indexer.entry(key).or_default().push(item);
        }

        let indexer_by_key: HashMap<String, &TorznabIndexer> = indexers
            .iter()
            .map(|indexer| (indexer.composite_id(), indexer))
            .collect();

        let indexer_by_key = &indexer_by_key;
        let tasks = items_by_indexer.iter().map(|(key, items)| async move {
            let Some(indexer) = indexer_by_key.get(key) else {
                warn!(key = %key, "indexer not found for pending sync items");
                return;
            };
            self.sync_indexer(indexer, items).await;
        });
        join_all(tasks).await;

        Ok(())
    }

    async fn sync_indexer(&self, indexer: &TorznabIndexer, items: &[SyncInfo]) {
        let client = match self.factory.client(indexer) {
            Ok(client) => client,
            Err(err) => {
                error!(
                    indexer = %indexer.composite_id(),
                    error = %err,
                    "failed to create torznab client"
                );
                return;
            }
        };

        let caps = match self.caps.get(&client).await {
            Ok(caps) => caps,
            Err(err) => {
                error!(indexer = client.id(), error = %err, "failed to fetch indexer capabilities");
                return;
            }
        };

        info!(
            indexer = %indexer.name,
            count = items.len(),
            "processing items for indexer"
        );

        for item in items {
            self.sync_item(&client, &caps, item).await;
        }
    }

    async fn sync_item(&self, client: &Arc<dyn TorznabClient>, caps: &Caps, item: &SyncInfo) {
        let nsid = match self.normalizer.normalize(&item.sid).await {
            Ok(nsid) => nsid,
            Err(err) => {
                error!(sid = %item.sid, error = %err, "failed to normalize stream id");
                return;
            }
        };

        let meta = match build_query_meta(&nsid, &self.titles).await {
            Ok(meta) => meta,
            Err(err) => {
                error!(sid = %item.sid, error = %err, "failed to build query metadata");
                return;
            }
        };

        // Partition the plans by sync-key granularity; each variant is
        // tracked independently.
        let mut variants: Vec<(String, Vec<PlannedQuery>)> = Vec::new();
        for plan in build_plans(caps, &nsid, &meta) {
            match variants.iter_mut().find(|(sid, _)| *sid == plan.sync_sid) {
                Some((_, group)) => group.push(plan),
                None => variants.push((plan.sync_sid.clone(), vec![plan])),
            }
        }

        let mut results: Vec<TorzResult> = Vec::new();
        for (sid, group) in &variants {
            match self.sync_info.should_sync(item.kind, &item.indexer_id, sid) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(indexer = client.id(), sid = %sid, "skipping already synced query");
                    continue;
                }
                Err(err) => {
                    error!(indexer = client.id(), sid = %sid, error = %err, "failed to check sync state");
                    continue;
                }
            }

            let searches = group.iter().map(|plan| async {
                let start = Instant::now();
                let result = client.search(&plan.query).await;
                match &result {
                    Ok(found) => debug!(
                        indexer = client.id(),
                        query = %plan.query.encode(),
                        duration_ms = start.elapsed().as_millis() as u64,
                        count = found.len(),
                        "indexer search completed"
                    ),
                    Err(err) => error!(
                        indexer = client.id(),
                        query = %plan.query.encode(),
                        duration_ms = start.elapsed().as_millis() as u64,
                        error = %err,
                        "indexer search failed"
                    ),
                }
                result
            });

            let mut batch = Vec::new();
            let mut errors = Vec::new();
            for outcome in join_all(searches).await {
                match outcome {
                    Ok(found) => batch.extend(found),
                    Err(err) => errors.push(err.to_string()),
                }
            }

            if !errors.is_empty() {
                let joined = errors.join("; ");
                error!(indexer = client.id(), sid = %sid, error = %joined, "some indexer search failed");
                if let Err(err) =
                    self.sync_info
                        .set_sync_error(item.kind, &item.indexer_id, sid, &joined)
                {
                    error!(indexer = client.id(), sid = %sid, error = %err, "failed to set sync error");
                }
                continue;
            }

            if let Err(err) = self.sync_info.mark_synced(
                item.kind,
                &item.indexer_id,
                sid,
                batch.len() as i64,
            ) {
                error!(indexer = client.id(), sid = %sid, error = %err, "failed to mark synced");
            }
            results.extend(batch);
        }

        debug!(
            indexer = client.id(),
            sid = %item.sid,
            count = results.len(),
            "indexer sync completed"
        );

        complete_results(
            std::slice::from_mut(&mut results),
            &self.resolver,
            SYNC_MAGNET_FETCH_CONCURRENCY,
        )
        .await;

        let to_upsert: Vec<TorrentItem> = results
            .iter()
            .filter(|result| !result.has_missing_data())
            .map(|result| TorrentItem {
                hash: result.hash.to_lowercase(),
                title: result.title.clone(),
                size: result.size,
                indexer: result.indexer.clone(),
                seeders: result.seeders,
                leechers: result.leechers,
                private: result.private,
                files: result.files.clone(),
            })
            .collect();

        if to_upsert.is_empty() {
            return;
        }

        let category = if nsid.is_series() {
            TorrentCategory::Series
        } else {
            TorrentCategory::Movie
        };

        match self.torrents.upsert(&to_upsert, category, false) {
            Ok(()) => debug!(
                indexer = client.id(),
                sid = %item.sid,
                count = to_upsert.len(),
                "saved torrents"
            ),
            Err(err) => error!(
                indexer = client.id(),
                sid = %item.sid,
                error = %err,
                "failed to upsert torrent info"
            ),
        }
    }
}
