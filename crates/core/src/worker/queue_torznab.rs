//! The queue side of the torznab sync pipeline.
//!
//! Stream requests enqueue their (normalized) stream id here; the
//! `queue-torznab-indexer-sync` worker drains the queue and writes a
//! pending sync row for every configured indexer.

use std::sync::Arc;

use crate::store::{IndexerStore, StoreError, SyncInfoStore};

use super::queue::{WorkerQueue, DEFAULT_DEBOUNCE};
use super::WorkerError;

/// A stream id waiting to be fanned out into per-indexer sync rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncQueueItem {
    pub sid: String,
}

/// Build the process-wide torznab sync queue.
pub fn new_sync_queue(disabled: bool) -> WorkerQueue<SyncQueueItem> {
    WorkerQueue::new(DEFAULT_DEBOUNCE, |item: &SyncQueueItem| item.sid.clone())
        .with_disabled(disabled)
}

/// Executor of the `queue-torznab-indexer-sync` worker: drain the queue
/// and write a pending sync row per (indexer, stream id).
pub fn drain_sync_queue(
    queue: &WorkerQueue<SyncQueueItem>,
    indexer_store: &Arc<dyn IndexerStore>,
    sync_info: &Arc<dyn SyncInfoStore>,
) -> Result<(), WorkerError> {
    let indexers = indexer_store.get_all()?;

    queue.process(|item| -> Result<(), StoreError> {
        for indexer in &indexers {
            sync_info.queue(indexer.kind, &indexer.id, &item.sid)?;
        }
        Ok(())
    })?;

    Ok(())
}
