//! Per-worker job bookkeeping over the persisted job log.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::store::{JobLogStore, JobRecord, JobStatus, StoreError};

/// Tracks jobs for one named worker. Records expire after
/// `max(3 days, 10 × interval)`.
#[derive(Clone)]
pub struct JobTracker {
    worker: String,
    store: Arc<dyn JobLogStore>,
    expires_in: Duration,
}

impl JobTracker {
    pub fn new(worker: &str, store: Arc<dyn JobLogStore>, interval: Duration) -> Self {
        let expires_in = Duration::from_secs(3 * 24 * 60 * 60).max(interval * 10);
        Self {
            worker: worker.to_string(),
            store,
            expires_in,
        }
    }

    /// The most recent job record, purging expired rows first.
    pub fn last(&self) -> Result<Option<JobRecord>, StoreError> {
        if let Err(err) = self.store.purge_expired(&self.worker, self.expires_in) {
            warn!(worker = %self.worker, error = %err, "failed to purge expired jobs");
        }
        self.store.get_last(&self.worker)
    }

    pub fn set(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        self.store.set(&self.worker, job_id, status, error)
    }
}
