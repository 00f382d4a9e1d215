//! Persistence collaborator contracts.
//!
//! The engine reads and writes through these traits; the bundled
//! [`SqliteStore`] implements all of them over one connection. Upserts are
//! idempotent on primary key and each mutator updates only its own columns.

mod sqlite;

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::indexer::{IndexerKind, TorznabIndexer};
use crate::torznab::TorzFile;

pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// How long a successful sync stays fresh.
pub fn sync_stale_after() -> Duration {
    Duration::hours(24)
}

/// Per-(indexer, stream id) sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncInfo {
    pub kind: IndexerKind,
    pub indexer_id: String,
    pub sid: String,
    pub queued_at: Option<DateTime<Utc>>,
    pub synced_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result_count: Option<i64>,
}

impl SyncInfo {
    /// Whether this key needs a sync: never synced, re-queued since the
    /// last sync, or the last sync has gone stale.
    pub fn should_sync(&self, now: DateTime<Utc>) -> bool {
        let Some(synced_at) = self.synced_at else {
            return true;
        };
        if let Some(queued_at) = self.queued_at {
            if queued_at > synced_at {
                return true;
            }
        }
        now - synced_at > sync_stale_after()
    }
}

/// Category recorded alongside upserted torrent metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorrentCategory {
    Movie,
    Series,
    Unknown,
}

impl TorrentCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            TorrentCategory::Movie => "movie",
            TorrentCategory::Series => "series",
            TorrentCategory::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "movie" => TorrentCategory::Movie,
            "series" => TorrentCategory::Series,
            _ => TorrentCategory::Unknown,
        }
    }
}

/// Torrent metadata as submitted for upsert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TorrentItem {
    pub hash: String,
    pub title: String,
    pub size: i64,
    pub indexer: String,
    pub seeders: i64,
    pub leechers: i64,
    pub private: bool,
    pub files: Option<Vec<TorzFile>>,
}

/// Torrent metadata as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentInfo {
    pub hash: String,
    pub title: String,
    pub size: i64,
    pub indexer: String,
    pub seeders: i64,
    pub leechers: i64,
    pub private: bool,
    pub category: TorrentCategory,
}

/// A file within a stored torrent, possibly mapped to stream ids by an
/// out-of-band process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentFileEntry {
    pub hash: String,
    pub index: i64,
    pub name: String,
    pub size: i64,
    /// Stream id this file maps to (`tt...` form), when known.
    pub sid: Option<String>,
    /// Anime stream id this file maps to (`anidb_id:episode`), when known.
    pub anime_sid: Option<String>,
}

impl TorrentFileEntry {
    pub fn is_video(&self) -> bool {
        crate::title::has_video_extension(&self.name)
    }
}

/// Worker job log statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Started,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Started => "started",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "started" => Some(JobStatus::Started),
            "done" => Some(JobStatus::Done),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// A persisted worker job record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub worker: String,
    pub job_id: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Paging parameters for sync-info listings.
#[derive(Debug, Clone, Default)]
pub struct SyncInfoPage {
    pub limit: i64,
    pub offset: i64,
    pub sid: Option<String>,
}

/// Indexer record storage.
pub trait IndexerStore: Send + Sync {
    fn get_all(&self) -> Result<Vec<TorznabIndexer>, StoreError>;

    fn get_by_id(&self, kind: IndexerKind, id: &str)
        -> Result<Option<TorznabIndexer>, StoreError>;

    fn upsert(&self, indexer: &TorznabIndexer) -> Result<(), StoreError>;

    fn delete(&self, kind: IndexerKind, id: &str) -> Result<(), StoreError>;

    /// Whether any indexer is configured at all.
    fn exists(&self) -> Result<bool, StoreError>;
}

/// Sync bookkeeping storage.
pub trait SyncInfoStore: Send + Sync {
    /// Record that `sid` wants a sync on `(kind, id)`. Writes are debounced
    /// briefly, so repeated queueing of a hot id does not hammer the table.
    fn queue(&self, kind: IndexerKind, indexer_id: &str, sid: &str) -> Result<(), StoreError>;

    fn mark_synced(
        &self,
        kind: IndexerKind,
        indexer_id: &str,
        sid: &str,
        result_count: i64,
    ) -> Result<(), StoreError>;

    /// Record a failed sync. `synced_at` stays empty, so the row remains
    /// pending with a recorded cause.
    fn set_sync_error(
        &self,
        kind: IndexerKind,
        indexer_id: &str,
        sid: &str,
        error: &str,
    ) -> Result<(), StoreError>;

    /// Whether the key needs a sync. Unknown keys do.
    fn should_sync(&self, kind: IndexerKind, indexer_id: &str, sid: &str)
        -> Result<bool, StoreError>;

    fn get_sync_pending(&self) -> Result<Vec<SyncInfo>, StoreError>;

    fn has_sync_pending(&self) -> Result<bool, StoreError>;

    fn get_items(&self, page: &SyncInfoPage) -> Result<Vec<SyncInfo>, StoreError>;

    fn count(&self, sid: Option<&str>) -> Result<i64, StoreError>;
}

/// Long-term torrent metadata storage.
pub trait TorrentInfoStore: Send + Sync {
    fn get_by_hashes(&self, hashes: &[String])
        -> Result<HashMap<String, TorrentInfo>, StoreError>;

    /// Idempotent upsert. Non-authoritative writes refresh swarm counters
    /// and fill gaps but keep an existing longer title and known category.
    fn upsert(
        &self,
        items: &[TorrentItem],
        category: TorrentCategory,
        authoritative: bool,
    ) -> Result<(), StoreError>;

    fn get_files_by_hashes(
        &self,
        hashes: &[String],
    ) -> Result<HashMap<String, Vec<TorrentFileEntry>>, StoreError>;

    fn list_hashes_by_stream_id(&self, sid: &str) -> Result<Vec<String>, StoreError>;
}

/// Worker job log storage.
pub trait JobLogStore: Send + Sync {
    fn get_last(&self, worker: &str) -> Result<Option<JobRecord>, StoreError>;

    fn set(
        &self,
        worker: &str,
        job_id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    fn purge_expired(&self, worker: &str, expires_in: std::time::Duration)
        -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync_info(
        queued_at: Option<DateTime<Utc>>,
        synced_at: Option<DateTime<Utc>>,
    ) -> SyncInfo {
        SyncInfo {
            kind: IndexerKind::Jackett,
            indexer_id: "idx".to_string(),
            sid: "tt123".to_string(),
            queued_at,
            synced_at,
            error: None,
            result_count: None,
        }
    }

    #[test]
    fn test_should_sync_when_never_synced() {
        let now = Utc::now();
        assert!(sync_info(Some(now), None).should_sync(now));
        assert!(sync_info(None, None).should_sync(now));
    }

    #[test]
    fn test_should_not_sync_when_fresh() {
        let now = Utc::now();
        let info = sync_info(Some(now - Duration::minutes(10)), Some(now));
        assert!(!info.should_sync(now));
        // Still fresh just before the stale boundary.
        assert!(!info.should_sync(now + Duration::hours(23)));
    }

    #[test]
    fn test_should_sync_when_stale() {
        let now = Utc::now();
        let info = sync_info(None, Some(now - Duration::hours(25)));
        assert!(info.should_sync(now));
    }

    #[test]
    fn test_requeue_after_sync_re_enables() {
        let now = Utc::now();
        let synced = now - Duration::minutes(5);
        let info = sync_info(Some(now), Some(synced));
        assert!(info.should_sync(now));
    }

    #[test]
    fn test_job_status_round_trip() {
        for status in [JobStatus::Started, JobStatus::Done, JobStatus::Failed] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("unknown"), None);
    }
}
