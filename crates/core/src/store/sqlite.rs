//! SQLite-backed implementation of the store contracts.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::cache::TtlCache;
use crate::indexer::{IndexerKind, TorznabIndexer};

use super::{
    sync_stale_after, IndexerStore, JobLogStore, JobRecord, JobStatus, StoreError, SyncInfo,
    SyncInfoPage, SyncInfoStore, TorrentCategory, TorrentFileEntry, TorrentInfo, TorrentInfoStore,
    TorrentItem,
};

/// Repeated `queue` calls for the same key are suppressed for this long.
const QUEUE_DEBOUNCE: StdDuration = StdDuration::from_secs(3 * 60 * 60);
const QUEUE_DEBOUNCE_CAPACITY: usize = 2048;

/// SQLite store implementing every persistence contract.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    queue_debounce: TtlCache<String, ()>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            queue_debounce: TtlCache::new(QUEUE_DEBOUNCE_CAPACITY, QUEUE_DEBOUNCE),
        })
    }

    /// In-memory store, used by tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            queue_debounce: TtlCache::new(QUEUE_DEBOUNCE_CAPACITY, QUEUE_DEBOUNCE),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS torznab_indexer (
                kind TEXT NOT NULL,
                id TEXT NOT NULL,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                api_key TEXT NOT NULL,
                cat TEXT NOT NULL,
                uat TEXT NOT NULL,
                PRIMARY KEY (kind, id)
            );

            CREATE TABLE IF NOT EXISTS torznab_indexer_syncinfo (
                kind TEXT NOT NULL,
                id TEXT NOT NULL,
                sid TEXT NOT NULL,
                queued_at TEXT,
                synced_at TEXT,
                error TEXT,
                result_count INTEGER,
                PRIMARY KEY (kind, id, sid)
            );

            CREATE INDEX IF NOT EXISTS idx_syncinfo_queued_at
                ON torznab_indexer_syncinfo(queued_at);

            CREATE TABLE IF NOT EXISTS torrent_info (
                hash TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                size INTEGER NOT NULL DEFAULT 0,
                indexer TEXT NOT NULL DEFAULT '',
                seeders INTEGER NOT NULL DEFAULT 0,
                leechers INTEGER NOT NULL DEFAULT 0,
                private INTEGER NOT NULL DEFAULT 0,
                category TEXT NOT NULL DEFAULT 'unknown',
                cat TEXT NOT NULL,
                uat TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS torrent_file (
                hash TEXT NOT NULL,
                idx INTEGER NOT NULL,
                name TEXT NOT NULL,
                size INTEGER NOT NULL DEFAULT 0,
                sid TEXT,
                asid TEXT,
                PRIMARY KEY (hash, idx)
            );

            CREATE INDEX IF NOT EXISTS idx_torrent_file_sid ON torrent_file(sid);
            CREATE INDEX IF NOT EXISTS idx_torrent_file_asid ON torrent_file(asid);

            CREATE TABLE IF NOT EXISTS job_log (
                worker TEXT NOT NULL,
                job_id TEXT NOT NULL,
                status TEXT NOT NULL,
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (worker, job_id)
            );
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record an out-of-band file→stream-id mapping.
    pub fn map_file_to_stream(
        &self,
        hash: &str,
        index: i64,
        sid: Option<&str>,
        anime_sid: Option<&str>,
    ) -> Result<(), StoreError> {
        self.conn().execute(
            "UPDATE torrent_file SET sid = ?3, asid = ?4 WHERE hash = ?1 AND idx = ?2",
            params![hash, index, sid, anime_sid],
        )?;
        Ok(())
    }
}

fn ts(value: DateTime<Utc>) -> String {
    // Fixed-width UTC form, so string comparison in SQL orders correctly.
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Database(format!("bad timestamp {value:?}: {e}")))
}

fn parse_opt_ts(value: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    value.as_deref().map(parse_ts).transpose()
}

fn parse_kind(value: &str) -> Result<IndexerKind, StoreError> {
    IndexerKind::parse(value).map_err(|e| StoreError::Database(e.to_string()))
}

fn indexer_from_row(row: &Row<'_>) -> Result<TorznabIndexer, StoreError> {
    Ok(TorznabIndexer {
        kind: parse_kind(&row.get::<_, String>(0)?)?,
        id: row.get(1)?,
        name: row.get(2)?,
        url: row.get(3)?,
        api_key: row.get(4)?,
        created_at: parse_ts(&row.get::<_, String>(5)?)?,
        updated_at: parse_ts(&row.get::<_, String>(6)?)?,
    })
}

fn sync_info_from_row(row: &Row<'_>) -> Result<SyncInfo, StoreError> {
    Ok(SyncInfo {
        kind: parse_kind(&row.get::<_, String>(0)?)?,
        indexer_id: row.get(1)?,
        sid: row.get(2)?,
        queued_at: parse_opt_ts(row.get(3)?)?,
        synced_at: parse_opt_ts(row.get(4)?)?,
        error: row.get(5)?,
        result_count: row.get(6)?,
    })
}

const SYNC_INFO_COLUMNS: &str = "kind, id, sid, queued_at, synced_at, error, result_count";
const SYNC_PENDING_COND: &str =
    "queued_at IS NOT NULL AND (synced_at IS NULL OR queued_at > synced_at OR synced_at <= ?1)";

impl IndexerStore for SqliteStore {
    fn get_all(&self) -> Result<Vec<TorznabIndexer>, StoreError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT kind, id, name, url, api_key, cat, uat FROM torznab_indexer")?;
        let mut rows = stmt.query([])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(indexer_from_row(row)?);
        }
        Ok(items)
    }

    fn get_by_id(
        &self,
        kind: IndexerKind,
        id: &str,
    ) -> Result<Option<TorznabIndexer>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT kind, id, name, url, api_key, cat, uat FROM torznab_indexer
             WHERE kind = ?1 AND id = ?2",
        )?;
        let mut rows = stmt.query(params![kind.as_str(), id])?;
        match rows.next()? {
            Some(row) => Ok(Some(indexer_from_row(row)?)),
            None => Ok(None),
        }
    }

    fn upsert(&self, indexer: &TorznabIndexer) -> Result<(), StoreError> {
        let now = ts(Utc::now());
        self.conn().execute(
            "INSERT INTO torznab_indexer (kind, id, name, url, api_key, cat, uat)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT (kind, id) DO UPDATE SET
                 name = excluded.name,
                 url = excluded.url,
                 api_key = excluded.api_key,
                 uat = excluded.uat",
            params![
                indexer.kind.as_str(),
                indexer.id,
                indexer.name,
                indexer.url,
                indexer.api_key,
                now,
            ],
        )?;
        Ok(())
    }

    fn delete(&self, kind: IndexerKind, id: &str) -> Result<(), StoreError> {
        self.conn().execute(
            "DELETE FROM torznab_indexer WHERE kind = ?1 AND id = ?2",
            params![kind.as_str(), id],
        )?;
        Ok(())
    }

    fn exists(&self) -> Result<bool, StoreError> {
        let conn = self.conn();
        let one: Option<i64> = conn
            .query_row("SELECT 1 FROM torznab_indexer LIMIT 1", [], |row| row.get(0))
            .optional()?;
        Ok(one.is_some())
    }
}

impl SyncInfoStore for SqliteStore {
    fn queue(&self, kind: IndexerKind, indexer_id: &str, sid: &str) -> Result<(), StoreError> {
        if sid.is_empty() {
            return Ok(());
        }

        let cache_key = format!("{}:{}:{}", kind, indexer_id, sid);
        if self.queue_debounce.contains(&cache_key) {
            return Ok(());
        }

        self.conn().execute(
            "INSERT INTO torznab_indexer_syncinfo (kind, id, sid, queued_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (kind, id, sid) DO UPDATE SET queued_at = excluded.queued_at",
            params![kind.as_str(), indexer_id, sid, ts(Utc::now())],
        )?;
        self.queue_debounce.insert(cache_key, ());
        Ok(())
    }

    fn mark_synced(
        &self,
        kind: IndexerKind,
        indexer_id: &str,
        sid: &str,
        result_count: i64,
    ) -> Result<(), StoreError> {
        if sid.is_empty() {
            return Ok(());
        }
        self.conn().execute(
            "INSERT INTO torznab_indexer_syncinfo (kind, id, sid, queued_at, synced_at, result_count)
             VALUES (?1, ?2, ?3, NULL, ?4, ?5)
             ON CONFLICT (kind, id, sid) DO UPDATE SET
                 synced_at = excluded.synced_at,
                 result_count = excluded.result_count",
            params![kind.as_str(), indexer_id, sid, ts(Utc::now()), result_count],
        )?;
        Ok(())
    }

    fn set_sync_error(
        &self,
        kind: IndexerKind,
        indexer_id: &str,
        sid: &str,
        error: &str,
    ) -> Result<(), StoreError> {
        if sid.is_empty() {
            return Ok(());
        }
        self.conn().execute(
            "INSERT INTO torznab_indexer_syncinfo (kind, id, sid, queued_at, synced_at, error)
             VALUES (?1, ?2, ?3, NULL, NULL, ?4)
             ON CONFLICT (kind, id, sid) DO UPDATE SET error = excluded.error",
            params![kind.as_str(), indexer_id, sid, error],
        )?;
        Ok(())
    }

    fn should_sync(
        &self,
        kind: IndexerKind,
        indexer_id: &str,
        sid: &str,
    ) -> Result<bool, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SYNC_INFO_COLUMNS} FROM torznab_indexer_syncinfo
             WHERE kind = ?1 AND id = ?2 AND sid = ?3",
        ))?;
        let mut rows = stmt.query(params![kind.as_str(), indexer_id, sid])?;
        match rows.next()? {
            Some(row) => Ok(sync_info_from_row(row)?.should_sync(Utc::now())),
            None => Ok(true),
        }
    }

    fn get_sync_pending(&self) -> Result<Vec<SyncInfo>, StoreError> {
        let stale_cutoff = ts(Utc::now() - sync_stale_after());
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SYNC_INFO_COLUMNS} FROM torznab_indexer_syncinfo WHERE {SYNC_PENDING_COND}",
        ))?;
        let mut rows = stmt.query(params![stale_cutoff])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(sync_info_from_row(row)?);
        }
        Ok(items)
    }

    fn has_sync_pending(&self) -> Result<bool, StoreError> {
        let stale_cutoff = ts(Utc::now() - sync_stale_after());
        let conn = self.conn();
        let one: Option<i64> = conn
            .query_row(
                &format!(
                    "SELECT 1 FROM torznab_indexer_syncinfo WHERE {SYNC_PENDING_COND} LIMIT 1",
                ),
                params![stale_cutoff],
                |row| row.get(0),
            )
            .optional()?;
        Ok(one.is_some())
    }

    fn get_items(&self, page: &SyncInfoPage) -> Result<Vec<SyncInfo>, StoreError> {
        let conn = self.conn();
        let mut items = Vec::new();
        if let Some(sid) = &page.sid {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SYNC_INFO_COLUMNS} FROM torznab_indexer_syncinfo
                 WHERE queued_at IS NOT NULL AND sid = ?1
                 ORDER BY queued_at DESC LIMIT ?2 OFFSET ?3",
            ))?;
            let mut rows = stmt.query(params![sid, page.limit, page.offset])?;
            while let Some(row) = rows.next()? {
                items.push(sync_info_from_row(row)?);
            }
        } else {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SYNC_INFO_COLUMNS} FROM torznab_indexer_syncinfo
                 WHERE queued_at IS NOT NULL
                 ORDER BY queued_at DESC LIMIT ?1 OFFSET ?2",
            ))?;
            let mut rows = stmt.query(params![page.limit, page.offset])?;
            while let Some(row) = rows.next()? {
                items.push(sync_info_from_row(row)?);
            }
        }
        Ok(items)
    }

    fn count(&self, sid: Option<&str>) -> Result<i64, StoreError> {
        let conn = self.conn();
        let count = match sid {
            Some(sid) => conn.query_row(
                "SELECT COUNT(1) FROM torznab_indexer_syncinfo
                 WHERE queued_at IS NOT NULL AND sid = ?1",
                params![sid],
                |row| row.get(0),
            )?,
            None => conn.query_row(
                "SELECT COUNT(1) FROM torznab_indexer_syncinfo WHERE queued_at IS NOT NULL",
                [],
                |row| row.get(0),
            )?,
        };
        Ok(count)
    }
}

impl TorrentInfoStore for SqliteStore {
    fn get_by_hashes(
        &self,
        hashes: &[String],
    ) -> Result<HashMap<String, TorrentInfo>, StoreError> {
        if hashes.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = vec!["?"; hashes.len()].join(",");
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT hash, title, size, indexer, seeders, leechers, private, category
             FROM torrent_info WHERE hash IN ({placeholders})",
        ))?;
        let mut rows = stmt.query(params_from_iter(hashes.iter()))?;
        let mut items = HashMap::new();
        while let Some(row) = rows.next()? {
            let info = TorrentInfo {
                hash: row.get(0)?,
                title: row.get(1)?,
                size: row.get(2)?,
                indexer: row.get(3)?,
                seeders: row.get(4)?,
                leechers: row.get(5)?,
                private: row.get::<_, i64>(6)? != 0,
                category: TorrentCategory::parse(&row.get::<_, String>(7)?),
            };
            items.insert(info.hash.clone(), info);
        }
        Ok(items)
    }

    fn upsert(
        &self,
        items: &[TorrentItem],
        category: TorrentCategory,
        authoritative: bool,
    ) -> Result<(), StoreError> {
        if items.is_empty() {
            return Ok(());
        }

        let now = ts(Utc::now());
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for item in items {
            if item.hash.is_empty() {
                continue;
            }
            let hash = item.hash.to_lowercase();
            tx.execute(
                "INSERT INTO torrent_info
                     (hash, title, size, indexer, seeders, leechers, private, category, cat, uat)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                 ON CONFLICT (hash) DO UPDATE SET
                     title = CASE
                         WHEN ?10 OR length(excluded.title) > length(title)
                         THEN excluded.title ELSE title END,
                     size = CASE WHEN excluded.size > 0 THEN excluded.size ELSE size END,
                     indexer = excluded.indexer,
                     seeders = excluded.seeders,
                     leechers = excluded.leechers,
                     private = excluded.private,
                     category = CASE
                         WHEN ?10 OR category = 'unknown'
                         THEN excluded.category ELSE category END,
                     uat = excluded.uat",
                params![
                    hash,
                    item.title,
                    item.size,
                    item.indexer,
                    item.seeders,
                    item.leechers,
                    item.private as i64,
                    category.as_str(),
                    now,
                    authoritative as i64,
                ],
            )?;

            if let Some(files) = &item.files {
                for (idx, file) in files.iter().enumerate() {
                    tx.execute(
                        "INSERT INTO torrent_file (hash, idx, name, size)
                         VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT (hash, idx) DO UPDATE SET
                             name = excluded.name,
                             size = excluded.size",
                        params![hash, idx as i64, file.path, file.size],
                    )?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn get_files_by_hashes(
        &self,
        hashes: &[String],
    ) -> Result<HashMap<String, Vec<TorrentFileEntry>>, StoreError> {
        if hashes.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = vec!["?"; hashes.len()].join(",");
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT hash, idx, name, size, sid, asid FROM torrent_file
             WHERE hash IN ({placeholders}) ORDER BY hash, idx",
        ))?;
        let mut rows = stmt.query(params_from_iter(hashes.iter()))?;
        let mut by_hash: HashMap<String, Vec<TorrentFileEntry>> = HashMap::new();
        while let Some(row) = rows.next()? {
            let entry = TorrentFileEntry {
                hash: row.get(0)?,
                index: row.get(1)?,
                name: row.get(2)?,
                size: row.get(3)?,
                sid: row.get(4)?,
                anime_sid: row.get(5)?,
            };
            by_hash.entry(entry.hash.clone()).or_default().push(entry);
        }
        Ok(by_hash)
    }

    fn list_hashes_by_stream_id(&self, sid: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT hash FROM torrent_file WHERE sid = ?1 OR asid = ?1",
        )?;
        let mut rows = stmt.query(params![sid])?;
        let mut hashes = Vec::new();
        while let Some(row) = rows.next()? {
            hashes.push(row.get(0)?);
        }
        Ok(hashes)
    }
}

impl JobLogStore for SqliteStore {
    fn get_last(&self, worker: &str) -> Result<Option<JobRecord>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT worker, job_id, status, error, created_at, updated_at FROM job_log
             WHERE worker = ?1 ORDER BY created_at DESC, updated_at DESC LIMIT 1",
        )?;
        let mut rows = stmt.query(params![worker])?;
        match rows.next()? {
            Some(row) => {
                let status_str: String = row.get(2)?;
                let status = JobStatus::parse(&status_str).ok_or_else(|| {
                    StoreError::Database(format!("unknown job status: {status_str}"))
                })?;
                Ok(Some(JobRecord {
                    worker: row.get(0)?,
                    job_id: row.get(1)?,
                    status,
                    error: row.get(3)?,
                    created_at: parse_ts(&row.get::<_, String>(4)?)?,
                    updated_at: parse_ts(&row.get::<_, String>(5)?)?,
                }))
            }
            None => Ok(None),
        }
    }

    fn set(
        &self,
        worker: &str,
        job_id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = ts(Utc::now());
        self.conn().execute(
            "INSERT INTO job_log (worker, job_id, status, error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT (worker, job_id) DO UPDATE SET
                 status = excluded.status,
                 error = excluded.error,
                 updated_at = excluded.updated_at",
            params![worker, job_id, status.as_str(), error, now],
        )?;
        Ok(())
    }

    fn purge_expired(
        &self,
        worker: &str,
        expires_in: StdDuration,
    ) -> Result<(), StoreError> {
        let cutoff = Utc::now()
            - Duration::from_std(expires_in).unwrap_or_else(|_| Duration::days(3));
        self.conn().execute(
            "DELETE FROM job_log WHERE worker = ?1 AND created_at < ?2",
            params![worker, ts(cutoff)],
        )?;
        Ok(())
    }
}
