//! End-to-end tests for the worker scheduler and the torznab sync
//! pipeline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use torznest_core::indexer::{IndexerKind, TorznabIndexer};
use torznest_core::store::{
    IndexerStore, JobLogStore, JobStatus, SqliteStore, SyncInfoStore, TorrentCategory,
    TorrentInfoStore,
};
use torznest_core::stream_id::StreamIdNormalizer;
use torznest_core::testing::{
    MockAnimeIdMapper, MockClientFactory, MockMagnetResolver, MockTitleProvider,
    MockTorznabClient,
};
use torznest_core::torznab::{Caps, Function, SearchParam, TorzResult};
use torznest_core::worker::{
    drain_sync_queue, new_sync_queue, SyncQueueItem, TorznabSyncer, Worker, WorkerConfig,
    WorkerDependencyTable, WorkerError,
};

type Executor = Arc<dyn Fn() -> BoxFuture<'static, Result<(), WorkerError>> + Send + Sync>;

fn counting_executor(counter: Arc<AtomicUsize>, busy_for: Duration) -> Executor {
    Arc::new(move || {
        let counter = Arc::clone(&counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            if !busy_for.is_zero() {
                tokio::time::sleep(busy_for).await;
            }
            Ok(())
        })
    })
}

fn job_log() -> Arc<dyn JobLogStore> {
    Arc::new(SqliteStore::in_memory().unwrap())
}

#[tokio::test]
async fn test_overlapping_ticks_run_exactly_one_executor() {
    let job_log = job_log();
    let counter = Arc::new(AtomicUsize::new(0));
    let mut config = WorkerConfig::new(
        "itest-exclusion",
        Duration::from_secs(3600),
        counting_executor(Arc::clone(&counter), Duration::from_millis(100)),
    );
    config.run_exclusive = true;
    let worker = Worker::new(config, Arc::clone(&job_log)).unwrap();

    tokio::join!(worker.tick(), worker.tick());

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    let last = job_log.get_last("itest-exclusion").unwrap().unwrap();
    assert_eq!(last.status, JobStatus::Done);
}

#[tokio::test]
async fn test_done_job_within_interval_skips_next_tick() {
    let job_log = job_log();
    let counter = Arc::new(AtomicUsize::new(0));
    let mut config = WorkerConfig::new(
        "itest-done-gate",
        Duration::from_secs(3600),
        counting_executor(Arc::clone(&counter), Duration::ZERO),
    );
    config.run_exclusive = true;
    let worker = Worker::new(config, job_log).unwrap();

    worker.tick().await;
    worker.tick().await;

    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_heartbeat_recovery_restarts_dead_job() {
    let job_log = job_log();
    let counter = Arc::new(AtomicUsize::new(0));
    let mut config = WorkerConfig::new(
        "itest-heartbeat",
        Duration::from_secs(3600),
        counting_executor(Arc::clone(&counter), Duration::ZERO),
    );
    config.run_exclusive = true;
    // Short heartbeat so the staleness horizon is ~300ms.
    config.heartbeat_interval = Duration::from_millis(150);
    let worker = Worker::new(config, Arc::clone(&job_log)).unwrap();

    // A previous run died mid-flight: its job is `started` and nothing
    // will ever heartbeat it again.
    job_log
        .set("itest-heartbeat", "job-crashed", JobStatus::Started, None)
        .unwrap();

    // While the heartbeat is still fresh, the tick must yield.
    worker.tick().await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(400)).await;

    // Once the heartbeat is stale, the dead job is reclassified and the
    // worker runs again.
    worker.tick().await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    let last = job_log.get_last("itest-heartbeat").unwrap().unwrap();
    assert_eq!(last.status, JobStatus::Done);
}

#[tokio::test]
async fn test_failed_job_does_not_block_next_tick() {
    let job_log = job_log();
    let failing: Executor =
        Arc::new(|| Box::pin(async { Err(WorkerError::Failed("boom".to_string())) }));
    let mut config = WorkerConfig::new("itest-failed-retry", Duration::from_secs(3600), failing);
    config.run_exclusive = true;
    let worker = Worker::new(config, Arc::clone(&job_log)).unwrap();

    worker.tick().await;
    let first = job_log.get_last("itest-failed-retry").unwrap().unwrap();
    assert_eq!(first.status, JobStatus::Failed);

    // A failed job never gates the next attempt.
    worker.tick().await;
    let second = job_log.get_last("itest-failed-retry").unwrap().unwrap();
    assert_eq!(second.status, JobStatus::Failed);
    assert_ne!(first.job_id, second.job_id);
}

#[tokio::test]
async fn test_dependency_wait_delays_execution() {
    let job_log = job_log();
    let table = Arc::new(WorkerDependencyTable::new());
    table.set_running("itest-antecedent", true);

    let counter = Arc::new(AtomicUsize::new(0));
    let mut config = WorkerConfig::new(
        "itest-dependent",
        Duration::from_secs(3600),
        counting_executor(Arc::clone(&counter), Duration::ZERO),
    );
    config.wait_poll_interval = Duration::from_millis(20);
    let wait_table = Arc::clone(&table);
    config.should_wait = Some(Box::new(move || {
        wait_table.wait_reason(&["itest-antecedent"])
    }));
    let worker = Worker::new(config, job_log).unwrap();

    let ticking = tokio::spawn(async move {
        worker.tick().await;
    });

    tokio::time::sleep(Duration::from_millis(60)).await;
    // Still waiting on the antecedent.
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    table.set_running("itest-antecedent", false);
    ticking.await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

// --- torznab sync pipeline ---

struct SyncHarness {
    store: Arc<SqliteStore>,
    indexer: TorznabIndexer,
}

fn sync_harness() -> SyncHarness {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let indexer = TorznabIndexer::new(
        IndexerKind::Jackett,
        "http://localhost:9117/api/v2.0/indexers/rarbg/results/torznab",
        "api-key",
        "vault-secret",
    )
    .unwrap();
    IndexerStore::upsert(&*store, &indexer).unwrap();
    SyncHarness { store, indexer }
}

fn syncer_with_client(harness: &SyncHarness, client: Arc<MockTorznabClient>) -> TorznabSyncer {
    let factory = MockClientFactory::new();
    factory.register(&harness.indexer.composite_id(), client);

    let titles = MockTitleProvider::new().with_imdb_title(
        "tt0903747",
        "Breaking Bad",
        None,
        Some(2008),
    );

    TorznabSyncer::new(
        harness.store.clone() as Arc<dyn IndexerStore>,
        harness.store.clone() as Arc<dyn SyncInfoStore>,
        harness.store.clone() as Arc<dyn TorrentInfoStore>,
        Arc::new(titles),
        Arc::new(StreamIdNormalizer::new(Arc::new(MockAnimeIdMapper::new()))),
        Arc::new(factory),
        Arc::new(MockMagnetResolver::new()),
    )
}

fn text_client() -> MockTorznabClient {
    MockTorznabClient::named("jackett:rarbg").with_caps(Caps {
        functions: [Function::Search].into(),
        params: [SearchParam::Query].into(),
    })
}

#[tokio::test]
async fn test_queue_worker_feeds_sync_worker() {
    let harness = sync_harness();

    // User traffic lands in the in-memory queue; the queue worker turns it
    // into persisted sync rows.
    let queue = new_sync_queue(false);
    queue.queue(SyncQueueItem {
        sid: "tt0903747:1:1".to_string(),
    });
    let indexer_store = harness.store.clone() as Arc<dyn IndexerStore>;
    let sync_info = harness.store.clone() as Arc<dyn SyncInfoStore>;
    drain_sync_queue(&queue, &indexer_store, &sync_info).unwrap();

    assert!(queue.is_empty());
    assert!(sync_info.has_sync_pending().unwrap());

    let client = Arc::new(
        text_client()
            .with_results_for(
                "q=Breaking%20Bad%20S01E01",
                vec![TorzResult {
                    hash: "abc123".to_string(),
                    title: "Breaking Bad S01E01 1080p WEB-DL".to_string(),
                    size: 1_000_000,
                    seeders: 11,
                    ..TorzResult::default()
                }],
            )
            .with_results(Vec::new()),
    );
    let syncer = syncer_with_client(&harness, client.clone());
    syncer.run().await.unwrap();

    // Every granularity of the synced key is now fresh.
    for sid in ["tt0903747", "tt0903747:1", "tt0903747:1:1"] {
        assert!(
            !harness
                .store
                .should_sync(IndexerKind::Jackett, &harness.indexer.id, sid)
                .unwrap(),
            "expected {sid} to be synced"
        );
    }
    assert!(!harness.store.has_sync_pending().unwrap());

    // One query per granularity, serialized within the indexer.
    assert_eq!(client.search_count(), 3);

    // Crawled metadata lands in the long-term store with its category.
    let stored = harness
        .store
        .get_by_hashes(&["abc123".to_string()])
        .unwrap();
    assert_eq!(stored.get("abc123").unwrap().category, TorrentCategory::Series);
}

#[tokio::test]
async fn test_fresh_variant_is_not_recrawled() {
    let harness = sync_harness();
    harness
        .store
        .queue(IndexerKind::Jackett, &harness.indexer.id, "tt0903747:1:1")
        .unwrap();
    // The coarse granularities were synced moments ago.
    harness
        .store
        .mark_synced(IndexerKind::Jackett, &harness.indexer.id, "tt0903747", 0)
        .unwrap();
    harness
        .store
        .mark_synced(IndexerKind::Jackett, &harness.indexer.id, "tt0903747:1", 0)
        .unwrap();

    let client = Arc::new(text_client().with_results(Vec::new()));
    let syncer = syncer_with_client(&harness, client.clone());
    syncer.run().await.unwrap();

    // Only the episode variant was crawled.
    assert_eq!(client.search_count(), 1);
    assert_eq!(
        client.searches()[0].get(SearchParam::Query),
        Some("Breaking Bad S01E01")
    );
}

#[tokio::test]
async fn test_sync_failure_keeps_row_pending_and_recovers() {
    let harness = sync_harness();
    harness
        .store
        .queue(IndexerKind::Jackett, &harness.indexer.id, "tt0903747:1:1")
        .unwrap();

    // First pass: the indexer is down mid-flight.
    let broken = Arc::new(text_client().with_failure("connection reset"));
    let syncer = syncer_with_client(&harness, broken);
    syncer.run().await.unwrap();

    // The row is still pending, with the cause recorded.
    assert!(harness.store.has_sync_pending().unwrap());
    let pending = harness.store.get_sync_pending().unwrap();
    assert!(pending
        .iter()
        .any(|row| row.error.as_deref().is_some_and(|e| e.contains("connection reset"))));

    // Next tick re-runs the same plan and succeeds.
    let working = Arc::new(text_client().with_results(Vec::new()));
    let syncer = syncer_with_client(&harness, working.clone());
    syncer.run().await.unwrap();

    assert!(!harness.store.has_sync_pending().unwrap());
    assert_eq!(working.search_count(), 3);
}

#[tokio::test]
async fn test_sync_worker_without_pending_rows_is_a_no_op() {
    let harness = sync_harness();
    let client = Arc::new(text_client());
    let syncer = syncer_with_client(&harness, client.clone());
    syncer.run().await.unwrap();
    assert_eq!(client.search_count(), 0);
}

#[tokio::test]
async fn test_sync_debounce_and_freshness_double_gate() {
    let harness = sync_harness();
    let sync_info = harness.store.clone() as Arc<dyn SyncInfoStore>;

    // The in-memory queue debounces flapping requests for the same id.
    let queue = new_sync_queue(false);
    for _ in 0..5 {
        queue.queue(SyncQueueItem {
            sid: "tt0903747:1:1".to_string(),
        });
    }
    assert_eq!(queue.len(), 1);

    let indexer_store = harness.store.clone() as Arc<dyn IndexerStore>;
    drain_sync_queue(&queue, &indexer_store, &sync_info).unwrap();

    // The freshness gate suppresses needless crawls after a sync.
    let client = Arc::new(text_client().with_results(Vec::new()));
    let syncer = syncer_with_client(&harness, client.clone());
    syncer.run().await.unwrap();
    assert_eq!(client.search_count(), 3);

    syncer.run().await.unwrap();
    // Nothing pending, nothing re-crawled.
    assert_eq!(client.search_count(), 3);
}
