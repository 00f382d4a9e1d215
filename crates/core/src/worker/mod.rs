//! Periodic background workers.
//!
//! Each named worker runs its executor on an interval, guarded by a
//! process-wide advisory lock and, for exclusive workers, by the persisted
//! job log: a still-running peer (detected through its heartbeat) or a
//! recently finished job makes the tick a no-op. A worker whose heartbeat
//! has gone silent is reclassified as failed and restarted. Panics are
//! captured and recorded; they never take the process down.

mod advisory_lock;
mod deps;
mod job_tracker;
mod queue;
mod queue_torznab;
mod sync_torznab;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::WorkersConfig;
use crate::store::{JobLogStore, JobStatus};

pub use advisory_lock::AdvisoryLock;
pub use deps::WorkerDependencyTable;
pub use job_tracker::JobTracker;
pub use queue::{WorkerQueue, DEFAULT_DEBOUNCE};
pub use queue_torznab::{drain_sync_queue, new_sync_queue, SyncQueueItem};
pub use sync_torznab::TorznabSyncer;

use thiserror::Error;

/// Name of the worker draining the sync queue into persisted rows.
pub const QUEUE_TORZNAB_SYNC_WORKER: &str = "queue-torznab-indexer-sync";
/// Name of the worker crawling pending sync rows.
pub const SYNC_TORZNAB_WORKER: &str = "sync-torznab-indexer";

/// Every schedulable worker name.
pub const WORKER_NAMES: [&str; 2] = [QUEUE_TORZNAB_SYNC_WORKER, SYNC_TORZNAB_WORKER];

const QUEUE_WORKER_INTERVAL: Duration = Duration::from_secs(10 * 60);
const SYNC_WORKER_INTERVAL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
    #[error("{0}")]
    Failed(String),
}

type ExecutorFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), WorkerError>> + Send + Sync>;
type PredicateFn = Box<dyn Fn() -> bool + Send + Sync>;
type WaitFn = Box<dyn Fn() -> Option<String> + Send + Sync>;
type HookFn = Box<dyn Fn() + Send + Sync>;

/// Configuration of one named worker.
pub struct WorkerConfig {
    pub name: &'static str,
    pub interval: Duration,
    pub heartbeat_interval: Duration,
    pub run_at_startup_after: Option<Duration>,
    pub run_exclusive: bool,
    pub disabled: bool,
    pub executor: ExecutorFn,
    pub should_skip: Option<PredicateFn>,
    pub should_wait: Option<WaitFn>,
    pub on_start: Option<HookFn>,
    pub on_end: Option<HookFn>,
    /// How long to sleep between dependency-wait re-checks.
    pub wait_poll_interval: Duration,
}

impl WorkerConfig {
    pub fn new(name: &'static str, interval: Duration, executor: ExecutorFn) -> Self {
        Self {
            name,
            interval,
            heartbeat_interval: Duration::from_secs(5),
            run_at_startup_after: None,
            run_exclusive: false,
            disabled: false,
            executor,
            should_skip: None,
            should_wait: None,
            on_start: None,
            on_end: None,
            wait_poll_interval: Duration::from_secs(60),
        }
    }
}

/// A scheduled worker.
pub struct Worker {
    config: WorkerConfig,
    tracker: JobTracker,
}

impl Worker {
    /// Build a worker, or `None` when it is disabled.
    pub fn new(config: WorkerConfig, job_log: Arc<dyn JobLogStore>) -> Option<Self> {
        if config.disabled {
            return None;
        }
        let tracker = JobTracker::new(config.name, job_log, config.interval);
        Some(Self { config, tracker })
    }

    /// One scheduling pass: skip check, dependency wait, lock, exclusive
    /// gate, then the executor under a heartbeat.
    pub async fn tick(&self) {
        let name = self.config.name;

        if let Some(should_skip) = &self.config.should_skip {
            if should_skip() {
                info!(worker = name, "skipping");
                return;
            }
        }

        if let Some(should_wait) = &self.config.should_wait {
            while let Some(reason) = should_wait() {
                info!(worker = name, reason = %reason, "waiting");
                tokio::time::sleep(self.config.wait_poll_interval).await;
            }
        }

        if let Some(on_start) = &self.config.on_start {
            on_start();
        }
        self.run_job().await;
        if let Some(on_end) = &self.config.on_end {
            on_end();
        }
    }

    async fn run_job(&self) {
        let name = self.config.name;

        let mut lock = AdvisoryLock::new("worker", name);
        if !lock.try_acquire() {
            debug!(worker = name, lock = lock.name(), "skipping, another instance is running");
            return;
        }

        let interval = chrono::Duration::from_std(self.config.interval)
            .unwrap_or_else(|_| chrono::Duration::minutes(30));
        let heartbeat_tolerance = self
            .config
            .heartbeat_interval
            .min(Duration::from_secs(10));
        let heartbeat_horizon =
            chrono::Duration::from_std(self.config.heartbeat_interval + heartbeat_tolerance)
                .unwrap_or_else(|_| chrono::Duration::seconds(15));

        if self.config.run_exclusive {
            let last = match self.tracker.last() {
                Ok(last) => last,
                Err(err) => {
                    error!(worker = name, error = %err, "failed to read last job");
                    return;
                }
            };
            if let Some(job) = last {
                let now = Utc::now();
                match job.status {
                    JobStatus::Started => {
                        if now - job.updated_at <= heartbeat_horizon {
                            if now - job.created_at > interval {
                                warn!(
                                    worker = name,
                                    job_id = %job.job_id,
                                    "skipping, last job is still running, for too long"
                                );
                            } else {
                                info!(
                                    worker = name,
                                    job_id = %job.job_id,
                                    "skipping, last job is still running"
                                );
                            }
                            return;
                        }

                        warn!(
                            worker = name,
                            job_id = %job.job_id,
                            "last job heartbeat timed out, restarting"
                        );
                        if let Err(err) =
                            self.tracker
                                .set(&job.job_id, JobStatus::Failed, Some("heartbeat timed out"))
                        {
                            error!(worker = name, error = %err, job_id = %job.job_id, "failed to set last job status");
                        }
                    }
                    JobStatus::Done => {
                        if now - job.created_at < interval {
                            info!(worker = name, job_id = %job.job_id, "already done");
                            return;
                        }
                    }
                    JobStatus::Failed => {
                        warn!(
                            worker = name,
                            job_id = %job.job_id,
                            error = job.error.as_deref().unwrap_or_default(),
                            "last job failed"
                        );
                    }
                }
            }
        }

        let job_id = Utc::now().format("%Y-%m-%d %H:%M:%S%.9f").to_string();
        if let Err(err) = self.tracker.set(&job_id, JobStatus::Started, None) {
            error!(worker = name, error = %err, job_id = %job_id, "failed to set job status");
            return;
        }
        // The lock only guards claiming the job; the job itself is tracked
        // through the log.
        lock.release();

        let (stop_heartbeat, mut heartbeat_stopped) = tokio::sync::oneshot::channel::<()>();
        let heartbeat = {
            let tracker = self.tracker.clone();
            let job_id = job_id.clone();
            let beat_every = self.config.heartbeat_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(beat_every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(err) = tracker.set(&job_id, JobStatus::Started, None) {
                                error!(error = %err, job_id = %job_id, "failed to set job status heartbeat");
                            }
                        }
                        _ = &mut heartbeat_stopped => break,
                    }
                }
            })
        };

        // Run the executor on its own task, so a panic is contained and
        // surfaces as a join error.
        let result = tokio::spawn((self.config.executor)()).await;
        let _ = stop_heartbeat.send(());
        let _ = heartbeat.await;

        match result {
            Ok(Ok(())) => {
                if let Err(err) = self.tracker.set(&job_id, JobStatus::Done, None) {
                    error!(worker = name, error = %err, job_id = %job_id, "failed to set job status");
                } else {
                    info!(worker = name, job_id = %job_id, "done");
                }
            }
            Ok(Err(err)) => {
                error!(worker = name, error = %err, job_id = %job_id, "worker failure");
                if let Err(err) = self
                    .tracker
                    .set(&job_id, JobStatus::Failed, Some(&err.to_string()))
                {
                    error!(worker = name, error = %err, job_id = %job_id, "failed to set job status");
                }
            }
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    format!("panic: {}", panic_message(join_err.into_panic()))
                } else {
                    join_err.to_string()
                };
                error!(worker = name, error = %message, job_id = %job_id, "worker panic");
                if let Err(err) = self.tracker.set(&job_id, JobStatus::Failed, Some(&message)) {
                    error!(worker = name, error = %err, job_id = %job_id, "failed to set job status");
                }
            }
        }
    }

    /// Start the interval loop (plus the optional startup run).
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown, _) = broadcast::channel(1);
        let worker = Arc::new(self);
        let name = worker.config.name;

        if let Some(delay) = worker.config.run_at_startup_after {
            let worker = Arc::clone(&worker);
            let mut shutdown_rx = shutdown.subscribe();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => worker.tick().await,
                    _ = shutdown_rx.recv() => {}
                }
            });
        }

        {
            let worker = Arc::clone(&worker);
            let mut shutdown_rx = shutdown.subscribe();
            tokio::spawn(async move {
                info!(worker = name, "worker started");
                let mut timer = tokio::time::interval(worker.config.interval);
                timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
                // The first tick of an interval fires immediately; the
                // startup run is handled separately.
                timer.tick().await;
                loop {
                    tokio::select! {
                        _ = timer.tick() => worker.tick().await,
                        _ = shutdown_rx.recv() => {
                            info!(worker = name, "worker stopped");
                            break;
                        }
                    }
                }
            });
        }

        WorkerHandle { name, shutdown }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle to a spawned worker loop.
pub struct WorkerHandle {
    pub name: &'static str,
    shutdown: broadcast::Sender<()>,
}

impl WorkerHandle {
    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }
}

/// Everything the torznab sync pipeline needs.
pub struct SyncWorkerDeps {
    pub indexer_store: Arc<dyn crate::store::IndexerStore>,
    pub sync_info: Arc<dyn crate::store::SyncInfoStore>,
    pub job_log: Arc<dyn JobLogStore>,
    pub queue: Arc<WorkerQueue<SyncQueueItem>>,
    pub syncer: Arc<TorznabSyncer>,
}

/// Wire up and start the torznab sync workers.
pub fn init_workers(config: &WorkersConfig, deps: SyncWorkerDeps) -> Vec<WorkerHandle> {
    let mut handles = Vec::new();

    {
        let queue = Arc::clone(&deps.queue);
        let indexer_store = Arc::clone(&deps.indexer_store);
        let sync_info = Arc::clone(&deps.sync_info);
        let executor: ExecutorFn = Arc::new(move || {
            let queue = Arc::clone(&queue);
            let indexer_store = Arc::clone(&indexer_store);
            let sync_info = Arc::clone(&sync_info);
            Box::pin(async move { queue_torznab::drain_sync_queue(&queue, &indexer_store, &sync_info) })
        });

        let mut worker_config =
            WorkerConfig::new(QUEUE_TORZNAB_SYNC_WORKER, QUEUE_WORKER_INTERVAL, executor);
        worker_config.run_exclusive = true;
        worker_config.disabled =
            config.is_disabled(QUEUE_TORZNAB_SYNC_WORKER) || deps.queue.disabled;
        let skip_queue = Arc::clone(&deps.queue);
        let skip_indexers = Arc::clone(&deps.indexer_store);
        worker_config.should_skip = Some(Box::new(move || {
            skip_queue.is_empty() || !skip_indexers.exists().unwrap_or(false)
        }));

        if let Some(worker) = Worker::new(worker_config, Arc::clone(&deps.job_log)) {
            handles.push(worker.spawn());
        }
    }

    {
        let syncer = Arc::clone(&deps.syncer);
        let executor: ExecutorFn = Arc::new(move || {
            let syncer = Arc::clone(&syncer);
            Box::pin(async move { syncer.run().await })
        });

        let mut worker_config =
            WorkerConfig::new(SYNC_TORZNAB_WORKER, SYNC_WORKER_INTERVAL, executor);
        worker_config.run_exclusive = true;
        worker_config.disabled = config.is_disabled(SYNC_TORZNAB_WORKER);
        let skip_sync_info = Arc::clone(&deps.sync_info);
        worker_config.should_skip =
            Some(Box::new(move || !skip_sync_info.has_sync_pending().unwrap_or(false)));

        if let Some(worker) = Worker::new(worker_config, Arc::clone(&deps.job_log)) {
            handles.push(worker.spawn());
        }
    }

    handles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_executor(counter: Arc<AtomicUsize>) -> ExecutorFn {
        Arc::new(move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn test_tick_runs_executor_and_records_done() {
        let job_log: Arc<dyn JobLogStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let counter = Arc::new(AtomicUsize::new(0));
        let config = WorkerConfig::new(
            "test-tick-done",
            Duration::from_secs(60),
            counting_executor(Arc::clone(&counter)),
        );
        let worker = Worker::new(config, Arc::clone(&job_log)).unwrap();

        worker.tick().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let last = job_log.get_last("test-tick-done").unwrap().unwrap();
        assert_eq!(last.status, JobStatus::Done);
    }

    #[tokio::test]
    async fn test_disabled_worker_is_not_built() {
        let job_log: Arc<dyn JobLogStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let counter = Arc::new(AtomicUsize::new(0));
        let mut config = WorkerConfig::new(
            "test-disabled",
            Duration::from_secs(60),
            counting_executor(counter),
        );
        config.disabled = true;
        assert!(Worker::new(config, job_log).is_none());
    }

    #[tokio::test]
    async fn test_should_skip_prevents_execution() {
        let job_log: Arc<dyn JobLogStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let counter = Arc::new(AtomicUsize::new(0));
        let mut config = WorkerConfig::new(
            "test-skip",
            Duration::from_secs(60),
            counting_executor(Arc::clone(&counter)),
        );
        config.should_skip = Some(Box::new(|| true));
        let worker = Worker::new(config, job_log).unwrap();

        worker.tick().await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_executor_error_records_failed() {
        let job_log: Arc<dyn JobLogStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let executor: ExecutorFn = Arc::new(|| {
            Box::pin(async { Err(WorkerError::Failed("indexer unreachable".to_string())) })
        });
        let config = WorkerConfig::new("test-exec-error", Duration::from_secs(60), executor);
        let worker = Worker::new(config, Arc::clone(&job_log)).unwrap();

        worker.tick().await;

        let last = job_log.get_last("test-exec-error").unwrap().unwrap();
        assert_eq!(last.status, JobStatus::Failed);
        assert_eq!(last.error.as_deref(), Some("indexer unreachable"));
    }

    #[tokio::test]
    async fn test_executor_panic_is_captured() {
        let job_log: Arc<dyn JobLogStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let executor: ExecutorFn = Arc::new(|| {
            Box::pin(async {
                panic!("boom");
            })
        });
        let config = WorkerConfig::new("test-panic", Duration::from_secs(60), executor);
        let worker = Worker::new(config, Arc::clone(&job_log)).unwrap();

        // Must not propagate the panic.
        worker.tick().await;

        let last = job_log.get_last("test-panic").unwrap().unwrap();
        assert_eq!(last.status, JobStatus::Failed);
        assert!(last.error.as_deref().unwrap().contains("boom"));
    }
}
