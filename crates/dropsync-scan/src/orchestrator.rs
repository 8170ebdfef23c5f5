//! Scan-cycle driver.
//!
//! A [`SyncOrchestrator`] owns the change-feed cursor and runs one scan cycle
//! per scheduler tick:
//!
//! 1. disarm the scheduler,
//! 2. fetch one page of changes with the current cursor,
//! 3. store the returned cursor,
//! 4. spawn a download-and-store task for each eligible entry,
//! 5. re-arm the scheduler, on every exit path.
//!
//! Downloads are not awaited by the cycle. Each cycle's downloads are joined
//! by a collector task that turns failures into
//! [`SyncNotification::ErrorOccurred`] and finishes with
//! [`SyncNotification::CycleCompleted`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;

use async_trait::async_trait;
use compact_str::CompactString;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::{Id, JoinSet};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use dropsync_core::{
    ChangeEntry, ChangeFeed, Cursor, CycleReport, FileSink, ScanCriteria, Scheduler, SyncConfig,
    SyncError, SyncNotification, TickHandler,
};

/// Lifecycle state of an orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Not started, or stopped. No cycles are scheduled.
    Dormant,
    /// Started and waiting for the next tick.
    Idle,
    /// A cycle's fetch-and-dispatch phase is running.
    Scanning,
}

/// What the fetch-and-dispatch phase of one cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another cycle was already running; nothing was done.
    Skipped,
    /// The change feed failed; the cursor was left unchanged.
    FeedFailed { cycle: u64, message: String },
    /// The cursor advanced and eligible entries were dispatched.
    Dispatched {
        cycle: u64,
        entries_seen: usize,
        dispatched: usize,
    },
}

impl CycleOutcome {
    /// Number of downloads started by the cycle.
    pub fn dispatched(&self) -> usize {
        match self {
            Self::Dispatched { dispatched, .. } => *dispatched,
            _ => 0,
        }
    }
}

/// Drives incremental scans of a change feed into a file sink.
///
/// Cheap to clone; clones share the same cursor and scheduler.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    feed: Arc<dyn ChangeFeed>,
    sink: Arc<dyn FileSink>,
    scheduler: Arc<dyn Scheduler>,
    config: SyncConfig,
    criteria: ScanCriteria,
    cursor: Mutex<Option<Cursor>>,
    /// Held while arming or disarming the scheduler so a stop cannot
    /// interleave with a resume.
    started: Mutex<bool>,
    scanning: AtomicBool,
    cycles: AtomicU64,
    notify_tx: broadcast::Sender<SyncNotification>,
    tasks: TaskTracker,
    download_limit: Option<Arc<Semaphore>>,
}

impl SyncOrchestrator {
    /// Create a new orchestrator builder.
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Arm the scheduler with the configured interval.
    pub fn start(&self) {
        let mut started = lock(&self.inner.started);
        *started = true;
        self.inner.scheduler.start(self.inner.config.interval());
        info!(
            folder = self.inner.criteria.root_prefix(),
            interval_ms = self.inner.config.interval_ms,
            "sync started"
        );
    }

    /// Disarm the scheduler. In-flight cycles and downloads run to completion,
    /// but no further cycle is scheduled until [`start`](Self::start).
    pub fn stop(&self) {
        let mut started = lock(&self.inner.started);
        *started = false;
        self.inner.scheduler.stop();
        info!("sync stopped");
    }

    /// Run one scan cycle now.
    ///
    /// Returns once the cursor is updated and downloads are dispatched; use
    /// [`wait_idle`](Self::wait_idle) to await the downloads themselves.
    pub async fn run_cycle(&self) -> CycleOutcome {
        self.inner.run_cycle().await
    }

    /// Wait until every dispatched download has finished.
    pub async fn wait_idle(&self) {
        self.inner.tasks.wait().await;
    }

    /// Subscribe to sync notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncNotification> {
        self.inner.notify_tx.subscribe()
    }

    /// The cursor the next fetch will use.
    pub fn cursor(&self) -> Option<Cursor> {
        lock(&self.inner.cursor).clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> OrchestratorState {
        if self.inner.scanning.load(Ordering::SeqCst) {
            OrchestratorState::Scanning
        } else if *lock(&self.inner.started) {
            OrchestratorState::Idle
        } else {
            OrchestratorState::Dormant
        }
    }

    /// Number of cycles run so far, including failed ones.
    pub fn cycles_run(&self) -> u64 {
        self.inner.cycles.load(Ordering::SeqCst)
    }

    /// The configuration this orchestrator was built with.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// The eligibility criteria applied to fetched entries.
    pub fn criteria(&self) -> &ScanCriteria {
        &self.inner.criteria
    }
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("folder", &self.inner.criteria.root_prefix())
            .field("state", &self.state())
            .field("cursor", &self.cursor())
            .finish()
    }
}

impl Inner {
    async fn run_cycle(self: &Arc<Self>) -> CycleOutcome {
        if self.scanning.swap(true, Ordering::SeqCst) {
            debug!("scan cycle already running, skipping tick");
            return CycleOutcome::Skipped;
        }

        self.scheduler.stop();
        let _resume = ResumeOnExit { inner: self };

        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let cursor = lock(&self.cursor).clone();
        debug!(cycle, cursor = ?cursor, "fetching changes");

        let batch = match self.feed.fetch_changes(cursor.as_ref()).await {
            Ok(batch) => batch,
            Err(err) => {
                let message = err.to_string();
                warn!(cycle, error = %message, "change feed fetch failed");
                self.publish(SyncNotification::error(message.clone()));
                return CycleOutcome::FeedFailed { cycle, message };
            }
        };

        *lock(&self.cursor) = Some(batch.cursor.clone());

        let entries_seen = batch.entries.len();
        let eligible: Vec<ChangeEntry> = batch
            .entries
            .into_iter()
            .filter(|entry| self.criteria.is_eligible(entry))
            .collect();
        let dispatched = eligible.len();

        info!(cycle, entries_seen, dispatched, has_more = batch.has_more, "changes fetched");
        self.dispatch(cycle, entries_seen, eligible);

        CycleOutcome::Dispatched {
            cycle,
            entries_seen,
            dispatched,
        }
    }

    /// Spawn one download task per entry plus a collector joining them.
    fn dispatch(&self, cycle: u64, entries_seen: usize, entries: Vec<ChangeEntry>) {
        let mut downloads = JoinSet::new();
        let mut paths = HashMap::with_capacity(entries.len());

        for entry in entries {
            let handle = downloads.spawn(sync_file(
                Arc::clone(&self.feed),
                Arc::clone(&self.sink),
                self.download_limit.clone(),
                self.notify_tx.clone(),
                entry.path.clone(),
            ));
            paths.insert(handle.id(), entry.path);
        }

        self.tasks.spawn(collect_downloads(
            cycle,
            entries_seen,
            downloads,
            paths,
            self.notify_tx.clone(),
        ));
    }

    fn publish(&self, notification: SyncNotification) {
        // No subscribers is fine
        let _ = self.notify_tx.send(notification);
    }
}

/// Clears the single-flight flag and re-arms the scheduler when dropped.
struct ResumeOnExit<'a> {
    inner: &'a Inner,
}

impl Drop for ResumeOnExit<'_> {
    fn drop(&mut self) {
        let started = lock(&self.inner.started);
        self.inner.scanning.store(false, Ordering::SeqCst);
        if *started {
            self.inner.scheduler.resume(self.inner.config.interval());
        }
    }
}

/// Tick handler registered with the scheduler.
///
/// Holds a weak reference so the scheduler does not keep the orchestrator alive.
struct CycleTrigger {
    inner: Weak<Inner>,
}

#[async_trait]
impl TickHandler for CycleTrigger {
    async fn on_tick(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        // A tick already in delivery when stop() ran
        if !*lock(&inner.started) {
            debug!("ignoring tick after stop");
            return;
        }
        inner.run_cycle().await;
    }
}

/// Download one file and hand it to the sink. Returns the number of bytes stored.
async fn sync_file(
    feed: Arc<dyn ChangeFeed>,
    sink: Arc<dyn FileSink>,
    limit: Option<Arc<Semaphore>>,
    notify_tx: broadcast::Sender<SyncNotification>,
    path: CompactString,
) -> Result<u64, SyncError> {
    let _permit = match limit {
        Some(semaphore) => Some(semaphore.acquire_owned().await.map_err(|e| SyncError::Other {
            message: e.to_string(),
        })?),
        None => None,
    };

    let file = feed.download_file(&path).await?;
    let name = file.file_name().to_string();
    if name.is_empty() {
        return Err(SyncError::InvalidName {
            name: file.path.to_string(),
        });
    }

    let synced_path = file.path.to_string();
    let bytes = file.content.len() as u64;
    tokio::task::spawn_blocking(move || sink.store_file(&name, &file.content))
        .await
        .map_err(|e| SyncError::Other {
            message: format!("Store task for {synced_path} failed: {e}"),
        })??;

    info!(path = %synced_path, bytes, "file synchronized");
    let _ = notify_tx.send(SyncNotification::synchronized(synced_path));
    Ok(bytes)
}

/// Join the downloads of one cycle, reporting each failure and a final summary.
async fn collect_downloads(
    cycle: u64,
    entries_seen: usize,
    mut downloads: JoinSet<Result<u64, SyncError>>,
    paths: HashMap<Id, CompactString>,
    notify_tx: broadcast::Sender<SyncNotification>,
) {
    let started = Instant::now();
    let mut report = CycleReport {
        cycle,
        entries_seen,
        dispatched: downloads.len(),
        ..Default::default()
    };

    while let Some(joined) = downloads.join_next_with_id().await {
        let message = match joined {
            Ok((_, Ok(bytes))) => {
                report.succeeded += 1;
                report.bytes_stored += bytes;
                continue;
            }
            Ok((_, Err(err))) => err.to_string(),
            Err(err) => {
                let path = paths.get(&err.id()).map(|p| p.as_str()).unwrap_or("<unknown>");
                format!("Sync task for {path} failed: {err}")
            }
        };

        report.failed += 1;
        warn!(cycle, error = %message, "file sync failed");
        let _ = notify_tx.send(SyncNotification::error(message));
    }

    report.elapsed = started.elapsed();
    if report.dispatched > 0 {
        info!(cycle, succeeded = report.succeeded, failed = report.failed, "cycle downloads finished");
    }
    let _ = notify_tx.send(SyncNotification::CycleCompleted(report));
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Builder for [`SyncOrchestrator`].
///
/// The change feed, file sink and scheduler are required.
#[derive(Default)]
pub struct OrchestratorBuilder {
    feed: Option<Arc<dyn ChangeFeed>>,
    sink: Option<Arc<dyn FileSink>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    config: Option<SyncConfig>,
    initial_cursor: Option<Cursor>,
}

impl OrchestratorBuilder {
    /// Set the change feed.
    pub fn feed<F: ChangeFeed + 'static>(mut self, feed: Arc<F>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Set the file sink.
    pub fn sink<S: FileSink + 'static>(mut self, sink: Arc<S>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Set the scheduler.
    pub fn scheduler<S: Scheduler + 'static>(mut self, scheduler: Arc<S>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Set the configuration (defaults to [`SyncConfig::default`]).
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Resume from a previously returned cursor instead of a full listing.
    pub fn initial_cursor(mut self, cursor: impl Into<Cursor>) -> Self {
        self.initial_cursor = Some(cursor.into());
        self
    }

    /// Build the orchestrator and register it with the scheduler.
    pub fn build(self) -> Result<SyncOrchestrator, SyncError> {
        let feed = self.feed.ok_or(SyncError::MissingCollaborator {
            name: "change feed",
        })?;
        let sink = self
            .sink
            .ok_or(SyncError::MissingCollaborator { name: "file sink" })?;
        let scheduler = self
            .scheduler
            .ok_or(SyncError::MissingCollaborator { name: "scheduler" })?;
        let config = self.config.unwrap_or_default();

        let (notify_tx, _) = broadcast::channel(config.notification_capacity.max(1));
        let tasks = TaskTracker::new();
        // A closed tracker still accepts tasks; wait() then resolves whenever it is empty
        tasks.close();

        let inner = Arc::new(Inner {
            feed,
            sink,
            scheduler: Arc::clone(&scheduler),
            criteria: config.criteria(),
            download_limit: config
                .max_concurrent_downloads
                .map(|limit| Arc::new(Semaphore::new(limit.max(1)))),
            config,
            cursor: Mutex::new(self.initial_cursor.filter(|c| !c.is_blank())),
            started: Mutex::new(false),
            scanning: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
            notify_tx,
            tasks,
        });

        scheduler.register(Arc::new(CycleTrigger {
            inner: Arc::downgrade(&inner),
        }));

        Ok(SyncOrchestrator { inner })
    }
}
