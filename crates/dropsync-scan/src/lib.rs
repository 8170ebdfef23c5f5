//! Incremental scan engine for dropsync.
//!
//! This crate drives periodic, cursor-based scans of a change feed and
//! forwards newly discovered files to a file sink.
//!
//! # Overview
//!
//! - [`SyncOrchestrator`] runs scan cycles: pause the scheduler, fetch one
//!   page of changes, advance the cursor, dispatch concurrent downloads,
//!   resume the scheduler.
//! - [`IntervalScheduler`] is the Tokio-backed periodic trigger.
//! - [`DirectoryFeed`] presents a local directory tree as a change feed.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use dropsync_scan::{DirectoryFeed, IntervalScheduler, SyncConfig, SyncOrchestrator};
//! # use dropsync_scan::{FileSink, SyncError};
//! # struct NullSink;
//! # impl FileSink for NullSink {
//! #     fn store_file(&self, _: &str, _: &[u8]) -> Result<(), SyncError> { Ok(()) }
//! # }
//!
//! # async fn run() -> Result<(), SyncError> {
//! let orchestrator = SyncOrchestrator::builder()
//!     .feed(Arc::new(DirectoryFeed::new("/mnt/inbox")))
//!     .sink(Arc::new(NullSink))
//!     .scheduler(Arc::new(IntervalScheduler::new()))
//!     .config(SyncConfig::new("/Camera Uploads"))
//!     .build()?;
//!
//! let mut notifications = orchestrator.subscribe();
//! orchestrator.start();
//!
//! while let Ok(notification) = notifications.recv().await {
//!     println!("{notification}");
//! }
//! # Ok(())
//! # }
//! ```

mod feed;
mod orchestrator;
mod scheduler;

pub use feed::DirectoryFeed;
pub use orchestrator::{CycleOutcome, OrchestratorBuilder, OrchestratorState, SyncOrchestrator};
pub use scheduler::IntervalScheduler;

// Re-export core types for convenience
pub use dropsync_core::{
    ChangeBatch, ChangeEntry, ChangeFeed, Cursor, CycleReport, DownloadedFile, FileSink,
    ScanCriteria, Scheduler, SyncConfig, SyncError, SyncNotification, TickHandler,
};
