//! Core types and traits for dropsync.
//!
//! This crate provides the data model shared by the dropsync crates: change
//! feed entries and cursors, the eligibility filter, configuration, errors,
//! notifications, and the collaborator traits a sync orchestrator is built
//! from.

mod config;
mod entry;
mod error;
mod filter;
mod notification;
mod traits;

pub use config::{
    DEFAULT_INTERVAL_MS, DEFAULT_NOTIFICATION_CAPACITY, SyncConfig, SyncConfigBuilder,
    SyncConfigBuilderError,
};
pub use entry::{ChangeBatch, ChangeEntry, Cursor, DownloadedFile, EntryMetadata, base_name};
pub use error::SyncError;
pub use filter::{DEFAULT_SCAN_ROOT, ScanCriteria, is_eligible};
pub use notification::{CycleReport, SyncNotification};
pub use traits::{ChangeFeed, FileSink, Scheduler, TickHandler};
