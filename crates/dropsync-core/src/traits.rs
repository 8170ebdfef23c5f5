//! Contracts for the collaborators a sync orchestrator is built from.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::entry::{ChangeBatch, Cursor, DownloadedFile};
use crate::error::SyncError;

/// Source of filesystem changes, addressed by cursor.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Fetch all changes since `cursor`; `None` requests a full listing.
    ///
    /// Transport and auth failures are reported as [`SyncError::FeedUnavailable`].
    /// Implementations do not retry.
    async fn fetch_changes(&self, cursor: Option<&Cursor>) -> Result<ChangeBatch, SyncError>;

    /// Download the content of the file at `path`.
    async fn download_file(&self, path: &str) -> Result<DownloadedFile, SyncError>;
}

/// Destination for downloaded files.
///
/// Must tolerate concurrent calls for distinct names.
pub trait FileSink: Send + Sync {
    /// Persist `content` under `name`, replacing any previous file of that name.
    fn store_file(&self, name: &str, content: &[u8]) -> Result<(), SyncError>;
}

/// Callback invoked each time a [`Scheduler`] fires.
#[async_trait]
pub trait TickHandler: Send + Sync {
    /// Handle one tick. The scheduler awaits this before delivering the next tick.
    async fn on_tick(&self);
}

/// A restartable periodic trigger.
pub trait Scheduler: Send + Sync {
    /// Register the callback fired on every tick, replacing any previous one.
    fn register(&self, handler: Arc<dyn TickHandler>);

    /// Arm the trigger: fire immediately, then every `period`.
    ///
    /// Re-arms with the new period when already armed.
    fn start(&self, period: Duration);

    /// Arm the trigger with the first fire one `period` from now.
    fn resume(&self, period: Duration);

    /// Disarm the trigger. No-op when already disarmed.
    fn stop(&self);

    /// Whether the trigger is currently armed.
    fn is_armed(&self) -> bool;
}
