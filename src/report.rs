//! Gathering sync notifications for terminal output.

use serde::Serialize;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tracing::warn;

use dropsync_core::{CycleReport, SyncNotification};

/// Everything one scan cycle reported.
#[derive(Debug, Default, Serialize)]
pub struct CycleSummary {
    /// Final counts for the cycle; `None` if the cycle never completed.
    pub report: Option<CycleReport>,
    /// Paths of stored files, sorted.
    pub stored: Vec<String>,
    /// Per-file failure messages.
    pub errors: Vec<String>,
    /// Notifications lost because output fell behind the channel.
    pub missed: u64,
}

impl CycleSummary {
    /// Number of failed files, preferring the cycle's own count.
    pub fn failed(&self) -> usize {
        self.report
            .as_ref()
            .map_or(self.errors.len(), |report| report.failed)
    }
}

/// Receive notifications until the first cycle report arrives.
///
/// Lagging skips the lost events but keeps reading, so the final
/// [`SyncNotification::CycleCompleted`] is still observed. Spawn this before
/// starting the cycle so it drains the channel while downloads run.
pub async fn collect_cycle(mut rx: broadcast::Receiver<SyncNotification>) -> CycleSummary {
    let mut summary = CycleSummary::default();

    loop {
        match rx.recv().await {
            Ok(SyncNotification::FileSynchronized { path }) => summary.stored.push(path),
            Ok(SyncNotification::ErrorOccurred { message }) => summary.errors.push(message),
            Ok(SyncNotification::CycleCompleted(report)) => {
                summary.report = Some(report);
                break;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "notification output fell behind");
                summary.missed += skipped;
            }
            Err(RecvError::Closed) => break,
        }
    }

    summary.stored.sort();
    summary
}

/// Hand every notification already queued to `f`, skipping over lag.
///
/// Returns the number of notifications lost to lag.
pub fn drain_ready(
    rx: &mut broadcast::Receiver<SyncNotification>,
    mut f: impl FnMut(SyncNotification),
) -> u64 {
    let mut missed = 0;
    loop {
        match rx.try_recv() {
            Ok(notification) => f(notification),
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "notification output fell behind");
                missed += skipped;
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
    missed
}
