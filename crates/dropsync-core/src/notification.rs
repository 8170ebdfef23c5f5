//! Notifications published by the sync orchestrator.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// An event observable by the host of a sync orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncNotification {
    /// A file was downloaded and handed to the sink.
    FileSynchronized { path: String },
    /// A scan or a per-file operation failed.
    ErrorOccurred { message: String },
    /// Every file dispatched by one cycle has finished.
    CycleCompleted(CycleReport),
}

impl SyncNotification {
    /// Create a file-synchronized notification.
    pub fn synchronized(path: impl Into<String>) -> Self {
        Self::FileSynchronized { path: path.into() }
    }

    /// Create an error notification.
    pub fn error(message: impl Into<String>) -> Self {
        Self::ErrorOccurred {
            message: message.into(),
        }
    }

    /// Check if this is an error notification.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::ErrorOccurred { .. })
    }
}

impl fmt::Display for SyncNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileSynchronized { path } => write!(f, "Synchronized {path}"),
            Self::ErrorOccurred { message } => write!(f, "Error: {message}"),
            Self::CycleCompleted(report) => write!(f, "{}", report.summary()),
        }
    }
}

/// Outcome of the downloads dispatched by one scan cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Sequence number of the cycle, starting at 1.
    pub cycle: u64,
    /// Entries in the fetched batch.
    pub entries_seen: usize,
    /// Entries that passed the filter and were dispatched.
    pub dispatched: usize,
    /// Files stored successfully.
    pub succeeded: usize,
    /// Files that failed to download or store.
    pub failed: usize,
    /// Bytes handed to the sink.
    pub bytes_stored: u64,
    /// Time from dispatch until the last file finished.
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

impl CycleReport {
    /// Check if every dispatched file was stored.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Human-readable summary.
    pub fn summary(&self) -> String {
        if self.failed == 0 {
            format!(
                "Cycle {}: stored {} of {} entries",
                self.cycle, self.succeeded, self.entries_seen
            )
        } else {
            format!(
                "Cycle {}: stored {} of {} entries, {} failed",
                self.cycle, self.succeeded, self.entries_seen, self.failed
            )
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
