//! Sync configuration types.

use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::filter::{DEFAULT_SCAN_ROOT, ScanCriteria};

/// Interval between scan cycles when none is configured.
pub const DEFAULT_INTERVAL_MS: u64 = 10_000;

/// Default buffer size of the notification channel.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 100;

/// Configuration for a sync orchestrator.
///
/// Deserialization goes through [`SyncConfigBuilder`], so missing fields take
/// their defaults and invalid values are rejected the same way as in code.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(
    setter(into),
    derive(Deserialize),
    build_fn(validate = "Self::validate")
)]
#[serde(try_from = "SyncConfigBuilder")]
pub struct SyncConfig {
    /// Provider folder whose files are forwarded. Blank means `/`.
    #[builder(default = "DEFAULT_SCAN_ROOT.to_string()")]
    pub folder_to_scan: String,

    /// Milliseconds between scan cycles.
    #[builder(default = "DEFAULT_INTERVAL_MS")]
    pub interval_ms: u64,

    /// Upper bound on simultaneous downloads (None = unbounded).
    #[builder(default)]
    pub max_concurrent_downloads: Option<usize>,

    /// Buffer size of the notification broadcast channel.
    #[builder(default = "DEFAULT_NOTIFICATION_CAPACITY")]
    pub notification_capacity: usize,
}

impl TryFrom<SyncConfigBuilder> for SyncConfig {
    type Error = SyncConfigBuilderError;

    fn try_from(builder: SyncConfigBuilder) -> Result<Self, Self::Error> {
        builder.build()
    }
}

impl SyncConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.interval_ms == Some(0) {
            return Err("Scan interval must be greater than zero".to_string());
        }
        if let Some(Some(0)) = self.max_concurrent_downloads {
            return Err("Download limit must be greater than zero".to_string());
        }
        if self.notification_capacity == Some(0) {
            return Err("Notification capacity must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl SyncConfig {
    /// Create a new sync config builder.
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Create a config scanning `folder` with default timing.
    pub fn new(folder: impl Into<String>) -> Self {
        Self {
            folder_to_scan: folder.into(),
            interval_ms: DEFAULT_INTERVAL_MS,
            max_concurrent_downloads: None,
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
        }
    }

    /// Interval between scan cycles.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Eligibility criteria derived from the configured folder.
    pub fn criteria(&self) -> ScanCriteria {
        ScanCriteria::new(&self.folder_to_scan)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SCAN_ROOT)
    }
}
