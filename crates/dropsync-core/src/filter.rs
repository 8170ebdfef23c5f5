//! Eligibility filtering of change-feed entries.

use serde::{Deserialize, Serialize};

use crate::entry::ChangeEntry;

/// Folder used when no folder to scan is configured.
pub const DEFAULT_SCAN_ROOT: &str = "/";

/// Restricts which change-feed entries get downloaded.
///
/// The prefix test is a plain, case-sensitive string comparison with no
/// path normalization, so `/Photos` also admits `/PhotosArchive/a.jpg`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCriteria {
    root_prefix: String,
}

impl ScanCriteria {
    /// Create criteria for a folder; blank input falls back to `/`.
    pub fn new(folder: impl AsRef<str>) -> Self {
        let folder = folder.as_ref();
        let root_prefix = if folder.trim().is_empty() {
            DEFAULT_SCAN_ROOT.to_string()
        } else {
            folder.to_string()
        };
        Self { root_prefix }
    }

    /// The configured root prefix.
    pub fn root_prefix(&self) -> &str {
        &self.root_prefix
    }

    /// Whether an entry should be downloaded.
    pub fn is_eligible(&self, entry: &ChangeEntry) -> bool {
        is_eligible(entry, &self.root_prefix)
    }
}

impl Default for ScanCriteria {
    fn default() -> Self {
        Self::new(DEFAULT_SCAN_ROOT)
    }
}

/// An entry is eligible iff it is not a directory and its path starts with `prefix`.
pub fn is_eligible(entry: &ChangeEntry, prefix: &str) -> bool {
    !entry.is_directory && entry.path.starts_with(prefix)
}
