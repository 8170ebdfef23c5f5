//! Change-feed entry types.

use std::fmt;

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Opaque continuation token marking how far a change feed has been read.
///
/// The absence of a cursor (`Option::None`) requests a full listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    /// Wrap a token returned by a change feed.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the token is empty or whitespace, which feeds treat as no cursor.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Cursor {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for Cursor {
    fn from(token: String) -> Self {
        Self(token)
    }
}

/// Provider-specific details attached to a change entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Size in bytes, when the provider reports one.
    #[serde(default)]
    pub size: Option<u64>,
    /// Last modification time.
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
    /// Provider revision identifier.
    #[serde(default)]
    pub rev: Option<String>,
}

/// A single change reported by a change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// Provider path, `/`-separated.
    pub path: CompactString,
    /// Whether the entry is a directory.
    pub is_directory: bool,
    /// Additional metadata.
    #[serde(default)]
    pub metadata: EntryMetadata,
}

impl ChangeEntry {
    /// Create a file entry.
    pub fn file(path: impl Into<CompactString>) -> Self {
        Self {
            path: path.into(),
            is_directory: false,
            metadata: EntryMetadata::default(),
        }
    }

    /// Create a directory entry.
    pub fn directory(path: impl Into<CompactString>) -> Self {
        Self {
            path: path.into(),
            is_directory: true,
            metadata: EntryMetadata::default(),
        }
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: EntryMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Base name of the entry path.
    pub fn file_name(&self) -> &str {
        base_name(&self.path)
    }
}

/// One page of a change feed: the entries plus the cursor that follows them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBatch {
    /// Cursor to pass on the next fetch.
    pub cursor: Cursor,
    /// Entries in feed order.
    pub entries: Vec<ChangeEntry>,
    /// Whether the feed has more entries ready past this page.
    #[serde(default)]
    pub has_more: bool,
}

impl ChangeBatch {
    /// Create a batch.
    pub fn new(cursor: impl Into<Cursor>, entries: Vec<ChangeEntry>) -> Self {
        Self {
            cursor: cursor.into(),
            entries,
            has_more: false,
        }
    }

    /// Create a batch with no entries.
    pub fn empty(cursor: impl Into<Cursor>) -> Self {
        Self::new(cursor, Vec::new())
    }

    /// Number of entries in the batch.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the batch has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// File content returned by a download.
#[derive(Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    /// Path as reported by the provider.
    pub path: CompactString,
    /// Raw bytes.
    pub content: Vec<u8>,
}

impl DownloadedFile {
    /// Create a downloaded file.
    pub fn new(path: impl Into<CompactString>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    /// Name under which the file is stored: the base name of its path.
    pub fn file_name(&self) -> &str {
        base_name(&self.path)
    }
}

impl fmt::Debug for DownloadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadedFile")
            .field("path", &self.path)
            .field("len", &self.content.len())
            .finish()
    }
}

/// Last component of a `/`-separated provider path.
///
/// Trailing separators are ignored; a path with no name component yields `""`.
pub fn base_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or_default()
}
