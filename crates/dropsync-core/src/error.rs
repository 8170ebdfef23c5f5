//! Error types for sync operations.

use thiserror::Error;

/// Errors that can occur while scanning a change feed and storing files.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A required collaborator was not supplied at construction.
    #[error("Missing collaborator: {name}")]
    MissingCollaborator { name: &'static str },

    /// The change feed could not be reached (transport or auth failure).
    #[error("Change feed unavailable: {message}")]
    FeedUnavailable { message: String },

    /// Downloading a file from the change feed failed.
    #[error("Download failed for {path}: {message}")]
    Download { path: String, message: String },

    /// The file sink could not persist a file.
    #[error("Storage failure for {name}: {source}")]
    Storage {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// A stored file was requested but does not exist.
    #[error("File not found: {name}")]
    NotFound { name: String },

    /// A file name is not acceptable to the sink.
    #[error("Invalid file name: {name:?}")]
    InvalidName { name: String },

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// The authorization flow failed or was abandoned.
    #[error("Authorization failed: {message}")]
    Authorization { message: String },

    /// Other error.
    #[error("{message}")]
    Other { message: String },
}

impl SyncError {
    /// Create a storage error with file name context.
    pub fn storage(name: impl Into<String>, source: std::io::Error) -> Self {
        let name = name.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { name },
            _ => Self::Storage { name, source },
        }
    }

    /// Create a feed-unavailable error.
    pub fn feed_unavailable(message: impl Into<String>) -> Self {
        Self::FeedUnavailable {
            message: message.into(),
        }
    }

    /// Create a download error for a path.
    pub fn download(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Download {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether the next scheduled cycle can be expected to recover.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::FeedUnavailable { .. } | Self::Download { .. })
    }
}
