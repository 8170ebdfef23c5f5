//! Local destination for synchronized files.
//!
//! [`LocalFileCache`] implements [`FileSink`](dropsync_core::FileSink) over a
//! flat directory. Each write lands in a temporary file first and is renamed
//! into place, so readers never observe a partially written file.

mod cache;

pub use cache::{CachedFile, LocalFileCache, validate_name};
