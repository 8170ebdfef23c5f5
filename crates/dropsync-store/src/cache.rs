//! Flat-directory file cache.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tempfile::Builder;
use tracing::{debug, info};

use dropsync_core::{FileSink, SyncError};

const TEMP_PREFIX: &str = ".dropsync-";
const TEMP_SUFFIX: &str = ".part";

/// A file held in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedFile {
    /// File name within the cache directory.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time, when the platform reports one.
    pub modified: Option<DateTime<Utc>>,
}

/// File sink that keeps every synchronized file in one local directory.
///
/// Files are keyed by base name only; storing a name that already exists
/// replaces the previous content.
#[derive(Debug, Clone)]
pub struct LocalFileCache {
    dir: PathBuf,
}

impl LocalFileCache {
    /// Open a cache rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| SyncError::storage(dir.display().to_string(), e))?;
        if !dir.is_dir() {
            return Err(SyncError::InvalidConfig {
                message: format!("{} is not a directory", dir.display()),
            });
        }

        info!(dir = %dir.display(), "file cache opened");
        Ok(Self { dir })
    }

    /// The directory files are stored in.
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Full path a file of this name is stored at.
    pub fn path_of(&self, name: &str) -> Result<PathBuf, SyncError> {
        validate_name(name)?;
        Ok(self.dir.join(name))
    }

    /// Read back a stored file.
    pub fn retrieve_file(&self, name: &str) -> Result<Vec<u8>, SyncError> {
        let path = self.path_of(name)?;
        fs::read(&path).map_err(|e| SyncError::storage(name, e))
    }

    /// Whether a file of this name is stored.
    pub fn contains(&self, name: &str) -> bool {
        self.path_of(name).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Names of all stored files, sorted.
    pub fn file_names(&self) -> Result<Vec<String>, SyncError> {
        Ok(self.entries()?.into_iter().map(|f| f.name).collect())
    }

    /// All stored files with their sizes, sorted by name.
    ///
    /// In-progress writes and subdirectories are not listed.
    pub fn entries(&self) -> Result<Vec<CachedFile>, SyncError> {
        let dir_name = self.dir.display().to_string();
        let read_dir = fs::read_dir(&self.dir).map_err(|e| SyncError::storage(&dir_name, e))?;

        let mut files = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| SyncError::storage(&dir_name, e))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if is_temp_name(&name) {
                continue;
            }

            // The file may be replaced between listing and stat
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    debug!(name, error = %err, "skipping unreadable cache entry");
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }

            files.push(CachedFile {
                name,
                size: metadata.len(),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Total size in bytes of all stored files.
    pub fn total_size(&self) -> Result<u64, SyncError> {
        Ok(self.entries()?.iter().map(|f| f.size).sum())
    }
}

impl FileSink for LocalFileCache {
    fn store_file(&self, name: &str, content: &[u8]) -> Result<(), SyncError> {
        let target = self.path_of(name)?;
        let storage = |e: std::io::Error| SyncError::storage(name, e);

        let mut temp = Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&self.dir)
            .map_err(storage)?;
        temp.write_all(content).map_err(storage)?;
        temp.as_file().sync_all().map_err(storage)?;
        temp.persist(&target).map_err(|e| storage(e.error))?;

        debug!(name, bytes = content.len(), "file stored");
        Ok(())
    }
}

/// Check that `name` is a plain file name that stays inside the cache directory.
pub fn validate_name(name: &str) -> Result<(), SyncError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || is_temp_name(name);

    if invalid {
        return Err(SyncError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

fn is_temp_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("test.txt").is_ok());
        assert!(validate_name(".hidden").is_ok());
        assert!(validate_name("file with spaces.jpg").is_ok());
        assert!(validate_name("v1..2.txt").is_ok());

        assert!(validate_name("").is_err());
        assert!(validate_name(".").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b.txt").is_err());
        assert!(validate_name("a\\b.txt").is_err());
        assert!(validate_name(".dropsync-x1y2.part").is_err());
    }

    #[test]
    fn test_open_creates_directory() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("nested").join("cache");

        let cache = LocalFileCache::open(&dir).unwrap();

        assert!(dir.is_dir());
        assert_eq!(cache.directory(), dir.as_path());
        assert!(cache.file_names().unwrap().is_empty());
    }

    #[test]
    fn test_open_rejects_file_path() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("not-a-dir");
        fs::write(&file, b"x").unwrap();

        assert!(LocalFileCache::open(&file).is_err());
    }

    #[test]
    fn test_store_and_retrieve() {
        let temp = TempDir::new().unwrap();
        let cache = LocalFileCache::open(temp.path()).unwrap();

        cache.store_file("test.txt", &[0u8; 10]).unwrap();

        assert_eq!(cache.retrieve_file("test.txt").unwrap(), vec![0u8; 10]);
        assert!(cache.contains("test.txt"));
        assert!(!cache.contains("other.txt"));
    }

    #[test]
    fn test_store_replaces_existing() {
        let temp = TempDir::new().unwrap();
        let cache = LocalFileCache::open(temp.path()).unwrap();

        cache.store_file("a.txt", b"first").unwrap();
        cache.store_file("a.txt", b"second").unwrap();

        assert_eq!(cache.retrieve_file("a.txt").unwrap(), b"second");
        assert_eq!(cache.file_names().unwrap(), vec!["a.txt"]);
    }

    #[test]
    fn test_store_empty_file() {
        let temp = TempDir::new().unwrap();
        let cache = LocalFileCache::open(temp.path()).unwrap();

        cache.store_file("empty", &[]).unwrap();

        assert!(cache.retrieve_file("empty").unwrap().is_empty());
    }

    #[test]
    fn test_store_rejects_traversal() {
        let temp = TempDir::new().unwrap();
        let cache = LocalFileCache::open(temp.path().join("cache")).unwrap();

        let err = cache.store_file("../escape.txt", b"x").unwrap_err();

        assert!(matches!(err, SyncError::InvalidName { .. }));
        assert!(!temp.path().join("escape.txt").exists());
    }

    #[test]
    fn test_retrieve_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let cache = LocalFileCache::open(temp.path()).unwrap();

        let err = cache.retrieve_file("missing.txt").unwrap_err();

        assert!(matches!(err, SyncError::NotFound { ref name } if name == "missing.txt"));
    }

    #[test]
    fn test_entries_skip_temp_files_and_directories() {
        let temp = TempDir::new().unwrap();
        let cache = LocalFileCache::open(temp.path()).unwrap();
        cache.store_file("b.jpg", b"12345").unwrap();
        cache.store_file("a.txt", b"1").unwrap();
        fs::write(temp.path().join(".dropsync-abc123.part"), b"partial").unwrap();
        fs::create_dir(temp.path().join("subdir")).unwrap();

        let entries = cache.entries().unwrap();

        let summary: Vec<(&str, u64)> = entries.iter().map(|f| (f.name.as_str(), f.size)).collect();
        assert_eq!(summary, vec![("a.txt", 1), ("b.jpg", 5)]);
        assert!(entries.iter().all(|f| f.modified.is_some()));
        assert_eq!(cache.total_size().unwrap(), 6);
    }

    #[test]
    fn test_no_temp_files_left_after_store() {
        let temp = TempDir::new().unwrap();
        let cache = LocalFileCache::open(temp.path()).unwrap();

        cache.store_file("photo.jpg", &[7u8; 4096]).unwrap();

        let on_disk: Vec<String> = fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(on_disk, vec!["photo.jpg"]);
    }
}
