//! A change feed over a local directory tree.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use compact_str::CompactString;
use dashmap::DashMap;
use jwalk::{Parallelism, WalkDir};
use tracing::{debug, warn};

use dropsync_core::{
    ChangeBatch, ChangeEntry, ChangeFeed, Cursor, DownloadedFile, EntryMetadata, SyncError,
};

/// Number of past listings kept so that recent cursors stay valid.
const RETAINED_SNAPSHOTS: u64 = 4;

/// State of one path at listing time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PathState {
    is_dir: bool,
    size: u64,
    modified: SystemTime,
}

type Snapshot = HashMap<CompactString, PathState>;

/// Presents a local directory as a cursor-addressed change feed.
///
/// Each fetch walks the tree and reports every path whose size or
/// modification time differs from the listing named by the cursor. Paths are
/// `/`-separated and rooted at `/`. Cursors look like `v1:<epoch>:<generation>`
/// and are only valid for the feed instance that issued them.
pub struct DirectoryFeed {
    root: PathBuf,
    include_hidden: bool,
    follow_symlinks: bool,
    epoch: u64,
    generation: AtomicU64,
    snapshots: DashMap<u64, Arc<Snapshot>>,
}

impl DirectoryFeed {
    /// Create a feed over `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();

        Self {
            root: root.into(),
            include_hidden: true,
            follow_symlinks: false,
            epoch,
            generation: AtomicU64::new(0),
            snapshots: DashMap::new(),
        }
    }

    /// Include or skip hidden files (starting with `.`).
    pub fn include_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    /// Follow symbolic links while walking.
    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// The directory this feed lists.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn encode_cursor(&self, generation: u64) -> Cursor {
        Cursor::new(format!("v1:{}:{generation}", self.epoch))
    }

    /// Resolve a cursor to the listing it names; `None` means full listing.
    fn baseline(&self, cursor: Option<&Cursor>) -> Result<Option<Arc<Snapshot>>, SyncError> {
        let cursor = match cursor {
            Some(cursor) if !cursor.is_blank() => cursor,
            _ => return Ok(None),
        };

        let generation = cursor
            .as_str()
            .strip_prefix("v1:")
            .and_then(|rest| rest.split_once(':'))
            .filter(|(epoch, _)| epoch.parse::<u64>().ok() == Some(self.epoch))
            .and_then(|(_, generation)| generation.parse::<u64>().ok())
            .ok_or_else(|| SyncError::feed_unavailable(format!("unrecognized cursor {cursor}")))?;

        self.snapshots
            .get(&generation)
            .map(|entry| Some(Arc::clone(entry.value())))
            .ok_or_else(|| SyncError::feed_unavailable(format!("expired cursor {cursor}")))
    }

    fn record(&self, snapshot: Snapshot) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.snapshots.insert(generation, Arc::new(snapshot));
        self.snapshots
            .retain(|&kept, _| kept + RETAINED_SNAPSHOTS > generation);
        generation
    }
}

impl std::fmt::Debug for DirectoryFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryFeed")
            .field("root", &self.root)
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .finish()
    }
}

#[async_trait]
impl ChangeFeed for DirectoryFeed {
    async fn fetch_changes(&self, cursor: Option<&Cursor>) -> Result<ChangeBatch, SyncError> {
        let baseline = self.baseline(cursor)?;

        let root = self.root.clone();
        let include_hidden = self.include_hidden;
        let follow_symlinks = self.follow_symlinks;
        // jwalk runs on rayon; keep it off the async workers
        let current = tokio::task::spawn_blocking(move || {
            list_tree(&root, include_hidden, follow_symlinks)
        })
        .await
        .map_err(|e| SyncError::feed_unavailable(e.to_string()))??;

        let mut entries: Vec<ChangeEntry> = current
            .iter()
            .filter(|&(path, state)| match &baseline {
                Some(previous) => previous.get(path) != Some(state),
                None => true,
            })
            .map(|(path, state)| to_entry(path, state))
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        let generation = self.record(current);
        debug!(root = %self.root.display(), generation, changes = entries.len(), "directory listed");

        Ok(ChangeBatch::new(self.encode_cursor(generation), entries))
    }

    async fn download_file(&self, path: &str) -> Result<DownloadedFile, SyncError> {
        let full_path = resolve(&self.root, path)?;
        let content = tokio::task::spawn_blocking(move || std::fs::read(full_path))
            .await
            .map_err(|e| SyncError::download(path, e.to_string()))?
            .map_err(|e| SyncError::download(path, e.to_string()))?;

        Ok(DownloadedFile::new(path, content))
    }
}

/// Walk `root` and record the state of every path below it.
fn list_tree(root: &Path, include_hidden: bool, follow_symlinks: bool) -> Result<Snapshot, SyncError> {
    let metadata = std::fs::metadata(root)
        .map_err(|e| SyncError::feed_unavailable(format!("{}: {e}", root.display())))?;
    if !metadata.is_dir() {
        return Err(SyncError::feed_unavailable(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let walker = WalkDir::new(root)
        .parallelism(Parallelism::RayonDefaultPool {
            busy_timeout: std::time::Duration::from_millis(100),
        })
        .skip_hidden(!include_hidden)
        .follow_links(follow_symlinks)
        .min_depth(1);

    let mut snapshot = Snapshot::new();
    for entry_result in walker {
        let entry = match entry_result {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry");
                continue;
            }
        };

        let path = entry.path();
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping entry without metadata");
                continue;
            }
        };

        let file_type = entry.file_type();
        if !file_type.is_dir() && !file_type.is_file() {
            continue;
        }

        let Some(feed_path) = feed_path(root, &path) else {
            continue;
        };

        snapshot.insert(
            feed_path,
            PathState {
                is_dir: file_type.is_dir(),
                size: if file_type.is_dir() { 0 } else { metadata.len() },
                modified: metadata.modified().unwrap_or(UNIX_EPOCH),
            },
        );
    }

    Ok(snapshot)
}

/// Convert an absolute path below `root` to a `/`-rooted feed path.
fn feed_path(root: &Path, path: &Path) -> Option<CompactString> {
    let relative = path.strip_prefix(root).ok()?;
    let mut out = CompactString::default();
    for component in relative.components() {
        let Component::Normal(name) = component else {
            return None;
        };
        out.push('/');
        out.push_str(&name.to_string_lossy());
    }
    (!out.is_empty()).then_some(out)
}

/// Map a feed path back to a filesystem path, refusing anything that escapes `root`.
fn resolve(root: &Path, path: &str) -> Result<PathBuf, SyncError> {
    let mut full_path = root.to_path_buf();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        if part == "." || part == ".." {
            return Err(SyncError::download(path, "path escapes feed root"));
        }
        full_path.push(part);
    }
    if full_path == root {
        return Err(SyncError::download(path, "not a file path"));
    }
    Ok(full_path)
}

fn to_entry(path: &CompactString, state: &PathState) -> ChangeEntry {
    if state.is_dir {
        return ChangeEntry::directory(path.clone());
    }
    ChangeEntry::file(path.clone()).with_metadata(EntryMetadata {
        size: Some(state.size),
        modified: Some(DateTime::<Utc>::from(state.modified)),
        rev: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        fs::create_dir(root.join("docs")).unwrap();
        fs::create_dir(root.join("docs/nested")).unwrap();
        fs::write(root.join("readme.txt"), "hello").unwrap();
        fs::write(root.join("docs/plan.md"), "world world").unwrap();
        fs::write(root.join("docs/nested/deep.bin"), [1u8, 2, 3]).unwrap();

        temp
    }

    #[test]
    fn test_feed_path() {
        let root = Path::new("/srv/data");
        assert_eq!(
            feed_path(root, Path::new("/srv/data/a/b.txt")).as_deref(),
            Some("/a/b.txt")
        );
        assert_eq!(feed_path(root, Path::new("/srv/data")), None);
        assert_eq!(feed_path(root, Path::new("/elsewhere/x")), None);
    }

    #[test]
    fn test_resolve_rejects_escape() {
        let root = Path::new("/srv/data");
        assert_eq!(resolve(root, "/a/b.txt").unwrap(), PathBuf::from("/srv/data/a/b.txt"));
        assert!(resolve(root, "/../etc/passwd").is_err());
        assert!(resolve(root, "/").is_err());
    }

    #[tokio::test]
    async fn test_full_listing_without_cursor() {
        let temp = create_test_tree();
        let feed = DirectoryFeed::new(temp.path());

        let batch = feed.fetch_changes(None).await.unwrap();
        let paths: Vec<&str> = batch.entries.iter().map(|e| e.path.as_str()).collect();

        assert_eq!(
            paths,
            vec!["/docs", "/docs/nested", "/docs/nested/deep.bin", "/docs/plan.md", "/readme.txt"]
        );
        assert!(batch.entries[0].is_directory);
        assert_eq!(batch.entries[4].metadata.size, Some(5));
    }

    #[tokio::test]
    async fn test_cursor_reports_only_changes() {
        let temp = create_test_tree();
        let feed = DirectoryFeed::new(temp.path());

        let first = feed.fetch_changes(None).await.unwrap();
        let unchanged = feed.fetch_changes(Some(&first.cursor)).await.unwrap();
        assert!(unchanged.is_empty());
        assert_ne!(first.cursor, unchanged.cursor);

        fs::write(temp.path().join("docs/new.txt"), "fresh").unwrap();
        fs::write(temp.path().join("readme.txt"), "hello again").unwrap();

        let changed = feed.fetch_changes(Some(&unchanged.cursor)).await.unwrap();
        let paths: Vec<&str> = changed.entries.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"/docs/new.txt"));
        assert!(paths.contains(&"/readme.txt"));
        assert!(!paths.contains(&"/docs/plan.md"));
    }

    #[tokio::test]
    async fn test_foreign_cursor_is_rejected() {
        let temp = create_test_tree();
        let feed = DirectoryFeed::new(temp.path());

        let err = feed
            .fetch_changes(Some(&Cursor::new("v1:1:1")))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::FeedUnavailable { .. }));

        let err = feed
            .fetch_changes(Some(&Cursor::new("garbage")))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::FeedUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_blank_cursor_is_full_listing() {
        let temp = create_test_tree();
        let feed = DirectoryFeed::new(temp.path());

        let batch = feed.fetch_changes(Some(&Cursor::new(""))).await.unwrap();
        assert_eq!(batch.len(), 5);
    }

    #[tokio::test]
    async fn test_missing_root_is_unavailable() {
        let temp = TempDir::new().unwrap();
        let feed = DirectoryFeed::new(temp.path().join("missing"));

        let err = feed.fetch_changes(None).await.unwrap_err();
        assert!(matches!(err, SyncError::FeedUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_old_snapshots_expire() {
        let temp = create_test_tree();
        let feed = DirectoryFeed::new(temp.path());

        let first = feed.fetch_changes(None).await.unwrap();
        let mut cursor = first.cursor.clone();
        for _ in 0..RETAINED_SNAPSHOTS {
            cursor = feed.fetch_changes(Some(&cursor)).await.unwrap().cursor;
        }

        let err = feed.fetch_changes(Some(&first.cursor)).await.unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[tokio::test]
    async fn test_download_file() {
        let temp = create_test_tree();
        let feed = DirectoryFeed::new(temp.path());

        let file = feed.download_file("/docs/plan.md").await.unwrap();
        assert_eq!(file.path, "/docs/plan.md");
        assert_eq!(file.content, b"world world");
        assert_eq!(file.file_name(), "plan.md");

        let err = feed.download_file("/docs/missing.md").await.unwrap_err();
        assert!(matches!(err, SyncError::Download { .. }));
    }
}
