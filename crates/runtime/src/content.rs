//! Where script and mapper sources come from.
//!
//! A root is either a directory on disk ([`FileSystemRoot`], watchable) or
//! an in-memory bundle compiled into the binary ([`EmbeddedRoot`], fixed
//! for the life of the process). Paths are always relative to the root and
//! `/`-separated.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use hinny_config::watchers::{FileMarker, PathFilter, Snapshot};
use serde::{Deserialize, Serialize};

use crate::error::{RuntimeError, RuntimeResult};

/// How the script root is provided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentMode {
    /// A directory on disk.
    #[default]
    FileSystem,
    /// A bundle embedded in the binary.
    Embedded,
}

impl ContentMode {
    /// Whether change detection is possible in this mode.
    pub fn is_watchable(self) -> bool {
        matches!(self, Self::FileSystem)
    }
}

/// Lists and reads the files under a root.
pub trait RootContentProvider: Send + Sync + 'static {
    /// Which kind of root this is.
    fn mode(&self) -> ContentMode;

    /// Every file under the root, sorted.
    fn list(&self) -> RuntimeResult<Vec<String>>;

    /// Raw bytes of one file.
    fn read(&self, path: &str) -> RuntimeResult<Vec<u8>>;

    /// Change marker for one file; `None` when the file is missing or the
    /// root does not track changes.
    fn marker(&self, path: &str) -> Option<FileMarker>;

    /// Directory to hand to a watcher, if the root can be watched.
    fn watch_root(&self) -> Option<&Path>;

    /// Map an absolute path reported by a watcher back to a root-relative one.
    fn relativize(&self, absolute: &Path) -> Option<String> {
        let root = self.watch_root()?;
        let relative = absolute.strip_prefix(root).ok()?;
        Some(to_slash(relative))
    }
}

impl std::fmt::Debug for dyn RootContentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootContentProvider")
            .field("mode", &self.mode())
            .field("root", &self.watch_root())
            .finish()
    }
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// A directory on disk.
#[derive(Debug, Clone)]
pub struct FileSystemRoot {
    root: PathBuf,
    filter: PathFilter,
}

impl FileSystemRoot {
    /// Serve every file under `root`.
    ///
    /// Relative roots are resolved against the current directory once, here.
    pub fn new(root: impl Into<PathBuf>) -> RuntimeResult<Self> {
        Self::with_filter(root, PathFilter::match_all())
    }

    /// Serve the files under `root` accepted by `filter`.
    pub fn with_filter(root: impl Into<PathBuf>, filter: PathFilter) -> RuntimeResult<Self> {
        let root = root.into();
        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()
                .map_err(|e| RuntimeError::content(root.display().to_string(), e))?
                .join(root)
        };
        if !root.is_dir() {
            return Err(RuntimeError::content(
                root.display().to_string(),
                "content root is not a directory",
            ));
        }
        tracing::info!(root = %root.display(), "using file-system content root");
        Ok(Self { root, filter })
    }

    /// The absolute root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> RuntimeResult<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative.components().any(|c| {
            !matches!(c, std::path::Component::Normal(_) | std::path::Component::CurDir)
        });
        if escapes {
            return Err(RuntimeError::content(path, "path escapes the content root"));
        }
        Ok(self.root.join(relative))
    }
}

impl RootContentProvider for FileSystemRoot {
    fn mode(&self) -> ContentMode {
        ContentMode::FileSystem
    }

    fn list(&self) -> RuntimeResult<Vec<String>> {
        let snapshot = Snapshot::scan(&self.root, &self.filter)
            .map_err(|e| RuntimeError::content(self.root.display().to_string(), e))?;
        let mut paths: Vec<String> = snapshot
            .paths()
            .filter_map(|p| p.strip_prefix(&self.root).ok().map(to_slash))
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn read(&self, path: &str) -> RuntimeResult<Vec<u8>> {
        let full = self.resolve(path)?;
        std::fs::read(&full).map_err(|e| RuntimeError::content(path, e))
    }

    fn marker(&self, path: &str) -> Option<FileMarker> {
        let full = self.resolve(path).ok()?;
        let metadata = std::fs::metadata(full).ok()?;
        metadata.is_file().then(|| FileMarker {
            modified: metadata.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
            len: metadata.len(),
        })
    }

    fn watch_root(&self) -> Option<&Path> {
        Some(&self.root)
    }
}

/// An in-memory bundle, typically filled from `include_str!`/`include_bytes!`.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedRoot {
    files: BTreeMap<String, Vec<u8>>,
}

impl EmbeddedRoot {
    /// Empty bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let path = path.into().trim_start_matches('/').to_owned();
        self.files.insert(path, content.into());
        self
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the bundle is empty.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl RootContentProvider for EmbeddedRoot {
    fn mode(&self) -> ContentMode {
        ContentMode::Embedded
    }

    fn list(&self) -> RuntimeResult<Vec<String>> {
        Ok(self.files.keys().cloned().collect())
    }

    fn read(&self, path: &str) -> RuntimeResult<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| RuntimeError::content(path, "not in the embedded bundle"))
    }

    fn marker(&self, _path: &str) -> Option<FileMarker> {
        None
    }

    fn watch_root(&self) -> Option<&Path> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn file_system_root_lists_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("api/user")).unwrap();
        fs::write(dir.path().join("api/user/list.js"), "list").unwrap();
        fs::write(dir.path().join("main.js"), "main").unwrap();

        let root = FileSystemRoot::new(dir.path()).unwrap();
        assert_eq!(root.list().unwrap(), vec!["api/user/list.js", "main.js"]);
        assert_eq!(root.read("api/user/list.js").unwrap(), b"list");
        assert_eq!(root.marker("main.js").unwrap().len, 4);
        assert!(root.marker("absent.js").is_none());
        assert_eq!(root.mode(), ContentMode::FileSystem);
        assert_eq!(
            root.relativize(&root.root().join("api/user/list.js")).as_deref(),
            Some("api/user/list.js")
        );
    }

    #[test]
    fn file_system_root_rejects_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let root = FileSystemRoot::new(dir.path()).unwrap();
        assert!(root.read("../etc/passwd").is_err());
        assert!(root.read("/etc/passwd").is_err());
    }

    #[test]
    fn missing_root_is_a_content_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileSystemRoot::new(dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, RuntimeError::Content { .. }));
    }

    #[test]
    fn embedded_root_is_not_watchable() {
        let root = EmbeddedRoot::new()
            .with_file("/api/user.js", "u")
            .with_file("main.js", "m");
        assert_eq!(root.list().unwrap(), vec!["api/user.js", "main.js"]);
        assert_eq!(root.read("api/user.js").unwrap(), b"u");
        assert!(root.read("x.js").is_err());
        assert!(root.watch_root().is_none());
        assert!(root.relativize(Path::new("/tmp/x")).is_none());
        assert!(!root.mode().is_watchable());
    }
}
