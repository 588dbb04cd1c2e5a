//! Directory snapshots and the diff that turns two of them into events.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

use super::filter::PathFilter;
use super::types::{WatchEvent, WatchEventType};

/// Cheap change marker for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMarker {
    /// Last modification time
    pub modified: SystemTime,
    /// Size in bytes
    pub len: u64,
}

impl FileMarker {
    fn of(metadata: &std::fs::Metadata) -> Self {
        Self {
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            len: metadata.len(),
        }
    }
}

/// Matching files under a root with their markers, keyed by absolute path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    files: BTreeMap<PathBuf, FileMarker>,
}

impl Snapshot {
    /// Walk `root` recursively and record every file accepted by `filter`.
    ///
    /// Fails only when the root itself cannot be read; unreadable
    /// subdirectories and entries that vanish mid-walk are skipped.
    /// Symlinks are not followed.
    pub fn scan(root: &Path, filter: &PathFilter) -> io::Result<Self> {
        let mut files = BTreeMap::new();
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => return Err(e.into()),
                Err(e) => {
                    tracing::debug!(root = %root.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if entry.depth() == 0 {
                if !entry.file_type().is_dir() {
                    return Err(io::Error::new(
                        io::ErrorKind::NotADirectory,
                        format!("{} is not a directory", root.display()),
                    ));
                }
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            if !filter.matches(relative) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            files.insert(entry.into_path(), FileMarker::of(&metadata));
        }
        Ok(Self { files })
    }

    /// Events that turn `self` into `newer`, ordered by path.
    pub fn diff(&self, newer: &Self) -> Vec<WatchEvent> {
        let mut events = Vec::new();
        for (path, marker) in &newer.files {
            match self.files.get(path) {
                None => events.push(WatchEvent::new(WatchEventType::Create, path.clone())),
                Some(old) if old != marker => {
                    events.push(WatchEvent::new(WatchEventType::Modify, path.clone()));
                }
                Some(_) => {}
            }
        }
        for path in self.files.keys() {
            if !newer.files.contains_key(path) {
                events.push(WatchEvent::new(WatchEventType::Delete, path.clone()));
            }
        }
        events.sort_by(|a, b| a.path.cmp(&b.path));
        events
    }

    /// Number of tracked files
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Whether `path` is tracked
    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    /// Tracked paths in order
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.keys().map(PathBuf::as_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn kinds(events: &[WatchEvent]) -> Vec<(WatchEventType, String)> {
        events
            .iter()
            .map(|e| {
                let name = e.path.file_name().unwrap().to_string_lossy().into_owned();
                (e.event_type, name)
            })
            .collect()
    }

    #[test]
    fn scan_is_recursive_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("api/v1")).unwrap();
        fs::write(dir.path().join("root.groovy"), "a").unwrap();
        fs::write(dir.path().join("api/v1/user.groovy"), "b").unwrap();
        fs::write(dir.path().join("api/notes.txt"), "c").unwrap();

        let filter = PathFilter::new(["*.groovy"], Vec::<String>::new()).unwrap();
        let snapshot = Snapshot::scan(dir.path(), &filter).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains(&dir.path().join("api/v1/user.groovy")));
        assert!(!snapshot.contains(&dir.path().join("api/notes.txt")));
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        assert!(Snapshot::scan(&missing, &PathFilter::match_all()).is_err());
    }

    #[test]
    fn file_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("single.xml");
        fs::write(&file, "x").unwrap();
        assert!(Snapshot::scan(&file, &PathFilter::match_all()).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_ancestor_does_not_loop() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/a.xml"), "a").unwrap();
        std::os::unix::fs::symlink("..", dir.path().join("nested/up")).unwrap();
        std::os::unix::fs::symlink("a.xml", dir.path().join("nested/alias.xml")).unwrap();

        let snapshot = Snapshot::scan(dir.path(), &PathFilter::match_all()).unwrap();
        let paths: Vec<_> = snapshot.paths().map(Path::to_path_buf).collect();
        assert_eq!(paths, vec![dir.path().join("nested/a.xml")]);
    }

    #[test]
    fn diff_classifies_changes() {
        let dir = tempfile::tempdir().unwrap();
        let filter = PathFilter::match_all();
        fs::write(dir.path().join("keep.xml"), "same").unwrap();
        fs::write(dir.path().join("edit.xml"), "short").unwrap();
        fs::write(dir.path().join("drop.xml"), "bye").unwrap();
        let before = Snapshot::scan(dir.path(), &filter).unwrap();

        fs::write(dir.path().join("edit.xml"), "a good deal longer").unwrap();
        fs::remove_file(dir.path().join("drop.xml")).unwrap();
        fs::write(dir.path().join("new.xml"), "hi").unwrap();
        let after = Snapshot::scan(dir.path(), &filter).unwrap();

        assert_eq!(
            kinds(&before.diff(&after)),
            vec![
                (WatchEventType::Delete, "drop.xml".to_owned()),
                (WatchEventType::Modify, "edit.xml".to_owned()),
                (WatchEventType::Create, "new.xml".to_owned()),
            ]
        );
        assert!(after.diff(&after).is_empty());
    }
}
