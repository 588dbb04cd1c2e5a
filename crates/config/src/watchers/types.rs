//! Change events produced by the watcher

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of change observed between two scans
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    /// File appeared
    Create,
    /// File content marker changed
    Modify,
    /// File disappeared
    Delete,
}

impl WatchEventType {
    /// Upper-case label used in logs
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Modify => "MODIFY",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for WatchEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single observed change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    /// What happened
    pub event_type: WatchEventType,
    /// Absolute path of the changed file
    pub path: PathBuf,
    /// When the scan observed it
    pub timestamp: DateTime<Utc>,
}

impl WatchEvent {
    /// Create an event stamped with the current time
    pub fn new(event_type: WatchEventType, path: impl Into<PathBuf>) -> Self {
        Self {
            event_type,
            path: path.into(),
            timestamp: Utc::now(),
        }
    }

    /// The changed path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file no longer exists
    pub fn is_delete(&self) -> bool {
        self.event_type == WatchEventType::Delete
    }
}
