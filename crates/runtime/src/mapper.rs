//! SQL-mapper files, loaded once and reloaded one file at a time.
//!
//! The store keeps one parsed [`MapperArtifact`] per file. A watcher in
//! per-file mode calls [`MapperStore::reload`] for each changed path; when a
//! changed file fails to parse, the previous artifact for that path stays
//! in place and the error is reported to the caller.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use hinny_config::watchers::{self, WatchHandler};
use parking_lot::RwLock;
use regex::Regex;

use crate::content::RootContentProvider;
use crate::error::{RuntimeError, RuntimeResult};

/// A parsed mapper file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapperArtifact {
    /// Root-relative path of the file
    pub path: String,
    /// Namespace declared by the `<mapper>` element
    pub namespace: String,
    /// Statement ids, sorted
    pub statements: BTreeSet<String>,
    /// Bumped on every successful load of any file
    pub revision: u64,
}

impl MapperArtifact {
    /// Whether the file declares `id`.
    pub fn has_statement(&self, id: &str) -> bool {
        self.statements.contains(id)
    }
}

/// Why a mapper file could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    /// 1-based line of the offending element (1 when unknown)
    pub line: usize,
    /// What is wrong
    pub message: String,
}

/// Turns the text of one mapper file into its namespace and statement ids.
pub trait MapperParser: Send + Sync + 'static {
    /// Parse one file.
    fn parse(&self, text: &str) -> Result<(String, BTreeSet<String>), ParseError>;
}

/// Indexes `<mapper namespace="...">` and the `id`s of its statement
/// elements. The statement bodies are left to the SQL layer.
#[derive(Debug, Clone)]
pub struct StatementIndexParser {
    mapper: Regex,
    statement: Regex,
}

impl Default for StatementIndexParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementIndexParser {
    /// Compile the element patterns.
    pub fn new() -> Self {
        Self {
            mapper: Regex::new(r#"<mapper\b[^>]*?\bnamespace\s*=\s*"([^"]*)""#)
                .expect("valid mapper element regex"),
            statement: Regex::new(
                r#"<(select|insert|update|delete|sql)\b[^>]*?\bid\s*=\s*"([^"]*)""#,
            )
            .expect("valid statement element regex"),
        }
    }
}

fn line_of(text: &str, offset: usize) -> usize {
    text[..offset].bytes().filter(|b| *b == b'\n').count() + 1
}

impl MapperParser for StatementIndexParser {
    fn parse(&self, text: &str) -> Result<(String, BTreeSet<String>), ParseError> {
        let captures = self.mapper.captures(text).ok_or_else(|| ParseError {
            line: 1,
            message: "no <mapper namespace=\"...\"> element".to_owned(),
        })?;
        let namespace = captures[1].trim().to_owned();
        if namespace.is_empty() {
            return Err(ParseError {
                line: captures.get(0).map_or(1, |m| line_of(text, m.start())),
                message: "mapper namespace is empty".to_owned(),
            });
        }
        if !text.contains("</mapper>") {
            return Err(ParseError {
                line: text.lines().count().max(1),
                message: "unclosed <mapper> element".to_owned(),
            });
        }

        let mut statements = BTreeSet::new();
        for captures in self.statement.captures_iter(text) {
            let element = &captures[1];
            let id = captures[2].trim();
            let line = captures.get(0).map_or(1, |m| line_of(text, m.start()));
            if id.is_empty() {
                return Err(ParseError {
                    line,
                    message: format!("<{element}> has an empty id"),
                });
            }
            if !statements.insert(id.to_owned()) {
                return Err(ParseError {
                    line,
                    message: format!("duplicate statement id '{id}'"),
                });
            }
        }
        Ok((namespace, statements))
    }
}

/// What a reload did to one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The file was parsed and its artifact replaced (or added)
    Loaded,
    /// The file is gone and its artifact was dropped
    Removed,
}

/// Parsed mapper files keyed by root-relative path.
pub struct MapperStore<P: MapperParser = StatementIndexParser> {
    content: Arc<dyn RootContentProvider>,
    parser: P,
    artifacts: RwLock<BTreeMap<String, Arc<MapperArtifact>>>,
    revision: AtomicU64,
}

impl<P: MapperParser> std::fmt::Debug for MapperStore<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapperStore")
            .field("mode", &self.content.mode())
            .field("files", &self.len())
            .field("revision", &self.revision())
            .finish()
    }
}

impl MapperStore {
    /// Store over `content` with the default parser.
    pub fn new(content: Arc<dyn RootContentProvider>) -> Self {
        Self::with_parser(content, StatementIndexParser::new())
    }
}

impl<P: MapperParser> MapperStore<P> {
    /// Store over `content` with a custom parser.
    pub fn with_parser(content: Arc<dyn RootContentProvider>, parser: P) -> Self {
        Self {
            content,
            parser,
            artifacts: RwLock::new(BTreeMap::new()),
            revision: AtomicU64::new(0),
        }
    }

    /// The content root the store reads from.
    pub fn content(&self) -> &Arc<dyn RootContentProvider> {
        &self.content
    }

    fn parse(&self, path: &str) -> RuntimeResult<MapperArtifact> {
        let bytes = self.content.read(path)?;
        let text = String::from_utf8(bytes).map_err(|e| RuntimeError::Reload {
            path: path.to_owned(),
            message: format!("not valid UTF-8: {e}"),
        })?;
        let (namespace, statements) =
            self.parser.parse(&text).map_err(|e| RuntimeError::Reload {
                path: path.to_owned(),
                message: e.to_string(),
            })?;
        Ok(MapperArtifact {
            path: path.to_owned(),
            namespace,
            statements,
            revision: self.revision.fetch_add(1, Ordering::AcqRel) + 1,
        })
    }

    fn check_namespace(
        artifacts: &BTreeMap<String, Arc<MapperArtifact>>,
        artifact: &MapperArtifact,
    ) -> RuntimeResult<()> {
        let owner = artifacts
            .values()
            .find(|other| other.namespace == artifact.namespace && other.path != artifact.path);
        match owner {
            Some(other) => Err(RuntimeError::Reload {
                path: artifact.path.clone(),
                message: format!(
                    "namespace '{}' is already declared by {}",
                    artifact.namespace, other.path
                ),
            }),
            None => Ok(()),
        }
    }

    /// Load every file under the root, replacing nothing on failure.
    ///
    /// Startup is fail-fast: the first file that does not parse aborts the
    /// load and the store stays as it was.
    pub fn load_all(&self) -> RuntimeResult<usize> {
        let mut loaded = BTreeMap::new();
        for path in self.content.list()? {
            let artifact = self.parse(&path)?;
            Self::check_namespace(&loaded, &artifact)?;
            loaded.insert(path, Arc::new(artifact));
        }
        let count = loaded.len();
        *self.artifacts.write() = loaded;
        tracing::info!(files = count, "mapper files loaded");
        Ok(count)
    }

    /// Reload one file. On failure the previous artifact is kept.
    pub fn reload(&self, path: &str) -> RuntimeResult<ReloadOutcome> {
        if self.content.marker(path).is_none() && self.content.read(path).is_err() {
            let removed = self.artifacts.write().remove(path);
            if removed.is_some() {
                tracing::info!(path, "mapper file removed");
            }
            return Ok(ReloadOutcome::Removed);
        }

        let artifact = self.parse(path)?;
        let mut artifacts = self.artifacts.write();
        Self::check_namespace(&artifacts, &artifact)?;
        tracing::info!(
            path,
            namespace = %artifact.namespace,
            statements = artifact.statements.len(),
            "mapper file reloaded"
        );
        artifacts.insert(path.to_owned(), Arc::new(artifact));
        Ok(ReloadOutcome::Loaded)
    }

    /// Artifact of one file.
    pub fn get(&self, path: &str) -> Option<Arc<MapperArtifact>> {
        self.artifacts.read().get(path).cloned()
    }

    /// Artifact declaring `namespace`.
    pub fn by_namespace(&self, namespace: &str) -> Option<Arc<MapperArtifact>> {
        self.artifacts
            .read()
            .values()
            .find(|artifact| artifact.namespace == namespace)
            .cloned()
    }

    /// Whether `namespace.id` is a known statement.
    pub fn has_statement(&self, namespace: &str, id: &str) -> bool {
        self.by_namespace(namespace)
            .is_some_and(|artifact| artifact.has_statement(id))
    }

    /// Loaded paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.artifacts.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.artifacts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.read().is_empty()
    }

    /// Number of successful parses so far.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }
}

impl<P: MapperParser> MapperStore<P> {
    /// Watch callback reloading the reported file.
    ///
    /// Paths outside the store's root are ignored; reload failures come
    /// back as errors for the watcher to log.
    pub fn watch_handler(self: &Arc<Self>) -> WatchHandler {
        let store = Arc::clone(self);
        watchers::handler(move |event| {
            let store = Arc::clone(&store);
            async move {
                let Some(path) = store.content.relativize(event.path()) else {
                    tracing::debug!(path = %event.path().display(), "change outside the mapper root");
                    return Ok(());
                };
                tokio::task::spawn_blocking(move || store.reload(&path)).await??;
                Ok::<_, watchers::BoxError>(())
            }
        })
    }
}
