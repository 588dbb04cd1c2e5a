//! Script execution contexts and the factory that builds them.
//!
//! A [`ScriptContext`] is the expensive thing the pool amortizes: every
//! script source under the root, loaded once and held in memory. A context
//! never changes after creation; picking up edits means building a new one,
//! which is what clearing the pool forces.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use hinny_resource::{BoxError, ResourceFactory};

use crate::content::RootContentProvider;

/// Identifier of the script-context pool in logs and errors.
pub const SCRIPT_CONTEXT_ID: &str = "script-context";

/// One bootstrapped execution context.
#[derive(Debug)]
pub struct ScriptContext {
    sources: BTreeMap<String, Arc<str>>,
    loaded_at: Instant,
    healthy: AtomicBool,
}

impl ScriptContext {
    /// Build a context from already-loaded sources.
    pub fn new(sources: BTreeMap<String, Arc<str>>) -> Self {
        Self {
            sources,
            loaded_at: Instant::now(),
            healthy: AtomicBool::new(true),
        }
    }

    /// Source of one script.
    pub fn source(&self, path: &str) -> Option<Arc<str>> {
        self.sources.get(path).cloned()
    }

    /// Whether a script exists in this context.
    pub fn contains(&self, path: &str) -> bool {
        self.sources.contains_key(path)
    }

    /// Loaded script paths.
    pub fn scripts(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    /// Number of loaded scripts.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether the context holds no scripts.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// When the sources were read.
    pub fn loaded_at(&self) -> Instant {
        self.loaded_at
    }

    /// Mark the context unusable; validation fails from now on.
    pub fn poison(&self) {
        self.healthy.store(false, Ordering::Release);
    }

    /// Whether the context is still usable.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }
}

/// Builds [`ScriptContext`]s from a content root.
#[derive(Debug, Clone)]
pub struct ScriptContextFactory {
    content: Arc<dyn RootContentProvider>,
}

impl ScriptContextFactory {
    /// Bind a factory to a content root.
    pub fn new(content: Arc<dyn RootContentProvider>) -> Self {
        Self { content }
    }

    /// The content root.
    pub fn content(&self) -> &Arc<dyn RootContentProvider> {
        &self.content
    }

    fn load(content: &dyn RootContentProvider) -> Result<ScriptContext, BoxError> {
        let mut sources = BTreeMap::new();
        for path in content.list()? {
            let bytes = content.read(&path)?;
            let text = String::from_utf8(bytes)
                .map_err(|e| format!("script {path} is not valid UTF-8: {e}"))?;
            sources.insert(path, Arc::from(text));
        }
        Ok(ScriptContext::new(sources))
    }
}

impl ResourceFactory for ScriptContextFactory {
    type Instance = ScriptContext;

    fn id(&self) -> &str {
        SCRIPT_CONTEXT_ID
    }

    async fn create(&self) -> Result<ScriptContext, BoxError> {
        let content = self.content.clone();
        let context = tokio::task::spawn_blocking(move || Self::load(content.as_ref())).await??;
        tracing::debug!(scripts = context.len(), "script context created");
        Ok(context)
    }

    async fn validate(&self, context: &ScriptContext) -> bool {
        context.is_healthy()
    }

    async fn destroy(&self, context: ScriptContext) -> Result<(), BoxError> {
        tracing::trace!(scripts = context.len(), "script context destroyed");
        drop(context);
        Ok(())
    }
}
