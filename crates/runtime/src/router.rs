//! Mapping request paths to scripts and running them on a pooled context.
//!
//! Resolution walks the prefix mappings in order; the first whose request
//! prefix matches rewrites the path. The last segment's extension (if any)
//! must be one of the supported suffixes and is stripped. Dispatch then
//! borrows exactly one [`ScriptContext`] for the request and hands it back
//! exactly once, whatever the handler does.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use hinny_resource::EngineInstancePool;
use serde::{Deserialize, Serialize};

use crate::engine::{ScriptContext, ScriptContextFactory};
use crate::error::{BoxError, RuntimeError, RuntimeResult};

/// Rewrites a request prefix to a script prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixMapping {
    /// Prefix of inbound request paths, e.g. `/!/`
    pub request_path: String,
    /// What replaces it, relative to the script root
    pub script_path: String,
}

impl PrefixMapping {
    pub fn new(request_path: impl Into<String>, script_path: impl Into<String>) -> Self {
        Self {
            request_path: request_path.into(),
            script_path: script_path.into(),
        }
    }
}

/// Router settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Tried in order; first match wins
    pub prefix_mappings: Vec<PrefixMapping>,
    /// Accepted request suffixes; `""` accepts paths without an extension
    pub support_suffix: BTreeSet<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            prefix_mappings: vec![PrefixMapping::new("/!/", "")],
            support_suffix: ["", ".json", ".action"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
        }
    }
}

impl RouterConfig {
    /// Every request prefix must be absolute and suffixes must start with a dot.
    pub fn validate(&self) -> hinny_config::ConfigResult<()> {
        if self.prefix_mappings.is_empty() {
            return Err(hinny_config::ConfigError::invalid_field(
                "router.prefix_mappings",
                "at least one prefix mapping is required",
            ));
        }
        if let Some(bad) = self
            .prefix_mappings
            .iter()
            .find(|m| !m.request_path.starts_with('/'))
        {
            return Err(hinny_config::ConfigError::invalid_field(
                "router.prefix_mappings",
                format!("request path '{}' must start with '/'", bad.request_path),
            ));
        }
        if let Some(bad) = self
            .support_suffix
            .iter()
            .find(|s| !s.is_empty() && !s.starts_with('.'))
        {
            return Err(hinny_config::ConfigError::invalid_field(
                "router.support_suffix",
                format!("suffix '{bad}' must be empty or start with '.'"),
            ));
        }
        Ok(())
    }
}

/// A resolved request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRoute {
    /// The path as requested
    pub request_path: String,
    /// Root-relative script path, without extension
    pub script_path: String,
    /// The request suffix that was stripped (`""` when none)
    pub suffix: String,
}

impl ScriptRoute {
    /// Script file name for a given source extension, e.g. `api/user.js`.
    pub fn file(&self, extension: &str) -> String {
        format!("{}{extension}", self.script_path)
    }
}

/// Turns a handler failure into the error reported to the caller.
pub trait ExceptionResolver: Send + Sync + 'static {
    fn resolve(&self, route: &ScriptRoute, error: BoxError) -> RuntimeError;
}

/// Logs the failure and reports it as [`RuntimeError::Handler`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExceptionResolver;

impl ExceptionResolver for DefaultExceptionResolver {
    fn resolve(&self, route: &ScriptRoute, error: BoxError) -> RuntimeError {
        tracing::error!(
            request = %route.request_path,
            script = %route.script_path,
            error = %error,
            "script handler failed"
        );
        RuntimeError::Handler {
            script: route.script_path.clone(),
            message: error.to_string(),
        }
    }
}

/// Resolves request paths and dispatches them onto the context pool.
#[derive(Clone)]
pub struct ScriptRouter {
    config: RouterConfig,
    pool: EngineInstancePool<ScriptContextFactory>,
    resolver: Arc<dyn ExceptionResolver>,
}

impl std::fmt::Debug for ScriptRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRouter")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .finish()
    }
}

impl ScriptRouter {
    /// Router with the default exception resolver.
    pub fn new(config: RouterConfig, pool: EngineInstancePool<ScriptContextFactory>) -> Self {
        Self {
            config,
            pool,
            resolver: Arc::new(DefaultExceptionResolver),
        }
    }

    /// Replace the exception resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: impl ExceptionResolver) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Resolve a request path, or `None` when nothing maps it.
    pub fn resolve(&self, request_path: &str) -> Option<ScriptRoute> {
        resolve(&self.config, request_path)
    }

    /// Resolve `request_path` and run `handler` on one borrowed context.
    ///
    /// The context goes back to the pool exactly once: after the handler
    /// returns, after it fails, or (through the guard) if it panics. Handler
    /// errors pass through the exception resolver.
    pub async fn dispatch<R, H>(&self, request_path: &str, handler: H) -> RuntimeResult<R>
    where
        H: for<'a> FnOnce(&'a ScriptRoute, &'a ScriptContext) -> BoxFuture<'a, Result<R, BoxError>>,
    {
        let route = self.resolve(request_path).ok_or_else(|| RuntimeError::NoRoute {
            path: request_path.to_owned(),
        })?;
        let context = self.pool.borrow().await?;
        tracing::trace!(
            request = %route.request_path,
            script = %route.script_path,
            serial = context.serial(),
            "dispatching request"
        );
        let outcome = handler(&route, &context).await;
        context.release().await;
        outcome.map_err(|e| self.resolver.resolve(&route, e))
    }
}

/// Resolution without a pool, shared by the router and the CLI.
pub fn resolve(config: &RouterConfig, request_path: &str) -> Option<ScriptRoute> {
    let path = request_path.split(['?', '#']).next().unwrap_or_default();
    let mapping = config
        .prefix_mappings
        .iter()
        .find(|m| path.starts_with(m.request_path.as_str()))?;
    let rest = &path[mapping.request_path.len()..];

    let (stem, suffix) = split_suffix(rest);
    if !config.support_suffix.contains(suffix) {
        return None;
    }

    let mut script = String::new();
    for segment in mapping
        .script_path
        .split('/')
        .chain(stem.split('/'))
        .filter(|s| !s.is_empty())
    {
        if segment == "." || segment == ".." || segment.contains('\\') {
            return None;
        }
        if !script.is_empty() {
            script.push('/');
        }
        script.push_str(segment);
    }
    if script.is_empty() || stem.ends_with('/') {
        return None;
    }

    Some(ScriptRoute {
        request_path: request_path.to_owned(),
        script_path: script,
        suffix: suffix.to_owned(),
    })
}

fn split_suffix(path: &str) -> (&str, &str) {
    let segment_start = path.rfind('/').map_or(0, |i| i + 1);
    match path[segment_start..].rfind('.') {
        Some(dot) if dot > 0 => path.split_at(segment_start + dot),
        _ => (path, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn script(config: &RouterConfig, path: &str) -> Option<String> {
        resolve(config, path).map(|route| route.script_path)
    }

    #[test]
    fn default_mapping_strips_marker_and_suffix() {
        let config = RouterConfig::default();
        assert_eq!(script(&config, "/!/api/user/list").as_deref(), Some("api/user/list"));
        assert_eq!(script(&config, "/!/api/user/list.json").as_deref(), Some("api/user/list"));
        assert_eq!(script(&config, "/!/api/save.action?id=1").as_deref(), Some("api/save"));
        let route = resolve(&config, "/!/api/user.json").unwrap();
        assert_eq!(route.suffix, ".json");
        assert_eq!(route.file(".js"), "api/user.js");
    }

    #[test]
    fn unsupported_suffix_or_prefix_is_unrouted() {
        let config = RouterConfig::default();
        assert_eq!(script(&config, "/!/api/user.txt"), None);
        assert_eq!(script(&config, "/api/user"), None);
        assert_eq!(script(&config, "/!/"), None);
        assert_eq!(script(&config, "/!/api/"), None);
    }

    #[test]
    fn traversal_is_rejected() {
        let config = RouterConfig::default();
        assert_eq!(script(&config, "/!/../secret"), None);
        assert_eq!(script(&config, "/!/api/./user"), None);
    }

    #[test]
    fn mappings_are_tried_in_order() {
        let config = RouterConfig {
            prefix_mappings: vec![
                PrefixMapping::new("/api/v2/", "v2"),
                PrefixMapping::new("/api/", "legacy/"),
            ],
            ..Default::default()
        };
        assert_eq!(script(&config, "/api/v2/user").as_deref(), Some("v2/user"));
        assert_eq!(script(&config, "/api/user.json").as_deref(), Some("legacy/user"));
    }

    #[test]
    fn dots_inside_directories_are_not_suffixes() {
        let config = RouterConfig::default();
        assert_eq!(script(&config, "/!/v1.2/user").as_deref(), Some("v1.2/user"));
        assert_eq!(script(&config, "/!/.hidden"), Some(".hidden".to_owned()));
    }

    #[test]
    fn validation() {
        assert!(RouterConfig::default().validate().is_ok());
        let relative = RouterConfig {
            prefix_mappings: vec![PrefixMapping::new("api/", "")],
            ..Default::default()
        };
        assert!(relative.validate().is_err());
        let suffix = RouterConfig {
            support_suffix: ["json".to_owned()].into_iter().collect(),
            ..Default::default()
        };
        assert!(suffix.validate().is_err());
        let empty = RouterConfig {
            prefix_mappings: Vec::new(),
            ..Default::default()
        };
        assert!(empty.validate().is_err());
    }
}
