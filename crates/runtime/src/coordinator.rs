//! Startup and shutdown ordering.
//!
//! Startup: content root → context factory → pool (and its evictor) →
//! script watcher → mapper store and watcher → resource families. A failure
//! at any step tears down whatever already started before the error is
//! returned. Shutdown runs in reverse and is best-effort: registries are
//! released first, then watchers stop, then the pool closes. Borrows still
//! in flight are not drained.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use hinny_config::watchers::{self, FileSystemWatcher};
use hinny_config::{ConfigError, ConfigLoader};
use hinny_resource::{Discovered, EngineInstancePool, TeardownReport};

use crate::content::{ContentMode, EmbeddedRoot, FileSystemRoot, RootContentProvider};
use crate::engine::ScriptContextFactory;
use crate::error::{RuntimeError, RuntimeResult};
#[cfg(feature = "cache")]
use crate::families::CacheClient;
#[cfg(feature = "datasource")]
use crate::families::DataSource;
#[cfg(feature = "metadata")]
use crate::families::MetadataManager;
use crate::families::{Discoveries, Registries};
use crate::mapper::MapperStore;
use crate::router::ScriptRouter;
use crate::settings::Settings;

/// The context pool type the runtime runs.
pub type ContextPool = EngineInstancePool<ScriptContextFactory>;

/// Collects what startup needs, then starts everything in order.
#[derive(Debug)]
pub struct LifecycleCoordinator {
    settings: Settings,
    content: Option<Arc<dyn RootContentProvider>>,
    mapper_content: Option<Arc<dyn RootContentProvider>>,
    discoveries: Discoveries,
}

impl LifecycleCoordinator {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            content: None,
            mapper_content: None,
            discoveries: Discoveries::default(),
        }
    }

    /// Load settings through `loader` and validate them.
    pub fn from_loader(loader: &ConfigLoader) -> RuntimeResult<Self> {
        Ok(Self::new(Settings::load(loader)?))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Serve scripts from `content` instead of resolving the configured root.
    ///
    /// Required in embedded mode, where there is no directory to resolve.
    #[must_use]
    pub fn with_content(mut self, content: impl RootContentProvider) -> Self {
        self.content = Some(Arc::new(content));
        self
    }

    /// Embedded bundle for the scripts.
    #[must_use]
    pub fn with_embedded(self, bundle: EmbeddedRoot) -> Self {
        self.with_content(bundle)
    }

    /// Read mapper files from `content` instead of the configured mapper root.
    #[must_use]
    pub fn with_mapper_content(mut self, content: impl RootContentProvider) -> Self {
        self.mapper_content = Some(Arc::new(content));
        self
    }

    /// Adopt an existing datasource during population.
    #[cfg(feature = "datasource")]
    #[must_use]
    pub fn discover_datasource(mut self, found: Discovered<DataSource>) -> Self {
        self.discoveries.datasources.push(found);
        self
    }

    /// Adopt an existing cache client during population.
    #[cfg(feature = "cache")]
    #[must_use]
    pub fn discover_cache(mut self, found: Discovered<CacheClient>) -> Self {
        self.discoveries.caches.push(found);
        self
    }

    /// Adopt an existing metadata manager during population.
    #[cfg(feature = "metadata")]
    #[must_use]
    pub fn discover_metadata(mut self, found: Discovered<MetadataManager>) -> Self {
        self.discoveries.metadata.push(found);
        self
    }

    fn resolve_content(&mut self) -> RuntimeResult<Arc<dyn RootContentProvider>> {
        if let Some(content) = self.content.take() {
            return Ok(content);
        }
        let script = &self.settings.script;
        match script.mode {
            ContentMode::FileSystem => {
                // Only files the script watcher would track are loaded as sources.
                let filter = script.watcher.filter()?;
                Ok(Arc::new(FileSystemRoot::with_filter(&script.root, filter)?))
            }
            ContentMode::Embedded => Err(RuntimeError::content(
                script.root.display().to_string(),
                "embedded mode needs a bundle supplied at startup",
            )),
        }
    }

    fn resolve_mapper_content(&mut self) -> RuntimeResult<Option<Arc<dyn RootContentProvider>>> {
        if let Some(content) = self.mapper_content.take() {
            return Ok(Some(content));
        }
        let mapper = &self.settings.mapper;
        let Some(root) = &mapper.root else {
            return Ok(None);
        };
        match self.settings.script.mode {
            ContentMode::FileSystem => {
                let filter = mapper.watcher.filter()?;
                Ok(Some(Arc::new(FileSystemRoot::with_filter(root, filter)?)))
            }
            ContentMode::Embedded => Err(RuntimeError::content(
                root.display().to_string(),
                "embedded mode needs a mapper bundle supplied at startup",
            )),
        }
    }

    /// Start everything, or nothing.
    pub async fn start(mut self) -> RuntimeResult<RuntimeHandle> {
        self.settings.validate()?;

        let content = self.resolve_content()?;
        if self.settings.script.watcher.enabled && !content.mode().is_watchable() {
            return Err(ConfigError::invalid_field(
                "script.watcher.enabled",
                format!("unsupported content mode {:?}: it cannot be watched", content.mode()),
            )
            .into());
        }
        tracing::info!(mode = ?content.mode(), root = ?content.watch_root(), "script content resolved");

        let factory = ScriptContextFactory::new(content.clone());
        let pool = EngineInstancePool::new(factory, self.settings.pool.clone())?;
        pool.start_evictor();

        let router = ScriptRouter::new(self.settings.router.clone(), pool.clone());
        let mut handle = RuntimeHandle {
            settings: self.settings.clone(),
            content,
            pool,
            router,
            script_watcher: None,
            mapper: None,
            mapper_watcher: None,
            registries: Registries::new(),
            shut_down: AtomicBool::new(false),
        };

        if let Err(e) = self.finish(&mut handle).await {
            tracing::error!(error = %e, "startup failed, tearing down");
            handle.shutdown().await;
            return Err(e);
        }
        tracing::info!(
            pool_max_total = handle.settings.pool.max_total,
            script_watcher = handle.script_watcher.is_some(),
            mapper_files = handle.mapper.as_ref().map_or(0, |m| m.len()),
            "runtime started"
        );
        Ok(handle)
    }

    async fn finish(&mut self, handle: &mut RuntimeHandle) -> RuntimeResult<()> {
        let created = handle.pool.ensure_min_idle().await;
        if created > 0 {
            tracing::debug!(created, "pre-created idle contexts");
        }

        if self.settings.script.watcher.enabled
            && let Some(root) = handle.content.watch_root()
        {
            let pool = handle.pool.clone();
            let on_change = watchers::handler(move |event| {
                let pool = pool.clone();
                async move {
                    tracing::info!(
                        event = %event.event_type,
                        path = %event.path().display(),
                        "script change detected, clearing context pool"
                    );
                    pool.clear().await;
                    Ok(())
                }
            });
            let watcher =
                FileSystemWatcher::from_config(root, &self.settings.script.watcher, true, on_change)?;
            watcher.start()?;
            handle.script_watcher = Some(watcher);
        }

        if let Some(content) = self.resolve_mapper_content()? {
            let store = Arc::new(MapperStore::new(content));
            store.load_all()?;
            if self.settings.mapper.watcher.enabled {
                let root = store.content().watch_root().map(ToOwned::to_owned);
                match root {
                    Some(root) => {
                        let watcher = FileSystemWatcher::from_config(
                            root,
                            &self.settings.mapper.watcher,
                            false,
                            store.watch_handler(),
                        )?;
                        watcher.start()?;
                        handle.mapper_watcher = Some(watcher);
                    }
                    None => {
                        return Err(ConfigError::invalid_field(
                            "mapper.watcher.enabled",
                            "unsupported content mode: the mapper root cannot be watched",
                        )
                        .into());
                    }
                }
            }
            handle.mapper = Some(store);
        }

        let discoveries = std::mem::take(&mut self.discoveries);
        handle.registries.populate(&self.settings, discoveries)
    }
}

/// What shutdown did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Registry teardown, names qualified as `family/name`
    pub registries: TeardownReport,
    /// Watchers stopped
    pub watchers_stopped: usize,
    /// Whether this call closed the pool
    pub pool_closed: bool,
}

/// Owns everything startup built.
pub struct RuntimeHandle {
    settings: Settings,
    content: Arc<dyn RootContentProvider>,
    pool: ContextPool,
    router: ScriptRouter,
    script_watcher: Option<FileSystemWatcher>,
    mapper: Option<Arc<MapperStore>>,
    mapper_watcher: Option<FileSystemWatcher>,
    registries: Registries,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("pool", &self.pool)
            .field("script_watcher", &self.script_watcher)
            .field("mapper_watcher", &self.mapper_watcher)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl RuntimeHandle {
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn content(&self) -> &Arc<dyn RootContentProvider> {
        &self.content
    }

    pub fn pool(&self) -> &ContextPool {
        &self.pool
    }

    pub fn router(&self) -> &ScriptRouter {
        &self.router
    }

    /// Mapper store, when a mapper root is configured.
    pub fn mapper(&self) -> Option<&Arc<MapperStore>> {
        self.mapper.as_ref()
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    /// Whether the script watcher is running.
    pub fn is_watching_scripts(&self) -> bool {
        self.script_watcher.as_ref().is_some_and(FileSystemWatcher::is_running)
    }

    /// Whether the mapper watcher is running.
    pub fn is_watching_mappers(&self) -> bool {
        self.mapper_watcher.as_ref().is_some_and(FileSystemWatcher::is_running)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Release registries, stop watchers, close the pool. Only the first
    /// call does anything; later calls return an empty report.
    pub async fn shutdown(&self) -> ShutdownReport {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return ShutdownReport::default();
        }
        tracing::info!("runtime shutting down");

        let registries = self.registries.release_all().await;
        if !registries.is_clean() {
            tracing::warn!(failed = registries.failed.len(), "some resources failed to release");
        }

        let mut watchers_stopped = 0;
        for watcher in [&self.script_watcher, &self.mapper_watcher].into_iter().flatten() {
            if watcher.is_running() {
                watcher.stop().await;
                watchers_stopped += 1;
            }
        }

        let pool_closed = !self.pool.is_closed();
        self.pool.close().await;

        tracing::info!(
            released = registries.released.len(),
            watchers_stopped,
            "runtime stopped"
        );
        ShutdownReport {
            registries,
            watchers_stopped,
            pool_closed,
        }
    }
}
