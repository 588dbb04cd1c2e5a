//! Polling file-system watcher with include/exclude filters and debouncing.
//!
//! The watcher walks its root on a fixed interval, diffs the result against
//! the previous snapshot and hands the resulting [`WatchEvent`]s to a
//! callback, either one call per changed file or one call per quiet period.
//! Callbacks run behind an error boundary: returned errors and panics are
//! logged and never stop the scan loop.

mod debounce;
mod filter;
mod snapshot;
mod types;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{ConfigError, ConfigResult};

pub use debounce::Debouncer;
pub use filter::PathFilter;
pub use snapshot::{FileMarker, Snapshot};
pub use types::{WatchEvent, WatchEventType};

/// Error type callbacks may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared async callback invoked with change events.
pub type WatchHandler = Arc<dyn Fn(WatchEvent) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Wrap an async closure as a [`WatchHandler`].
pub fn handler<F, Fut>(f: F) -> WatchHandler
where
    F: Fn(WatchEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move |event| f(event).boxed())
}

/// Run a handler, logging instead of propagating errors and panics.
pub(crate) async fn invoke(handler: &WatchHandler, event: WatchEvent) {
    let path = event.path.display().to_string();
    let kind = event.event_type;

    let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
        Ok(fut) => fut,
        Err(_) => {
            tracing::error!(path, event = %kind, "watch callback panicked");
            return;
        }
    };
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(path, event = %kind, error = %e, "watch callback failed"),
        Err(_) => tracing::error!(path, event = %kind, "watch callback panicked"),
    }
}

/// Watcher settings as they appear in configuration files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Run the watcher at all
    pub enabled: bool,
    /// Scan period in milliseconds
    pub interval_ms: u64,
    /// Quiet period before a debounced callback fires, in milliseconds
    pub delay_ms: u64,
    /// Wildcards a file must match (empty matches everything)
    pub include: Vec<String>,
    /// Wildcards that exclude a file even when included
    pub exclude: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 3000,
            delay_ms: 300,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

impl WatcherConfig {
    /// Scan period
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Debounce window
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Reject zero intervals and bad wildcards.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.interval_ms == 0 {
            return Err(ConfigError::invalid_field("interval_ms", "scan interval must be positive"));
        }
        self.filter().map(|_| ())
    }

    /// Compile the include/exclude sets.
    pub fn filter(&self) -> ConfigResult<PathFilter> {
        PathFilter::new(&self.include, &self.exclude)
    }
}

/// How events reach the callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    /// One call per quiet period, with the last event of the burst
    Debounced(Duration),
    /// One call per changed file, in path order
    PerFile,
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Periodic scanner over one root directory
pub struct FileSystemWatcher {
    root: PathBuf,
    filter: Arc<PathFilter>,
    interval: Duration,
    mode: WatchMode,
    handler: WatchHandler,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for FileSystemWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystemWatcher")
            .field("root", &self.root)
            .field("interval", &self.interval)
            .field("mode", &self.mode)
            .field("running", &self.is_running())
            .finish()
    }
}

impl FileSystemWatcher {
    /// Create a stopped watcher
    pub fn new(
        root: impl Into<PathBuf>,
        filter: PathFilter,
        interval: Duration,
        mode: WatchMode,
        handler: WatchHandler,
    ) -> Self {
        Self {
            root: root.into(),
            filter: Arc::new(filter),
            interval,
            mode,
            handler,
            running: Mutex::new(None),
        }
    }

    /// Create a stopped watcher from configuration.
    ///
    /// `debounce` selects [`WatchMode::Debounced`] with the configured delay;
    /// otherwise every file is reported individually.
    pub fn from_config(
        root: impl Into<PathBuf>,
        config: &WatcherConfig,
        debounce: bool,
        handler: WatchHandler,
    ) -> ConfigResult<Self> {
        config.validate()?;
        let mode = if debounce {
            WatchMode::Debounced(config.delay())
        } else {
            WatchMode::PerFile
        };
        Ok(Self::new(root, config.filter()?, config.interval(), mode, handler))
    }

    /// Watched directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Delivery mode
    pub fn mode(&self) -> WatchMode {
        self.mode
    }

    /// Whether the scan loop is active
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Spawn the scan loop. Must be called from within a tokio runtime.
    pub fn start(&self) -> ConfigResult<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(ConfigError::watch(format!(
                "watcher for {} is already running",
                self.root.display()
            )));
        }

        let cancel = CancellationToken::new();
        let scan = ScanLoop {
            root: self.root.clone(),
            filter: self.filter.clone(),
            interval: self.interval,
            mode: self.mode,
            handler: self.handler.clone(),
        };
        let task = tokio::spawn(scan.run(cancel.clone()));
        *running = Some(Running { cancel, task });

        tracing::info!(
            root = %self.root.display(),
            interval_ms = self.interval.as_millis() as u64,
            mode = ?self.mode,
            "file watcher started"
        );
        Ok(())
    }

    /// Stop the scan loop and wait for it to finish. Idempotent.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.cancel.cancel();
        if let Err(e) = running.task.await
            && e.is_panic()
        {
            tracing::error!(root = %self.root.display(), "file watcher task panicked");
        }
        tracing::info!(root = %self.root.display(), "file watcher stopped");
    }
}

impl Drop for FileSystemWatcher {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

struct ScanLoop {
    root: PathBuf,
    filter: Arc<PathFilter>,
    interval: Duration,
    mode: WatchMode,
    handler: WatchHandler,
}

impl ScanLoop {
    async fn run(self, cancel: CancellationToken) {
        let debouncer = match self.mode {
            WatchMode::Debounced(delay) => Some(Debouncer::spawn(delay, self.handler.clone())),
            WatchMode::PerFile => None,
        };

        // The first successful scan only sets the baseline.
        let mut baseline = self.scan().await;
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(current) = self.scan().await else {
                continue;
            };
            let events = baseline
                .as_ref()
                .map(|previous| previous.diff(&current))
                .unwrap_or_default();
            baseline = Some(current);

            for event in events {
                tracing::debug!(
                    path = %event.path.display(),
                    event = %event.event_type,
                    "file change detected"
                );
                match &debouncer {
                    Some(debouncer) => debouncer.push(event),
                    None => invoke(&self.handler, event).await,
                }
            }
        }

        if let Some(debouncer) = debouncer {
            debouncer.shutdown().await;
        }
    }

    async fn scan(&self) -> Option<Snapshot> {
        let root = self.root.clone();
        let filter = self.filter.clone();
        let result = tokio::task::spawn_blocking(move || Snapshot::scan(&root, &filter)).await;
        match result {
            Ok(Ok(snapshot)) => Some(snapshot),
            Ok(Err(e)) => {
                tracing::warn!(root = %self.root.display(), error = %e, "directory scan failed");
                None
            }
            Err(e) => {
                tracing::error!(root = %self.root.display(), error = %e, "directory scan task failed");
                None
            }
        }
    }
}
