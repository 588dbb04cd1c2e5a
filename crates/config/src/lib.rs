//! Configuration plumbing for hinny.
//!
//! - [`merge`]: layering per-name overrides onto a global template
//! - [`loader`]: figment-based loading (defaults, TOML, environment)
//! - [`watchers`]: the polling file-system watcher that drives hot reload

pub mod error;
pub mod loader;
pub mod merge;
pub mod watchers;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use merge::{Merge, NamedConfig, effective};
pub use watchers::{
    FileSystemWatcher, PathFilter, WatchEvent, WatchEventType, WatchHandler, WatchMode,
    WatcherConfig, handler,
};
