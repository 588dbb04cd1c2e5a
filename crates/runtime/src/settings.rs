//! The aggregate application configuration.
//!
//! ```toml
//! [script]
//! root = "scripts"
//! mode = "filesystem"
//!
//! [script.watcher]
//! interval_ms = 3000
//! delay_ms = 300
//! exclude = ["*.bak"]
//!
//! [pool]
//! max_total = 16
//! time_between_eviction_runs_millis = 60000
//!
//! [mapper]
//! root = "mappers"
//! ```

use std::path::PathBuf;

use hinny_config::{ConfigError, ConfigLoader, ConfigResult, WatcherConfig};
use hinny_resource::PoolConfig;
use serde::{Deserialize, Serialize};

use crate::content::ContentMode;
#[allow(unused_imports)]
use crate::families::FamilySettings;
#[cfg(feature = "cache")]
use crate::families::CacheConfig;
#[cfg(feature = "datasource")]
use crate::families::DataSourceConfig;
#[cfg(feature = "metadata")]
use crate::families::MetadataConfig;
use crate::router::RouterConfig;

/// Where scripts live and how changes to them are picked up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptSettings {
    /// Script root directory
    pub root: PathBuf,
    /// File system or embedded bundle
    pub mode: ContentMode,
    /// Changes under the root clear the context pool
    pub watcher: WatcherConfig,
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("scripts"),
            mode: ContentMode::FileSystem,
            watcher: WatcherConfig::default(),
        }
    }
}

/// SQL-mapper files; the mapper follows the script content mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperSettings {
    /// Mapper root; unset disables the mapper store
    pub root: Option<PathBuf>,
    /// Changed files are reloaded one by one
    pub watcher: WatcherConfig,
}

impl Default for MapperSettings {
    fn default() -> Self {
        Self {
            root: None,
            watcher: WatcherConfig {
                include: vec!["*.xml".to_owned()],
                ..WatcherConfig::default()
            },
        }
    }
}

impl MapperSettings {
    pub fn is_enabled(&self) -> bool {
        self.root.is_some()
    }
}

/// Everything the runtime reads from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub script: ScriptSettings,
    pub pool: PoolConfig,
    pub mapper: MapperSettings,
    pub router: RouterConfig,
    #[cfg(feature = "datasource")]
    pub datasource: FamilySettings<DataSourceConfig>,
    #[cfg(feature = "cache")]
    pub cache: FamilySettings<CacheConfig>,
    #[cfg(feature = "metadata")]
    pub metadata: FamilySettings<MetadataConfig>,
}

impl Settings {
    /// Load through the layered loader and validate.
    pub fn load(loader: &ConfigLoader) -> ConfigResult<Self> {
        let settings: Self = loader.load()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check everything that can be checked without touching resources.
    pub fn validate(&self) -> ConfigResult<()> {
        self.pool
            .validate()
            .map_err(|e| ConfigError::invalid_field("pool", e.to_string()))?;

        if self.script.watcher.enabled {
            if !self.script.mode.is_watchable() {
                return Err(ConfigError::invalid_field(
                    "script.watcher.enabled",
                    format!(
                        "unsupported content mode {:?}: only file-system roots can be watched",
                        self.script.mode
                    ),
                ));
            }
            self.script.watcher.validate()?;
        }

        if self.mapper.is_enabled() && self.mapper.watcher.enabled {
            if !self.script.mode.is_watchable() {
                return Err(ConfigError::invalid_field(
                    "mapper.watcher.enabled",
                    format!(
                        "unsupported content mode {:?}: only file-system roots can be watched",
                        self.script.mode
                    ),
                ));
            }
            self.mapper.watcher.validate()?;
        }

        self.router.validate()
    }

    /// Whether the script watcher will run.
    pub fn watch_scripts(&self) -> bool {
        self.script.watcher.enabled && self.script.mode.is_watchable()
    }

    /// Whether the mapper watcher will run.
    pub fn watch_mappers(&self) -> bool {
        self.mapper.is_enabled() && self.mapper.watcher.enabled && self.script.mode.is_watchable()
    }
}
