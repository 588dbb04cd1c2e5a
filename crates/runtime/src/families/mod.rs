//! The resource families managed through named registries.
//!
//! Every family follows the same shape: a config struct whose fields are
//! all optional (so it can be layered onto the family's `global` template),
//! a handle type that implements [`Release`], and a builder that turns an
//! effective config into a handle. Families compile in through cargo
//! features and can be switched off at runtime with `disable = true`.

use std::collections::BTreeMap;

use hinny_config::merge::NamedConfig;
use hinny_resource::{Discovered, NamedResourceRegistry, Population, Release, TeardownReport};
use serde::{Deserialize, Serialize};

use crate::error::RuntimeResult;

#[cfg(feature = "cache")]
pub mod cache;
#[cfg(feature = "datasource")]
pub mod datasource;
#[cfg(feature = "metadata")]
pub mod metadata;

#[cfg(feature = "cache")]
pub use cache::{CacheClient, CacheConfig};
#[cfg(feature = "datasource")]
pub use datasource::{DataSource, DataSourceConfig};
#[cfg(feature = "metadata")]
pub use metadata::{MetadataConfig, MetadataManager};

/// Configuration of one family: switch, default, template and entries.
///
/// ```toml
/// [datasource]
/// default_name = "main"
///
/// [datasource.global]
/// max_connections = 20
///
/// [datasource.entries.main]
/// url = "postgres://db/app"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, bound(deserialize = "C: Deserialize<'de> + Default"))]
pub struct FamilySettings<C> {
    /// Skip this family entirely
    pub disable: bool,
    /// Name of the default entry; unset adopts the first discovered one
    pub default_name: Option<String>,
    /// Template every entry is merged onto
    pub global: C,
    /// Per-name overrides
    pub entries: BTreeMap<String, C>,
}

impl<C: Default> Default for FamilySettings<C> {
    fn default() -> Self {
        Self {
            disable: false,
            default_name: None,
            global: C::default(),
            entries: BTreeMap::new(),
        }
    }
}

impl<C> FamilySettings<C> {
    /// Whether there is anything to build
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Debug stand-in for a secret config value.
pub(crate) fn redacted(secret: Option<&String>) -> Option<&'static str> {
    secret.map(|_| "[REDACTED]")
}

/// Run one family's population.
///
/// Disabled families are skipped. A family nobody mentions (nothing
/// discovered, no entries, no `default_name`) is skipped as well; once a
/// default is named it must resolve or population fails.
pub(crate) fn populate_family<C, T, B>(
    registry: &NamedResourceRegistry<T>,
    settings: &FamilySettings<C>,
    discovered: Vec<Discovered<T>>,
    build: B,
) -> RuntimeResult<bool>
where
    C: NamedConfig,
    T: Release,
    B: FnMut(&str, C) -> hinny_resource::Result<T>,
{
    if settings.disable {
        tracing::info!(family = registry.family(), "resource family disabled");
        return Ok(false);
    }
    let names_default = settings
        .default_name
        .as_deref()
        .is_some_and(|name| !name.trim().is_empty());
    if discovered.is_empty() && settings.entries.is_empty() && !names_default {
        tracing::debug!(family = registry.family(), "no resources discovered or configured");
        return Ok(false);
    }
    let population = Population {
        discovered,
        default_name: settings.default_name.clone(),
        global: settings.global.clone(),
        configured: settings.entries.clone(),
    };
    Ok(registry.populate(population, build)?)
}

/// Resources that exist before startup, handed to the coordinator.
#[derive(Debug, Default)]
pub struct Discoveries {
    /// Already-open datasources
    #[cfg(feature = "datasource")]
    pub datasources: Vec<Discovered<DataSource>>,
    /// Already-connected cache clients
    #[cfg(feature = "cache")]
    pub caches: Vec<Discovered<CacheClient>>,
    /// Already-built metadata managers
    #[cfg(feature = "metadata")]
    pub metadata: Vec<Discovered<MetadataManager>>,
}

/// The registries of every compiled-in family.
#[derive(Debug)]
pub struct Registries {
    #[cfg(feature = "datasource")]
    datasource: NamedResourceRegistry<DataSource>,
    #[cfg(feature = "cache")]
    cache: NamedResourceRegistry<CacheClient>,
    #[cfg(feature = "metadata")]
    metadata: NamedResourceRegistry<MetadataManager>,
}

impl Default for Registries {
    fn default() -> Self {
        Self::new()
    }
}

impl Registries {
    /// Empty, unpopulated registries.
    pub fn new() -> Self {
        Self {
            #[cfg(feature = "datasource")]
            datasource: NamedResourceRegistry::new(datasource::FAMILY),
            #[cfg(feature = "cache")]
            cache: NamedResourceRegistry::new(cache::FAMILY),
            #[cfg(feature = "metadata")]
            metadata: NamedResourceRegistry::new(metadata::FAMILY),
        }
    }

    /// Datasources by name.
    #[cfg(feature = "datasource")]
    pub fn datasource(&self) -> &NamedResourceRegistry<DataSource> {
        &self.datasource
    }

    /// Cache clients by name.
    #[cfg(feature = "cache")]
    pub fn cache(&self) -> &NamedResourceRegistry<CacheClient> {
        &self.cache
    }

    /// Engine metadata managers by name.
    #[cfg(feature = "metadata")]
    pub fn metadata(&self) -> &NamedResourceRegistry<MetadataManager> {
        &self.metadata
    }

    /// Populate every enabled family from settings.
    ///
    /// Datasources come first because metadata entries refer to them.
    #[cfg_attr(
        not(any(feature = "datasource", feature = "cache")),
        allow(unused_variables)
    )]
    pub fn populate(
        &self,
        settings: &crate::settings::Settings,
        discoveries: Discoveries,
    ) -> RuntimeResult<()> {
        #[cfg(feature = "datasource")]
        populate_family(
            &self.datasource,
            &settings.datasource,
            discoveries.datasources,
            datasource::build,
        )?;
        #[cfg(feature = "cache")]
        populate_family(&self.cache, &settings.cache, discoveries.caches, cache::build)?;
        #[cfg(feature = "metadata")]
        populate_family(
            &self.metadata,
            &settings.metadata,
            discoveries.metadata,
            |key, config| metadata::build(&self.datasource, key, config),
        )?;
        Ok(())
    }

    /// Release every entry of every family, metadata first. Names in the
    /// report are qualified as `family/name`.
    pub async fn release_all(&self) -> TeardownReport {
        #[allow(unused_mut)]
        let mut report = TeardownReport::default();
        #[cfg(feature = "metadata")]
        absorb(&mut report, metadata::FAMILY, self.metadata.release_all().await);
        #[cfg(feature = "cache")]
        absorb(&mut report, cache::FAMILY, self.cache.release_all().await);
        #[cfg(feature = "datasource")]
        absorb(&mut report, datasource::FAMILY, self.datasource.release_all().await);
        report
    }

    /// Entry count per compiled-in family.
    pub fn summary(&self) -> Vec<(&str, usize, Option<String>)> {
        #[allow(unused_mut)]
        let mut summary = Vec::new();
        #[cfg(feature = "datasource")]
        summary.push((self.datasource.family(), self.datasource.len(), self.datasource.default_name()));
        #[cfg(feature = "cache")]
        summary.push((self.cache.family(), self.cache.len(), self.cache.default_name()));
        #[cfg(feature = "metadata")]
        summary.push((self.metadata.family(), self.metadata.len(), self.metadata.default_name()));
        summary
    }
}

#[cfg(any(feature = "datasource", feature = "cache", feature = "metadata"))]
fn absorb(report: &mut TeardownReport, family: &str, part: TeardownReport) {
    report
        .released
        .extend(part.released.into_iter().map(|name| format!("{family}/{name}")));
    report.failed.extend(
        part.failed
            .into_iter()
            .map(|(name, reason)| (format!("{family}/{name}"), reason)),
    );
}
