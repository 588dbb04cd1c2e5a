//! Script-engine metadata: where the engine keeps its own tables.
//!
//! A metadata manager is bound to one datasource, named in its config or
//! the datasource registry's default.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use hinny_config::impl_merge;
use hinny_config::merge::NamedConfig;
use hinny_resource::{BoxError, Error, NamedResourceRegistry, Release};
use serde::{Deserialize, Serialize};

use super::datasource::DataSource;

/// Registry family name.
pub const FAMILY: &str = "metadata";

const DEFAULT_TABLE_PREFIX: &str = "hinny_";

/// Metadata manager settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub name: Option<String>,
    /// Datasource to store metadata in; unset uses the default datasource
    pub datasource: Option<String>,
    pub table_prefix: Option<String>,
}

impl_merge!(MetadataConfig { name, datasource, table_prefix });

impl NamedConfig for MetadataConfig {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn set_name(&mut self, name: String) {
        self.name = Some(name);
    }
}

/// Engine metadata bound to a datasource.
#[derive(Debug)]
pub struct MetadataManager {
    name: String,
    datasource: Arc<DataSource>,
    table_prefix: String,
    closed: AtomicBool,
}

impl MetadataManager {
    pub fn new(name: impl Into<String>, datasource: Arc<DataSource>) -> Self {
        Self {
            name: name.into(),
            datasource,
            table_prefix: DEFAULT_TABLE_PREFIX.to_owned(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn datasource(&self) -> &Arc<DataSource> {
        &self.datasource
    }

    pub fn table_prefix(&self) -> &str {
        &self.table_prefix
    }

    /// Fully qualified name of one of the engine's tables.
    pub fn table(&self, name: &str) -> String {
        format!("{}{name}", self.table_prefix)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Release for MetadataManager {
    async fn release(&self) -> Result<(), BoxError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(format!("metadata manager {} already closed", self.name).into());
        }
        Ok(())
    }
}

/// Build a metadata manager, resolving its datasource.
pub fn build(
    datasources: &NamedResourceRegistry<DataSource>,
    key: &str,
    config: MetadataConfig,
) -> hinny_resource::Result<MetadataManager> {
    let datasource = match config.datasource.as_deref().filter(|n| !n.trim().is_empty()) {
        Some(name) => datasources.get(name)?,
        None => datasources.get_default().map_err(|_| {
            Error::configuration(format!(
                "metadata '{key}' names no datasource and there is no default datasource"
            ))
        })?,
    };
    let table_prefix = config
        .table_prefix
        .unwrap_or_else(|| DEFAULT_TABLE_PREFIX.to_owned());
    if !table_prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(Error::configuration(format!(
            "metadata '{key}': table_prefix '{table_prefix}' may only contain letters, digits and '_'"
        )));
    }
    tracing::debug!(name = key, datasource = datasource.name(), "metadata bound to datasource");
    Ok(MetadataManager {
        name: config.name.unwrap_or_else(|| key.to_owned()),
        datasource,
        table_prefix,
        closed: AtomicBool::new(false),
    })
}
