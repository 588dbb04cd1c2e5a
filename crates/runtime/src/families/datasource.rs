//! Relational datasources.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use hinny_config::impl_merge;
use hinny_config::merge::NamedConfig;
use hinny_resource::{BoxError, Error, Release};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::redacted;
use url::Url;

/// Registry family name.
pub const FAMILY: &str = "datasource";

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

/// Datasource settings; every field inherits from the family template when unset.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSourceConfig {
    pub name: Option<String>,
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub max_connections: Option<u32>,
    pub min_idle: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
}

impl_merge!(DataSourceConfig {
    name,
    url,
    username,
    password,
    max_connections,
    min_idle,
    connect_timeout_ms,
});

impl fmt::Debug for DataSourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSourceConfig")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &redacted(self.password.as_ref()))
            .field("max_connections", &self.max_connections)
            .field("min_idle", &self.min_idle)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}

impl NamedConfig for DataSourceConfig {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn set_name(&mut self, name: String) {
        self.name = Some(name);
    }
}

/// Handle to one datasource.
///
/// Holds the resolved connection settings; the driver behind it is opened
/// by whoever consumes the handle.
#[derive(Debug)]
pub struct DataSource {
    name: String,
    url: Url,
    username: Option<String>,
    password: Option<SecretString>,
    max_connections: u32,
    min_idle: u32,
    connect_timeout: Duration,
    closed: AtomicBool,
}

impl DataSource {
    /// Open a handle from parts, e.g. for a datasource created outside the registry.
    pub fn new(name: impl Into<String>, url: Url) -> Self {
        Self {
            name: name.into(),
            url,
            username: None,
            password: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_idle: 0,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_ref().map(ExposeSecret::expose_secret)
    }

    pub fn max_connections(&self) -> u32 {
        self.max_connections
    }

    pub fn min_idle(&self) -> u32 {
        self.min_idle
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Whether the handle was released.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Release for DataSource {
    async fn release(&self) -> Result<(), BoxError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(format!("datasource {} already closed", self.name).into());
        }
        tracing::debug!(name = %self.name, host = self.url.host_str(), "datasource closed");
        Ok(())
    }
}

/// Build a datasource from its effective config.
pub fn build(key: &str, config: DataSourceConfig) -> hinny_resource::Result<DataSource> {
    let raw = config
        .url
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| Error::configuration(format!("datasource '{key}' has no url")))?;
    let url = Url::parse(&raw)
        .map_err(|e| Error::configuration(format!("datasource '{key}' has an invalid url: {e}")))?;

    let max_connections = config.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS);
    let min_idle = config.min_idle.unwrap_or(0);
    if max_connections == 0 {
        return Err(Error::configuration(format!(
            "datasource '{key}': max_connections must be greater than 0"
        )));
    }
    if min_idle > max_connections {
        return Err(Error::configuration(format!(
            "datasource '{key}': min_idle ({min_idle}) exceeds max_connections ({max_connections})"
        )));
    }

    Ok(DataSource {
        name: config.name.unwrap_or_else(|| key.to_owned()),
        url,
        username: config.username,
        password: config.password.map(SecretString::from),
        max_connections,
        min_idle,
        connect_timeout: Duration::from_millis(
            config.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
        ),
        closed: AtomicBool::new(false),
    })
}
