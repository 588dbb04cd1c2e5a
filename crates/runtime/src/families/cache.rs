//! Key-value cache clients.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use hinny_config::impl_merge;
use hinny_config::merge::NamedConfig;
use hinny_resource::{BoxError, Error, Release};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use super::redacted;

/// Registry family name.
pub const FAMILY: &str = "cache";

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 6379;
const DEFAULT_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_POOL_SIZE: u32 = 8;

/// Cache client settings; every field inherits from the family template when unset.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<u8>,
    pub password: Option<String>,
    pub timeout_ms: Option<u64>,
    pub pool_size: Option<u32>,
}

impl_merge!(CacheConfig {
    name,
    host,
    port,
    database,
    password,
    timeout_ms,
    pool_size,
});

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("password", &redacted(self.password.as_ref()))
            .field("timeout_ms", &self.timeout_ms)
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

impl NamedConfig for CacheConfig {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn set_name(&mut self, name: String) {
        self.name = Some(name);
    }
}

/// Handle to one cache endpoint.
#[derive(Debug)]
pub struct CacheClient {
    name: String,
    host: String,
    port: u16,
    database: u8,
    password: Option<SecretString>,
    timeout: Duration,
    pool_size: u32,
    closed: AtomicBool,
}

impl CacheClient {
    /// A client for `host:port`, database 0, default timeouts.
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            database: 0,
            password: None,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            pool_size: DEFAULT_POOL_SIZE,
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connection string without credentials, e.g. `redis://127.0.0.1:6379/0`.
    pub fn endpoint(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.database)
    }

    pub fn database(&self) -> u8 {
        self.database
    }

    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn pool_size(&self) -> u32 {
        self.pool_size
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Release for CacheClient {
    async fn release(&self) -> Result<(), BoxError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(format!("cache client {} already closed", self.name).into());
        }
        tracing::debug!(name = %self.name, endpoint = %self.endpoint(), "cache client closed");
        Ok(())
    }
}

/// Build a cache client from its effective config.
pub fn build(key: &str, config: CacheConfig) -> hinny_resource::Result<CacheClient> {
    let host = config
        .host
        .filter(|host| !host.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_HOST.to_owned());
    let port = config.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(Error::configuration(format!("cache '{key}': port must not be 0")));
    }
    let database = config.database.unwrap_or(0);
    if database > 15 {
        return Err(Error::configuration(format!(
            "cache '{key}': database index {database} is out of range 0..=15"
        )));
    }
    let pool_size = config.pool_size.unwrap_or(DEFAULT_POOL_SIZE);
    if pool_size == 0 {
        return Err(Error::configuration(format!("cache '{key}': pool_size must be greater than 0")));
    }

    Ok(CacheClient {
        name: config.name.unwrap_or_else(|| key.to_owned()),
        host,
        port,
        database,
        password: config.password.map(SecretString::from),
        timeout: Duration::from_millis(config.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)),
        pool_size,
        closed: AtomicBool::new(false),
    })
}
