//! Error types for registries and pooling
use thiserror::Error;

/// Result type for resource operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed source error carried by factory and release failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by registries and the instance pool
#[derive(Error, Debug)]
pub enum Error {
    /// Startup configuration is invalid (missing default, blank name, bad pool sizing)
    #[error("Configuration error: {message}")]
    Configuration {
        /// The error message
        message: String,
    },

    /// A resource with this name is already registered
    #[error("Duplicate {family} resource name '{name}'")]
    DuplicateName {
        /// The resource family (e.g. "datasource")
        family: String,
        /// The colliding name
        name: String,
    },

    /// No resource is registered under this name
    #[error("Unknown {family} resource '{name}'")]
    UnknownName {
        /// The resource family
        family: String,
        /// The requested name
        name: String,
    },

    /// The registry has no default resource
    #[error("No default {family} resource is configured")]
    NoDefault {
        /// The resource family
        family: String,
    },

    /// Every instance is busy and the wait budget ran out
    #[error("Pool '{pool_id}' exhausted: {active}/{max_total} busy, waited {waited_ms}ms")]
    PoolExhausted {
        /// The pool identifier
        pool_id: String,
        /// Busy instances at the time of failure
        active: usize,
        /// Configured upper bound
        max_total: usize,
        /// How long the caller waited before giving up
        waited_ms: u64,
    },

    /// The factory failed to build a new instance during a borrow
    #[error("Pool '{pool_id}' failed to create an instance: {reason}")]
    PoolCreate {
        /// The pool identifier
        pool_id: String,
        /// The failure reason
        reason: String,
        /// The underlying error
        #[source]
        source: Option<BoxError>,
    },

    /// The pool was closed
    #[error("Pool '{pool_id}' is closed")]
    PoolClosed {
        /// The pool identifier
        pool_id: String,
    },

    /// Releasing a registry entry failed
    #[error("Failed to release {family} resource '{name}': {reason}")]
    Release {
        /// The resource family
        family: String,
        /// The resource name
        name: String,
        /// The failure reason
        reason: String,
    },
}

impl Error {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a pool-create error from a factory failure
    pub fn pool_create(pool_id: impl Into<String>, source: impl Into<BoxError>) -> Self {
        let source = source.into();
        Self::PoolCreate {
            pool_id: pool_id.into(),
            reason: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a release error
    pub fn release(
        family: impl Into<String>,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Release {
            family: family.into(),
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the same operation later may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }

    /// Whether this error should abort startup
    #[must_use]
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. }
                | Self::DuplicateName { .. }
                | Self::UnknownName { .. }
                | Self::NoDefault { .. }
        )
    }
}
