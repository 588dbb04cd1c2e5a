//! Configuration error types

use std::path::PathBuf;

use thiserror::Error;

/// Standard result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration error type
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Layered loading or extraction failed
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// A loaded value violates a constraint
    #[error("Invalid configuration: {message}")]
    Invalid {
        /// Description of the violation
        message: String,
        /// Dotted path of the offending field, when known
        field: Option<String>,
    },

    /// A watcher could not be built or controlled
    #[error("Watch error: {message}")]
    Watch {
        /// Description of the failure
        message: String,
    },

    /// Filesystem access failed
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Create an invalid-configuration error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
            field: None,
        }
    }

    /// Create an invalid-configuration error pointing at a field
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a watch error
    pub fn watch(message: impl Into<String>) -> Self {
        Self::Watch {
            message: message.into(),
        }
    }

    /// Create an I/O error bound to a path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}
