//! Runtime error types.

use hinny_config::ConfigError;

/// Boxed error returned by script handlers and parsers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors from the runtime layer.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A registry or the instance pool failed.
    #[error(transparent)]
    Resource(#[from] hinny_resource::Error),

    /// Script or mapper content could not be listed or read.
    #[error("content error at {path}: {message}")]
    Content {
        /// Path relative to the content root (or the root itself).
        path: String,
        /// What went wrong.
        message: String,
    },

    /// A single mapper file failed to reload; the previous version stays.
    #[error("failed to reload {path}: {message}")]
    Reload {
        /// The mapper file.
        path: String,
        /// Parser message.
        message: String,
    },

    /// No prefix mapping or suffix matched the request path.
    #[error("no script route for request path {path}")]
    NoRoute {
        /// The request path.
        path: String,
    },

    /// A script handler failed.
    #[error("script {script} failed: {message}")]
    Handler {
        /// Resolved script path.
        script: String,
        /// Handler message.
        message: String,
    },
}

impl RuntimeError {
    /// Create a content error.
    pub fn content(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Content {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Whether retrying later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Resource(e) => e.is_retryable(),
            _ => false,
        }
    }
}
