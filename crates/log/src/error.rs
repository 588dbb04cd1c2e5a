//! Logger errors

use thiserror::Error;

/// Result type for logger setup
pub type LogResult<T> = Result<T, LogError>;

/// Errors raised while installing the global subscriber
#[derive(Debug, Error)]
pub enum LogError {
    /// The level filter string did not parse
    #[error("Invalid filter '{filter}': {message}")]
    Filter {
        /// The rejected directive string
        filter: String,
        /// Parser message
        message: String,
    },

    /// A global subscriber is already installed
    #[error("Failed to install logger: {0}")]
    Init(String),
}
