//! # hinny-log
//!
//! Structured logging setup for hinny binaries and tests, built on
//! `tracing-subscriber`. Library crates only use the `tracing` macros; the
//! binary installs a subscriber once through this crate.
//!
//! ```no_run
//! let _guard = hinny_log::init().expect("logger");
//! tracing::info!(port = 8080, "serving");
//! ```

#![forbid(unsafe_code)]

mod builder;
mod config;
mod error;

pub use builder::{LoggerBuilder, LoggerGuard};
pub use config::{Config, DisplayConfig, Format, Preset, Writer};
pub use error::{LogError, LogResult};

/// Pick a configuration from the environment and build type.
///
/// `HINNY_LOG`, `HINNY_LOG_PRESET` or `RUST_LOG` selects
/// [`Config::from_env`]; otherwise debug
/// builds get [`Config::development`] and release builds
/// [`Config::production`].
pub fn auto_init() -> LogResult<LoggerGuard> {
    let configured = ["HINNY_LOG", "HINNY_LOG_PRESET", "RUST_LOG"]
        .iter()
        .any(|key| std::env::var_os(key).is_some());
    if configured {
        init_with(Config::from_env())
    } else if cfg!(debug_assertions) {
        init_with(Config::development())
    } else {
        init_with(Config::production())
    }
}

/// Initialize with configuration read from the environment
pub fn init() -> LogResult<LoggerGuard> {
    init_with(Config::from_env())
}

/// Initialize with custom configuration
pub fn init_with(config: Config) -> LogResult<LoggerGuard> {
    LoggerBuilder::from_config(config).build()
}

/// Initialize for tests; safe to call from every test.
///
/// Output goes through the test harness capture. Later calls, or calls after
/// another subscriber was installed, are no-ops.
pub fn init_test() -> LoggerGuard {
    let filter = std::env::var("HINNY_LOG").unwrap_or_else(|_| Config::test().level);
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .without_time()
        .try_init();
    LoggerGuard::noop()
}
