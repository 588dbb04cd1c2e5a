//! Named starting points for [`Config`]

use std::str::FromStr;

use super::{Config, DisplayConfig, Format};

/// Watcher scans log every poll at debug; keep them out of development noise.
const DEVELOPMENT_FILTER: &str = "debug,hinny_config::watchers=info";

/// A named logging setup, selectable through `HINNY_LOG_PRESET`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// Pretty output with source locations
    Development,
    /// Flattened JSON on stderr, info and above
    Production,
    /// Compact, colorless, untimed; everything down to trace
    Test,
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Development),
            "prod" | "production" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(format!("unknown log preset '{other}'")),
        }
    }
}

impl Config {
    /// Configuration for `preset`.
    #[must_use]
    pub fn preset(preset: Preset) -> Self {
        let (level, format, display) = match preset {
            Preset::Development => (
                DEVELOPMENT_FILTER,
                Format::Pretty,
                DisplayConfig {
                    source: true,
                    ..DisplayConfig::default()
                },
            ),
            Preset::Production => (
                "info",
                Format::Json,
                DisplayConfig {
                    colors: false,
                    flatten: true,
                    ..DisplayConfig::default()
                },
            ),
            Preset::Test => (
                "trace",
                Format::Compact,
                DisplayConfig {
                    time: false,
                    colors: false,
                    ..DisplayConfig::default()
                },
            ),
        };
        Self {
            level: level.to_owned(),
            format,
            display,
            ..Self::default()
        }
    }

    /// Read the environment.
    ///
    /// `HINNY_LOG_PRESET` picks the starting point (default settings when
    /// unset or unknown). `HINNY_LOG`, falling back to `RUST_LOG`, replaces
    /// the filter and `HINNY_LOG_FORMAT` the format. JSON never gets colors.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = std::env::var("HINNY_LOG_PRESET")
            .ok()
            .and_then(|name| name.parse().ok())
            .map_or_else(Self::default, Self::preset);

        if let Some(level) = std::env::var("HINNY_LOG")
            .ok()
            .or_else(|| std::env::var("RUST_LOG").ok())
        {
            config.level = level;
        }
        if let Some(format) = std::env::var("HINNY_LOG_FORMAT")
            .ok()
            .and_then(|f| f.parse().ok())
        {
            config.format = format;
        }
        if config.format == Format::Json {
            config.display.colors = false;
        }
        config
    }

    /// Shorthand for [`Preset::Development`]
    #[must_use]
    pub fn development() -> Self {
        Self::preset(Preset::Development)
    }

    /// Shorthand for [`Preset::Production`]
    #[must_use]
    pub fn production() -> Self {
        Self::preset(Preset::Production)
    }

    /// Shorthand for [`Preset::Test`]
    #[must_use]
    pub fn test() -> Self {
        Self::preset(Preset::Test)
    }

    /// Override the filter directives
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }
}
