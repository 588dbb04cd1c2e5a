//! Logging configuration

mod presets;

pub use presets::Preset;

use serde::{Deserialize, Serialize};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Level filter directives (e.g. "info", "debug,hinny_config=trace")
    pub level: String,

    /// Output format
    pub format: Format,

    /// Where lines go
    pub writer: Writer,

    /// Display toggles
    pub display: DisplayConfig,

    /// Service name attached to a root span, if set
    pub service: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: Format::Compact,
            writer: Writer::Stderr,
            display: DisplayConfig::default(),
            service: None,
        }
    }
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Human-readable, multi-line
    Pretty,
    /// Single line per event
    Compact,
    /// One JSON object per event
    Json,
}

impl std::str::FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Output stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Writer {
    /// Standard error
    #[default]
    Stderr,
    /// Standard output
    Stdout,
}

/// Display toggles
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Show timestamps
    pub time: bool,
    /// Show `file:line`
    pub source: bool,
    /// Show the target module
    pub target: bool,
    /// Show thread names
    pub thread_names: bool,
    /// Use ANSI colors (text formats only)
    pub colors: bool,
    /// Flatten event fields into the top-level JSON object
    pub flatten: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            time: true,
            source: false,
            target: true,
            thread_names: false,
            colors: true,
            flatten: false,
        }
    }
}
