//! Layered loading: defaults, then a TOML file, then environment variables.

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{ConfigError, ConfigResult};

/// Default prefix for environment overrides (`HINNY_POOL__MAX_TOTAL=4`).
pub const DEFAULT_ENV_PREFIX: &str = "HINNY_";

/// Builds a [`Figment`] from the standard layers and extracts a typed value.
///
/// Later layers win: struct defaults < TOML file < inline TOML < environment.
/// Nested keys in environment variables are separated by a double
/// underscore.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    required: bool,
    inline: Vec<String>,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self {
            file: None,
            required: false,
            inline: Vec::new(),
            env_prefix: Some(DEFAULT_ENV_PREFIX.to_owned()),
        }
    }
}

impl ConfigLoader {
    /// Loader with the default environment prefix and no file
    pub fn new() -> Self {
        Self::default()
    }

    /// Read this TOML file if it exists
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self.required = false;
        self
    }

    /// Read this TOML file, failing when it is missing
    pub fn with_required_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self.required = true;
        self
    }

    /// Layer a TOML document on top of the file
    pub fn with_toml(mut self, toml: impl Into<String>) -> Self {
        self.inline.push(toml.into());
        self
    }

    /// Change the environment prefix
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Ignore the environment entirely
    pub fn without_env(mut self) -> Self {
        self.env_prefix = None;
        self
    }

    /// The configured file, if any
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Assemble the layered figment for `T`'s defaults.
    pub fn figment<T: Serialize + Default>(&self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(T::default()));

        if let Some(path) = &self.file {
            if path.is_file() {
                tracing::debug!(path = %path.display(), "loading configuration file");
                figment = figment.merge(Toml::file(path));
            } else if self.required {
                return Err(ConfigError::io(
                    path.clone(),
                    std::io::Error::new(std::io::ErrorKind::NotFound, "configuration file not found"),
                ));
            } else {
                tracing::debug!(path = %path.display(), "configuration file absent, using defaults");
            }
        }

        for doc in &self.inline {
            figment = figment.merge(Toml::string(doc));
        }

        if let Some(prefix) = &self.env_prefix {
            figment = figment.merge(Env::prefixed(prefix).split("__"));
        }
        Ok(figment)
    }

    /// Load and extract `T`.
    pub fn load<T>(&self) -> ConfigResult<T>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        Ok(self.figment::<T>()?.extract()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Demo {
        root: String,
        watch: Watch,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Watch {
        enabled: bool,
        interval_ms: u64,
    }

    impl Default for Watch {
        fn default() -> Self {
            Self {
                enabled: true,
                interval_ms: 3000,
            }
        }
    }

    #[test]
    fn defaults_survive_without_sources() {
        let demo: Demo = ConfigLoader::new().without_env().load().unwrap();
        assert_eq!(demo, Demo::default());
    }

    #[test]
    fn inline_toml_overrides_defaults() {
        let demo: Demo = ConfigLoader::new()
            .without_env()
            .with_toml("root = \"scripts\"\n[watch]\ninterval_ms = 500\n")
            .load()
            .unwrap();
        assert_eq!(demo.root, "scripts");
        assert_eq!(demo.watch.interval_ms, 500);
        assert!(demo.watch.enabled);
    }

    #[test]
    fn file_then_inline_layering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hinny.toml");
        std::fs::write(&path, "root = \"from-file\"\n[watch]\nenabled = false\n").unwrap();

        let demo: Demo = ConfigLoader::new()
            .without_env()
            .with_file(&path)
            .with_toml("root = \"inline\"")
            .load()
            .unwrap();
        assert_eq!(demo.root, "inline");
        assert!(!demo.watch.enabled);
    }

    #[test]
    fn missing_optional_file_is_ignored() {
        let demo: Demo = ConfigLoader::new()
            .without_env()
            .with_file("/definitely/not/here.toml")
            .load()
            .unwrap();
        assert_eq!(demo, Demo::default());
    }

    #[test]
    fn missing_required_file_fails() {
        let err = ConfigLoader::new()
            .without_env()
            .with_required_file("/definitely/not/here.toml")
            .load::<Demo>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn type_mismatch_is_a_load_error() {
        let err = ConfigLoader::new()
            .without_env()
            .with_toml("[watch]\ninterval_ms = \"soon\"")
            .load::<Demo>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn environment_overrides_nested_keys() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("HINNYTEST_WATCH__INTERVAL_MS", "750");
            let demo: Demo = ConfigLoader::new()
                .with_env_prefix("HINNYTEST_")
                .with_toml("[watch]\ninterval_ms = 100")
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(demo.watch.interval_ms, 750);
            Ok(())
        });
    }
}
