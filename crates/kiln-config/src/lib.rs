//! `kiln.toml` loading, discovery and logging setup.
//!
//! Every section and key is optional:
//!
//! ```toml
//! [paths]
//! source_dir = "Source"
//! cooked_dir = "Data/Content"
//!
//! [cook]
//! process_one_to_one_versions = true
//!
//! [logging]
//! level = "kiln.cook=debug,info"
//! json = false
//! stderr = true
//! file = "kiln.log"
//! ```
//!
//! Unknown keys are not an error. They are logged and returned in [`ConfigDiagnostics`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod diagnostics;
mod logging;

pub use diagnostics::ConfigDiagnostics;
pub use logging::{init_tracing, LoggingConfig};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KilnConfig {
    pub paths: PathsConfig,
    pub cook: CookConfig,
    pub logging: LoggingConfig,
}

/// Where the two trees live. Relative entries hang off the directory holding the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub source_dir: PathBuf,
    pub cooked_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("Source"),
            cooked_dir: Path::new("Data").join("Content"),
        }
    }
}

impl PathsConfig {
    /// Absolute entries are returned unchanged.
    pub fn source_dir(&self, base: &Path) -> PathBuf {
        base.join(&self.source_dir)
    }

    pub fn cooked_dir(&self, base: &Path) -> PathBuf {
        base.join(&self.cooked_dir)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookConfig {
    /// Run the version gate over the cooked tree when a cook environment opens.
    pub process_one_to_one_versions: bool,
}

impl Default for CookConfig {
    fn default() -> Self {
        Self {
            process_one_to_one_versions: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// Carries only the parser message, never the offending line.
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Toml(err.message().to_owned())
    }
}

impl KilnConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let (config, _) = Self::load_from_path_with_diagnostics(path)?;
        Ok(config)
    }

    /// Like [`KilnConfig::load_from_path`], also returning the keys that were ignored.
    pub fn load_from_path_with_diagnostics(
        path: impl AsRef<Path>,
    ) -> Result<(Self, ConfigDiagnostics), ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let loaded = Self::load_from_str_with_diagnostics(&text)?;
        for key in &loaded.1.unknown_keys {
            tracing::warn!(
                target: "kiln.config",
                path = %path.display(),
                key = %key,
                "ignoring unknown config key"
            );
        }
        Ok(loaded)
    }

    pub fn load_from_str_with_diagnostics(
        text: &str,
    ) -> Result<(Self, ConfigDiagnostics), ConfigError> {
        let (config, unknown_keys) = diagnostics::deserialize_toml_with_unknown_keys(text)?;
        Ok((config, ConfigDiagnostics { unknown_keys }))
    }
}

/// Names a config file explicitly, bypassing the workspace files.
pub const KILN_CONFIG_ENV_VAR: &str = "KILN_CONFIG_PATH";

const WORKSPACE_CONFIG_FILES: [&str; 2] = ["kiln.toml", ".kiln.toml"];

/// Finds the config file for `workspace_root`.
///
/// `KILN_CONFIG_PATH` wins when set, even if the file it names does not exist, and may be
/// relative to the root. Otherwise the first existing of `kiln.toml` and `.kiln.toml` is used.
/// Found paths are canonicalized when possible.
pub fn discover_config_path(workspace_root: &Path) -> Option<PathBuf> {
    let found = match std::env::var_os(KILN_CONFIG_ENV_VAR) {
        Some(value) => workspace_root.join(value),
        None => WORKSPACE_CONFIG_FILES
            .iter()
            .map(|name| workspace_root.join(name))
            .find(|candidate| candidate.is_file())?,
    };
    Some(found.canonicalize().unwrap_or(found))
}

/// Loads the discovered config for `workspace_root`, with its path.
///
/// A workspace without a config file gets [`KilnConfig::default`].
pub fn load_for_workspace(
    workspace_root: &Path,
) -> Result<(KilnConfig, Option<PathBuf>), ConfigError> {
    match discover_config_path(workspace_root) {
        Some(path) => Ok((KilnConfig::load_from_path(&path)?, Some(path))),
        None => Ok((KilnConfig::default(), None)),
    }
}
