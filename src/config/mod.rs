//! Configuration management for modhost
//!
//! Handles loader configuration loading, environment overrides and the
//! explicit module incompatibility list.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use crate::module::registry::manifest::Manifest;
use crate::utils::{env_bool, env_opt};

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter (e.g. "info", "modhost::module=debug")
    #[serde(default)]
    pub filter: Option<String>,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json_format: bool,
}

/// A module the host refuses to enable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncompatibleModule {
    /// Module namespace
    pub namespace: String,

    /// Semver requirement of the affected versions (None = every version)
    #[serde(default)]
    pub versions: Option<String>,
}

impl IncompatibleModule {
    /// Check whether this entry covers the given manifest
    pub fn matches(&self, manifest: &Manifest) -> bool {
        if self.namespace != manifest.namespace {
            return false;
        }

        let Some(requirement) = self.versions.as_deref() else {
            return true;
        };

        match (
            semver::VersionReq::parse(requirement),
            semver::Version::parse(&manifest.version),
        ) {
            (Ok(req), Ok(version)) => req.matches(&version),
            (Err(e), _) => {
                warn!(
                    "Ignoring incompatibility entry for {}: bad requirement {:?}: {}",
                    self.namespace, requirement, e
                );
                false
            }
            // A version we cannot parse cannot be proven compatible
            (Ok(_), Err(_)) => true,
        }
    }
}

/// Loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Root under which per-context native staging directories are created
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Root under which module data directories are created
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Developer mode: dispose failures are surfaced to the caller
    #[serde(default)]
    pub debug_enabled: bool,

    /// Skip dependency availability checks for every module
    #[serde(default)]
    pub ignore_dependency_checks: bool,

    /// Extension of code images inside packages
    #[serde(default = "default_image_extension")]
    pub image_extension: String,

    /// Extension of debug symbol side-streams
    #[serde(default = "default_symbols_extension")]
    pub symbols_extension: String,

    /// Language whose satellite images are never probed
    #[serde(default = "default_language")]
    pub default_language: String,

    /// Capabilities the host can hand to modules
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Modules the host refuses to enable
    #[serde(default)]
    pub incompatible: Vec<IncompatibleModule>,

    /// Logging configuration
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("data/modules/native")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/modules/data")
}

fn default_image_extension() -> String {
    "dll".to_string()
}

fn default_symbols_extension() -> String {
    "pdb".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            staging_dir: default_staging_dir(),
            data_dir: default_data_dir(),
            debug_enabled: false,
            ignore_dependency_checks: false,
            image_extension: default_image_extension(),
            symbols_extension: default_symbols_extension(),
            default_language: default_language(),
            capabilities: Vec::new(),
            incompatible: Vec::new(),
            logging: None,
        }
    }
}

impl LoaderConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Apply `MODHOST_*` environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(dir) = env_opt("MODHOST_STAGING_DIR") {
            self.staging_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_opt("MODHOST_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if env_bool("MODHOST_DEBUG") {
            self.debug_enabled = true;
        }
        if env_bool("MODHOST_IGNORE_DEPENDENCIES") {
            self.ignore_dependency_checks = true;
        }
        self
    }

    /// Check the explicit incompatibility list
    pub fn is_incompatible(&self, manifest: &Manifest) -> bool {
        self.incompatible.iter().any(|entry| entry.matches(manifest))
    }

    /// Image file name for a manifest package, appending the image extension when missing
    pub fn image_file_name(&self, package: &str) -> String {
        if has_extension(package, &self.image_extension) {
            package.to_string()
        } else {
            format!("{}.{}", package, self.image_extension)
        }
    }

    /// Symbol side-stream name for an image file name
    pub fn symbols_file_name(&self, image: &str) -> String {
        let stem = if has_extension(image, &self.image_extension) {
            &image[..image.len() - self.image_extension.len() - 1]
        } else {
            image
        };
        format!("{}.{}", stem, self.symbols_extension)
    }
}

fn has_extension(name: &str, extension: &str) -> bool {
    let suffix_len = extension.len() + 1;
    name.len() >= suffix_len
        && name.is_char_boundary(name.len() - suffix_len)
        && name[name.len() - suffix_len..].eq_ignore_ascii_case(&format!(".{}", extension))
}
