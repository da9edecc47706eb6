//! Module manifest parsing
//!
//! Handles parsing `module.toml` manifests.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::module::traits::ModuleError;

/// A dependency on another module namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDependency {
    /// Namespace of the required module
    pub namespace: String,
    /// Semver requirement on the required module's version
    #[serde(default = "any_version")]
    pub version: String,
}

fn any_version() -> String {
    "*".to_string()
}

impl ModuleDependency {
    pub fn new(namespace: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            version: version.into(),
        }
    }
}

/// Module manifest (module.toml structure)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Module identity, shared by every version of the module
    pub namespace: String,
    /// Human-readable name
    pub name: String,
    /// Module version (semantic versioning)
    pub version: String,
    /// Primary image file name (extension optional)
    pub package: String,
    /// Required modules
    #[serde(default)]
    pub dependencies: Vec<ModuleDependency>,
    /// Host capabilities the module requires
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Data directories the host creates for the module
    #[serde(default)]
    pub directories: Vec<String>,
    /// Human-readable description
    #[serde(default)]
    pub description: Option<String>,
    /// Module author
    #[serde(default)]
    pub author: Option<String>,
}

impl Manifest {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        package: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            version: version.into(),
            package: package.into(),
            dependencies: Vec::new(),
            capabilities: Vec::new(),
            directories: Vec::new(),
            description: None,
            author: None,
        }
    }

    /// Builder-style dependency declaration
    pub fn with_dependency(mut self, namespace: impl Into<String>, version: impl Into<String>) -> Self {
        self.dependencies.push(ModuleDependency::new(namespace, version));
        self
    }

    /// Builder-style capability requirement
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    /// Builder-style data directory request
    pub fn with_directory(mut self, directory: impl Into<String>) -> Self {
        self.directories.push(directory.into());
        self
    }

    /// Parse a manifest from TOML
    pub fn from_toml_str(contents: &str) -> Result<Self, ModuleError> {
        let manifest: Manifest = toml::from_str(contents).map_err(|e| {
            ModuleError::InvalidManifest(format!("Failed to parse manifest TOML: {}", e))
        })?;

        if manifest.namespace.is_empty() {
            return Err(ModuleError::InvalidManifest(
                "Module namespace cannot be empty".to_string(),
            ));
        }
        if manifest.package.is_empty() {
            return Err(ModuleError::InvalidManifest(
                "Module package cannot be empty".to_string(),
            ));
        }

        Ok(manifest)
    }

    /// Load manifest from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ModuleError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ModuleError::InvalidManifest(format!("Failed to read manifest file: {}", e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Name used in diagnostics: `name (namespace) vversion`
    pub fn detailed_name(&self) -> String {
        format!("{} ({}) v{}", self.name, self.namespace, self.version)
    }
}
