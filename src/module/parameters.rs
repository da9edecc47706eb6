//! Parameters handed to a module entry point

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::module::context::DependencyResolver;
use crate::module::registry::manifest::Manifest;
use crate::module::sandbox::FileSystemSandbox;
use crate::module::traits::{ModuleError, ModuleHost, ModuleState};

/// Everything a module receives when it is composed
#[derive(Debug, Clone)]
pub struct ModuleParameters {
    /// Manifest of the module being composed
    pub manifest: Arc<Manifest>,
    /// Copy of the module's user settings
    pub settings: BTreeMap<String, String>,
    /// Data directories created for the module, keyed by requested name
    pub data_directories: BTreeMap<String, PathBuf>,
    /// Host capabilities granted to the module
    pub capabilities: Vec<String>,
    resolver: Option<DependencyResolver>,
}

impl ModuleParameters {
    /// Bare parameters with no settings, directories or capabilities
    pub fn new(manifest: Arc<Manifest>) -> Self {
        Self {
            manifest,
            settings: BTreeMap::new(),
            data_directories: BTreeMap::new(),
            capabilities: Vec::new(),
            resolver: None,
        }
    }

    /// Build parameters for enabling a module
    ///
    /// Every capability the manifest requires must be provided by the host.
    /// Requested data directories are created below
    /// `<data_dir>/<namespace>/`.
    pub fn build_from_manifest(
        manifest: &Arc<Manifest>,
        state: &ModuleState,
        host: &dyn ModuleHost,
    ) -> Result<Self, ModuleError> {
        if let Some(missing) = manifest
            .capabilities
            .iter()
            .find(|capability| !host.provides_capability(capability))
        {
            return Err(ModuleError::MissingCapability {
                module: manifest.detailed_name(),
                capability: missing.clone(),
            });
        }

        let mut params = Self::new(Arc::clone(manifest));
        params.settings = state.settings.clone();
        params.capabilities = manifest.capabilities.clone();

        if !manifest.directories.is_empty() {
            let module_root = FileSystemSandbox::new(&host.config().data_dir)
                .resolve(&manifest.namespace)
                .map_err(|e| ModuleError::InvalidManifest(e.to_string()))?;
            let sandbox = FileSystemSandbox::new(module_root);

            for directory in &manifest.directories {
                let path = sandbox
                    .resolve(directory)
                    .map_err(|e| ModuleError::InvalidManifest(e.to_string()))?;
                fs::create_dir_all(&path)?;
                debug!(
                    "Prepared data directory {} for {} at {:?}",
                    directory,
                    manifest.detailed_name(),
                    path
                );
                params.data_directories.insert(directory.clone(), path);
            }
        }

        Ok(params)
    }

    /// Attach the resolver of the context composing the module
    pub fn with_resolver(mut self, resolver: DependencyResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Resolver of the owning load context, for late dependency requests
    pub fn resolver(&self) -> Option<&DependencyResolver> {
        self.resolver.as_ref()
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    pub fn data_directory(&self, name: &str) -> Option<&Path> {
        self.data_directories.get(name).map(PathBuf::as_path)
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}
