//! Module system traits and interfaces
//!
//! Defines the entry-point trait modules implement, the host contract the
//! manager consumes, persisted module state and the error types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::LoaderConfig;
use crate::module::classifier::ImageKind;
use crate::module::loader::ImageLoader;
use crate::module::manager::ModuleManager;
use crate::module::registry::dependencies::DependencyChecker;
use crate::module::registry::manifest::Manifest;
use crate::module::registry::namespaces::NamespaceRegistry;

/// Module lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Module is not loaded
    Disabled,
    /// Module image is being loaded and composed
    Enabling,
    /// Module instance is live
    Enabled,
    /// Module instance is being disposed and its context unloaded
    Disabling,
}

/// Persisted per-module record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleState {
    /// Whether the module was enabled when state was last saved
    #[serde(default)]
    pub enabled: bool,
    /// User override: enable even if dependencies are unavailable
    #[serde(default)]
    pub ignore_dependencies: bool,
    /// Module user settings forwarded into `ModuleParameters`
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

/// Entry-point object of a loaded module package
///
/// Instances are produced by the package's registered entry point and are
/// owned exclusively by their `ModuleManager`. Hooks may fail or panic; both
/// are contained by the manager.
pub trait Module: Send {
    /// Display name used in diagnostics
    fn name(&self) -> &str;

    /// Called once after composition, before `load`
    fn initialize(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called after `initialize`; the module is considered running afterwards
    fn load(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called when the module is disabled, before its load context unloads
    fn dispose(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Host services consumed by `ModuleManager`
///
/// Only `config`, `namespaces`, `dependency_checker` and `image_loader` are
/// required; the remaining hooks default to the behavior of a host with no
/// listeners and no persistent settings.
pub trait ModuleHost: Send + Sync {
    /// Loader configuration
    fn config(&self) -> &LoaderConfig;

    /// Process-wide dirty namespace registry
    fn namespaces(&self) -> &NamespaceRegistry;

    /// Dependency availability checker
    fn dependency_checker(&self) -> &dyn DependencyChecker;

    /// Loader turning image bytes into code images
    fn image_loader(&self) -> Arc<dyn ImageLoader>;

    /// Host denylist
    fn is_explicitly_incompatible(&self, manifest: &Manifest) -> bool {
        self.config().is_incompatible(manifest)
    }

    /// Whether the host can supply a named capability to modules
    fn provides_capability(&self, capability: &str) -> bool {
        self.config().capabilities.iter().any(|c| c == capability)
    }

    /// Fired once per successful enable, after state was persisted
    fn on_module_enabled(&self, _manager: &ModuleManager) {}

    /// Fired once per disable, after state was persisted
    fn on_module_disabled(&self, _manager: &ModuleManager) {}

    /// Persist a module's state (best effort)
    fn save_settings(&self, _namespace: &str, _state: &ModuleState) -> anyhow::Result<()> {
        Ok(())
    }

    /// Forget a deleted module
    fn unregister_module(&self, _namespace: &str) {}
}

/// Errors raised while composing a module instance
#[derive(Debug, Error)]
pub enum CompositionError {
    #[error("Image {0} has no module entry point")]
    NoEntryPoint(String),

    #[error("Image {0} is not registered with the image loader")]
    Unregistered(String),

    #[error("Entry point failed: {0:#}")]
    EntryPoint(anyhow::Error),

    #[error("Panicked during composition: {0}")]
    Panicked(String),
}

/// Load context errors
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Asset {0} is missing from the module package")]
    AssetMissing(String),

    #[error("Image {name} is not loadable ({kind:?})")]
    MalformedImage { name: String, kind: ImageKind },

    #[error("Image {image} requires dependency {dependency} which could not be resolved")]
    DependencyMissing { image: String, dependency: String },

    #[error("Image {image} requires native library {library} which could not be resolved")]
    NativeMissing { image: String, library: String },

    #[error("Composition failed: {0}")]
    Composition(#[from] CompositionError),

    #[error("Load context has been unloaded")]
    Unloaded,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Module system errors
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Module asset missing: {0}")]
    AssetMissing(String),

    #[error("Malformed module image: {0}")]
    MalformedImage(String),

    #[error("Module composition failed: {0}")]
    CompositionFailure(String),

    #[error("Module namespace {namespace} already loaded at version {loaded}, refusing version {requested}")]
    VersionConflict {
        namespace: String,
        loaded: String,
        requested: String,
    },

    #[error("Module dependency unmet: {0}")]
    DependencyUnmet(String),

    #[error("Module {module} failed in {hook}: {message}")]
    HookFailed {
        module: String,
        hook: &'static str,
        message: String,
    },

    #[error("Module {0} is already enabled")]
    AlreadyEnabled(String),

    #[error("Module {0} is explicitly incompatible with this host")]
    ExplicitlyIncompatible(String),

    #[error("Module {module} requires host capability {capability}")]
    MissingCapability { module: String, capability: String },

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Invalid module manifest: {0}")]
    InvalidManifest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LoadError> for ModuleError {
    fn from(e: LoadError) -> Self {
        match e {
            LoadError::AssetMissing(asset) => ModuleError::AssetMissing(asset),
            malformed @ LoadError::MalformedImage { .. } => {
                ModuleError::MalformedImage(malformed.to_string())
            }
            LoadError::Io(io) => ModuleError::Io(io),
            other => ModuleError::CompositionFailure(other.to_string()),
        }
    }
}
