//! Module manager for one module package
//!
//! Drives a module through Disabled -> Enabling -> Enabled -> Disabling ->
//! Disabled, owning the module's load context and live instance while it is
//! enabled and enforcing the dirty namespace rule across enable cycles.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::module::context::{LoadContext, ModuleGate};
use crate::module::parameters::ModuleParameters;
use crate::module::provider::ResourceProvider;
use crate::module::registry::dependencies::DependencyCheckResult;
use crate::module::registry::manifest::{Manifest, ModuleDependency};
use crate::module::traits::{LifecycleState, Module, ModuleError, ModuleHost, ModuleState};
use crate::utils::{log_error, panic_message};

#[derive(Debug, Clone, Copy)]
enum Hook {
    Initialize,
    Load,
    Dispose,
}

impl Hook {
    fn as_str(self) -> &'static str {
        match self {
            Hook::Initialize => "initialize",
            Hook::Load => "load",
            Hook::Dispose => "dispose",
        }
    }
}

/// Lifecycle owner of one module
pub struct ModuleManager {
    manifest: Arc<Manifest>,
    state: ModuleState,
    provider: Arc<dyn ResourceProvider>,
    host: Arc<dyn ModuleHost>,
    lifecycle: LifecycleState,
    gate: ModuleGate,
    /// Version the namespace was already dirty at when this manager was created
    dirty_at_creation: Option<String>,
    /// Present only while enabled
    context: Option<LoadContext>,
    /// Present only while enabled; dropped before `context` unloads
    module: Option<Box<dyn Module>>,
}

impl ModuleManager {
    /// Create a disabled manager
    pub fn new(
        manifest: Manifest,
        state: ModuleState,
        provider: Arc<dyn ResourceProvider>,
        host: Arc<dyn ModuleHost>,
    ) -> Self {
        let dirty_at_creation = host.namespaces().dirty_version(&manifest.namespace);
        if let Some(loaded) = &dirty_at_creation {
            warn!(
                "Namespace {} was already activated at {}, {} cannot be enabled in this process",
                manifest.namespace,
                loaded,
                manifest.detailed_name()
            );
        }
        Self {
            manifest: Arc::new(manifest),
            state,
            provider,
            host,
            lifecycle: LifecycleState::Disabled,
            gate: ModuleGate::new(),
            dirty_at_creation,
            context: None,
            module: None,
        }
    }

    /// Enable the module
    ///
    /// Preconditions are checked without touching the provider or persisting
    /// anything. Past them, state is persisted whatever the outcome and
    /// `on_module_enabled` fires only on full success.
    pub fn enable(&mut self) -> Result<(), ModuleError> {
        self.check_preconditions()?;

        info!("Enabling module {}", self.manifest.detailed_name());
        let result = self.enable_inner();
        self.persist_state();

        match result {
            Ok(()) => {
                info!("Module {} enabled", self.manifest.detailed_name());
                self.host.on_module_enabled(self);
                Ok(())
            }
            Err(e) => {
                error!(
                    "Failed to enable module {}: {}",
                    self.manifest.detailed_name(),
                    e
                );
                Err(e)
            }
        }
    }

    /// Enable the module, logging the failure reason
    pub fn try_enable(&mut self) -> bool {
        match self.enable() {
            Ok(()) => true,
            Err(ModuleError::AlreadyEnabled(_)) => {
                debug!("Module {} is already enabled", self.manifest.detailed_name());
                false
            }
            Err(e) => {
                warn!(
                    "Module {} was not enabled: {}",
                    self.manifest.detailed_name(),
                    e
                );
                false
            }
        }
    }

    fn check_preconditions(&self) -> Result<(), ModuleError> {
        if self.is_enabled() || self.module.is_some() {
            return Err(ModuleError::AlreadyEnabled(self.manifest.detailed_name()));
        }

        if let Some(loaded) = self.dirty_conflict() {
            return Err(ModuleError::VersionConflict {
                namespace: self.manifest.namespace.clone(),
                loaded,
                requested: self.manifest.version.clone(),
            });
        }

        if self.host.is_explicitly_incompatible(&self.manifest) {
            return Err(ModuleError::ExplicitlyIncompatible(
                self.manifest.detailed_name(),
            ));
        }

        if !self.dependencies_met() {
            let unmet: Vec<String> = self
                .dependency_report()
                .into_iter()
                .filter(|(_, result)| !result.is_available())
                .map(|(dependency, result)| {
                    format!("{} {} ({})", dependency.namespace, dependency.version, result)
                })
                .collect();
            return Err(ModuleError::DependencyUnmet(format!(
                "{} requires {}",
                self.manifest.detailed_name(),
                unmet.join(", ")
            )));
        }

        Ok(())
    }

    fn enable_inner(&mut self) -> Result<(), ModuleError> {
        let params =
            ModuleParameters::build_from_manifest(&self.manifest, &self.state, self.host.as_ref())?;

        let package = self.package_path();
        if !self.provider.exists(&package) {
            return Err(ModuleError::AssetMissing(package));
        }

        self.lifecycle = LifecycleState::Enabling;
        let context = LoadContext::new(
            &self.manifest,
            Arc::clone(&self.provider),
            self.host.image_loader(),
            self.gate.clone(),
            self.host.config(),
        );

        let module = match context.load(&package, params) {
            Ok(Some(module)) => module,
            Ok(None) => {
                self.lifecycle = LifecycleState::Disabled;
                context.unload();
                return Err(ModuleError::CompositionFailure(format!(
                    "{} produced no module instance",
                    package
                )));
            }
            Err(e) => {
                self.lifecycle = LifecycleState::Disabled;
                context.unload();
                return Err(e.into());
            }
        };

        self.host
            .namespaces()
            .mark_dirty(&self.manifest.namespace, &self.manifest.version);

        self.module = Some(module);
        self.context = Some(context);
        self.gate.open();
        self.lifecycle = LifecycleState::Enabled;

        let hooks = self
            .run_hook(Hook::Initialize)
            .and_then(|()| self.run_hook(Hook::Load));
        if let Err(e) = hooks {
            self.abort_enable();
            return Err(e);
        }

        Ok(())
    }

    /// Tear down after a failed lifecycle hook; the dirty mark stays
    fn abort_enable(&mut self) {
        self.gate.close();
        self.lifecycle = LifecycleState::Disabled;
        self.module = None;
        if let Some(context) = self.context.take() {
            context.unload();
        }
    }

    fn run_hook(&mut self, hook: Hook) -> Result<(), ModuleError> {
        let Some(module) = self.module.as_mut() else {
            return Ok(());
        };

        debug!("Running {} hook of {}", hook.as_str(), self.manifest.detailed_name());
        let outcome = catch_unwind(AssertUnwindSafe(|| match hook {
            Hook::Initialize => module.initialize(),
            Hook::Load => module.load(),
            Hook::Dispose => module.dispose(),
        }));

        let message = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => format!("{:#}", e),
            Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        };

        Err(ModuleError::HookFailed {
            module: self.manifest.detailed_name(),
            hook: hook.as_str(),
            message,
        })
    }

    /// Disable the module; a no-op when it is not enabled
    ///
    /// Dispose failures are logged and teardown always completes. With
    /// `debug_enabled` the failure is returned afterwards.
    pub fn disable(&mut self) -> Result<(), ModuleError> {
        if !self.is_enabled() {
            debug!(
                "Module {} is not enabled, nothing to disable",
                self.manifest.detailed_name()
            );
            return Ok(());
        }

        info!("Disabling module {}", self.manifest.detailed_name());
        self.lifecycle = LifecycleState::Disabling;
        self.gate.close();

        let disposed = self.run_hook(Hook::Dispose);
        if let Err(e) = &disposed {
            warn!("{}", e);
        }

        self.module = None;
        self.persist_state();
        self.lifecycle = LifecycleState::Disabled;
        self.host.on_module_disabled(self);

        if let Some(context) = self.context.take() {
            context.unload();
        }

        info!("Module {} disabled", self.manifest.detailed_name());

        match disposed {
            Err(e) if self.host.config().debug_enabled => Err(e),
            _ => Ok(()),
        }
    }

    /// Disable the module, unregister it and delete its package storage
    pub fn delete(&mut self) -> Result<(), ModuleError> {
        let disabled = self.disable();
        self.host.unregister_module(&self.manifest.namespace);
        self.provider.delete_root()?;
        info!(
            "Deleted module {} ({})",
            self.manifest.detailed_name(),
            self.provider.describe()
        );
        disabled
    }

    fn persist_state(&mut self) {
        self.state.enabled = self.is_enabled();
        log_error(
            || self.host.save_settings(&self.manifest.namespace, &self.state),
            &format!("Failed to save state of {}", self.manifest.detailed_name()),
        );
    }

    /// Whether every dependency is available (or checks are ignored)
    pub fn dependencies_met(&self) -> bool {
        if self.state.ignore_dependencies || self.host.config().ignore_dependency_checks {
            return true;
        }
        let checker = self.host.dependency_checker();
        self.manifest
            .dependencies
            .iter()
            .all(|dependency| checker.check(dependency).is_available())
    }

    /// Check result of every declared dependency
    pub fn dependency_report(&self) -> Vec<(ModuleDependency, DependencyCheckResult)> {
        let checker = self.host.dependency_checker();
        self.manifest
            .dependencies
            .iter()
            .map(|dependency| (dependency.clone(), checker.check(dependency)))
            .collect()
    }

    /// Whether this manager's package may no longer be activated
    ///
    /// True when another version of the namespace was activated, or when the
    /// namespace was already dirty before this manager existed (a replacement
    /// package, whatever its version).
    pub fn is_assembly_state_dirty(&self) -> bool {
        self.dirty_conflict().is_some()
    }

    /// Version that blocks this manager from enabling, if any
    fn dirty_conflict(&self) -> Option<String> {
        self.host
            .namespaces()
            .conflicts_with(&self.manifest.namespace, &self.manifest.version)
            .or_else(|| self.dirty_at_creation.clone())
    }

    /// Primary image file name inside the package
    pub fn package_path(&self) -> String {
        self.host.config().image_file_name(&self.manifest.package)
    }

    /// Override dependency checks for this module
    pub fn set_ignore_dependencies(&mut self, ignore: bool) {
        self.state.ignore_dependencies = ignore;
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn state(&self) -> &ModuleState {
        &self.state
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle
    }

    pub fn is_enabled(&self) -> bool {
        self.lifecycle == LifecycleState::Enabled
    }

    pub fn module(&self) -> Option<&dyn Module> {
        self.module.as_deref()
    }

    pub fn module_mut(&mut self) -> Option<&mut (dyn Module + 'static)> {
        self.module.as_deref_mut()
    }

    /// Load context of the current enable cycle
    pub fn context(&self) -> Option<&LoadContext> {
        self.context.as_ref()
    }

    pub fn context_generation(&self) -> Option<u64> {
        self.context.as_ref().map(LoadContext::generation)
    }

    pub fn provider(&self) -> &Arc<dyn ResourceProvider> {
        &self.provider
    }
}

impl fmt::Debug for ModuleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleManager")
            .field("module", &self.manifest.detailed_name())
            .field("lifecycle", &self.lifecycle)
            .field("generation", &self.context_generation())
            .finish()
    }
}

impl Drop for ModuleManager {
    fn drop(&mut self) {
        if self.is_enabled() {
            if let Err(e) = self.disable() {
                warn!(
                    "Failed to disable {} on drop: {}",
                    self.manifest.detailed_name(),
                    e
                );
            }
        }
    }
}
