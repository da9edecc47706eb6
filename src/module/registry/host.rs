//! Reference module host
//!
//! `HostServices` implements the `ModuleHost` contract consumed by managers;
//! `ModuleRegistry` owns every registered manager and serializes all lifecycle
//! transitions behind one lock.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::LoaderConfig;
use crate::module::loader::ImageLoader;
use crate::module::manager::ModuleManager;
use crate::module::provider::ResourceProvider;
use crate::module::registry::dependencies::{enable_order, DependencyChecker, InstalledModules};
use crate::module::registry::manifest::Manifest;
use crate::module::registry::namespaces::NamespaceRegistry;
use crate::module::registry::settings::{MemorySettingsStore, SettingsStore};
use crate::module::traits::{ModuleError, ModuleHost, ModuleState};
use crate::module::validation::{ManifestValidator, ValidationResult};
use crate::utils::log_error;

/// Handle of a registered module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u64);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Receives lifecycle notifications
///
/// Called while the registry lock is held; listeners must not call back into
/// the registry.
pub trait ModuleEventListener: Send + Sync {
    fn module_enabled(&self, _manager: &ModuleManager) {}
    fn module_disabled(&self, _manager: &ModuleManager) {}
}

/// Services shared by every manager of a registry
pub struct HostServices {
    config: LoaderConfig,
    namespaces: Arc<NamespaceRegistry>,
    installed: InstalledModules,
    loader: Arc<dyn ImageLoader>,
    settings: Arc<dyn SettingsStore>,
    listeners: RwLock<Vec<Arc<dyn ModuleEventListener>>>,
    /// Registered managers per namespace
    registrations: Mutex<HashMap<String, usize>>,
}

impl HostServices {
    /// Services using the process-wide namespace registry and volatile settings
    pub fn new(config: LoaderConfig, loader: Arc<dyn ImageLoader>) -> Self {
        Self {
            config,
            namespaces: NamespaceRegistry::global(),
            installed: InstalledModules::new(),
            loader,
            settings: Arc::new(MemorySettingsStore::new()),
            listeners: RwLock::new(Vec::new()),
            registrations: Mutex::new(HashMap::new()),
        }
    }

    /// Use a specific namespace registry
    pub fn with_namespaces(mut self, namespaces: Arc<NamespaceRegistry>) -> Self {
        self.namespaces = namespaces;
        self
    }

    /// Use a specific settings store
    pub fn with_settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = settings;
        self
    }

    pub fn add_listener(&self, listener: Arc<dyn ModuleEventListener>) {
        self.listeners.write().push(listener);
    }

    pub fn installed(&self) -> &InstalledModules {
        &self.installed
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    pub fn namespace_registry(&self) -> &Arc<NamespaceRegistry> {
        &self.namespaces
    }

    fn listeners(&self) -> Vec<Arc<dyn ModuleEventListener>> {
        self.listeners.read().clone()
    }

    fn track_registration(&self, namespace: &str) {
        *self
            .registrations
            .lock()
            .entry(namespace.to_string())
            .or_default() += 1;
    }

    /// Drop one registration; true when none of the namespace remain
    fn release_registration(&self, namespace: &str) -> bool {
        let mut registrations = self.registrations.lock();
        match registrations.get_mut(namespace) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            _ => {
                registrations.remove(namespace);
                true
            }
        }
    }
}

impl ModuleHost for HostServices {
    fn config(&self) -> &LoaderConfig {
        &self.config
    }

    fn namespaces(&self) -> &NamespaceRegistry {
        &self.namespaces
    }

    fn dependency_checker(&self) -> &dyn DependencyChecker {
        &self.installed
    }

    fn image_loader(&self) -> Arc<dyn ImageLoader> {
        Arc::clone(&self.loader)
    }

    fn on_module_enabled(&self, manager: &ModuleManager) {
        let manifest = manager.manifest();
        self.installed.activate(&manifest.namespace, &manifest.version);
        for listener in self.listeners() {
            listener.module_enabled(manager);
        }
    }

    fn on_module_disabled(&self, manager: &ModuleManager) {
        self.installed.set_enabled(&manager.manifest().namespace, false);
        for listener in self.listeners() {
            listener.module_disabled(manager);
        }
    }

    fn save_settings(&self, namespace: &str, state: &ModuleState) -> anyhow::Result<()> {
        self.settings.save(namespace, state)
    }

    fn unregister_module(&self, namespace: &str) {
        if !self.release_registration(namespace) {
            debug!(
                "Other packages of {} remain registered, keeping its installed entry and state",
                namespace
            );
            return;
        }
        self.installed.remove(namespace);
        log_error(
            || self.settings.remove(namespace),
            &format!("Failed to remove saved state of {}", namespace),
        );
    }
}

impl fmt::Debug for HostServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostServices")
            .field("config", &self.config)
            .field("dirty_namespaces", &self.namespaces.len())
            .field("listeners", &self.listeners.read().len())
            .finish_non_exhaustive()
    }
}

/// Owner of every registered module manager
pub struct ModuleRegistry {
    services: Arc<HostServices>,
    modules: Mutex<BTreeMap<ModuleId, ModuleManager>>,
    next_id: AtomicU64,
}

impl ModuleRegistry {
    pub fn new(services: HostServices) -> Self {
        Self {
            services: Arc::new(services),
            modules: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn services(&self) -> &Arc<HostServices> {
        &self.services
    }

    pub fn add_listener(&self, listener: Arc<dyn ModuleEventListener>) {
        self.services.add_listener(listener);
    }

    /// Register a module package
    ///
    /// The manifest is validated first. Without an explicit `state` the saved
    /// state is loaded from the settings store (default when none was saved).
    pub fn register(
        &self,
        manifest: Manifest,
        state: Option<ModuleState>,
        provider: Arc<dyn ResourceProvider>,
    ) -> Result<ModuleId, ModuleError> {
        if let ValidationResult::Invalid(errors) = ManifestValidator::new().validate(&manifest) {
            return Err(ModuleError::InvalidManifest(format!(
                "{}: {}",
                manifest.detailed_name(),
                errors.join("; ")
            )));
        }

        let state = match state {
            Some(state) => state,
            None => log_error(
                || self.services.settings.load(&manifest.namespace),
                &format!("Failed to load saved state of {}", manifest.detailed_name()),
            )
            .flatten()
            .unwrap_or_default(),
        };

        self.services
            .installed
            .install(&manifest.namespace, &manifest.version);
        self.services.track_registration(&manifest.namespace);

        let id = ModuleId(self.next_id.fetch_add(1, Ordering::SeqCst));
        info!(
            "Registered module {} as {} from {}",
            manifest.detailed_name(),
            id,
            provider.describe()
        );

        let host: Arc<dyn ModuleHost> = self.services.clone();
        let manager = ModuleManager::new(manifest, state, provider, host);
        self.modules.lock().insert(id, manager);
        Ok(id)
    }

    pub fn enable(&self, id: ModuleId) -> Result<(), ModuleError> {
        let mut modules = self.modules.lock();
        let manager = modules
            .get_mut(&id)
            .ok_or_else(|| ModuleError::ModuleNotFound(id.to_string()))?;
        manager.enable()
    }

    pub fn disable(&self, id: ModuleId) -> Result<(), ModuleError> {
        let mut modules = self.modules.lock();
        let manager = modules
            .get_mut(&id)
            .ok_or_else(|| ModuleError::ModuleNotFound(id.to_string()))?;
        manager.disable()
    }

    /// Disable, unregister and delete a module's package
    pub fn delete(&self, id: ModuleId) -> Result<(), ModuleError> {
        let mut modules = self.modules.lock();
        let mut manager = modules
            .remove(&id)
            .ok_or_else(|| ModuleError::ModuleNotFound(id.to_string()))?;
        manager.delete()
    }

    /// Drop every manager of a namespace (enabled ones are disabled first)
    ///
    /// Returns the number of managers removed.
    pub fn unregister(&self, namespace: &str) -> usize {
        let mut modules = self.modules.lock();
        let ids: Vec<ModuleId> = modules
            .iter()
            .filter(|(_, manager)| manager.manifest().namespace == namespace)
            .map(|(id, _)| *id)
            .collect();

        for id in &ids {
            if let Some(mut manager) = modules.remove(id) {
                log_error(
                    || manager.disable(),
                    &format!("Failed to disable {} while unregistering", namespace),
                );
            }
        }
        self.services.installed.remove(namespace);
        self.services.registrations.lock().remove(namespace);

        debug!("Unregistered {} managers of {}", ids.len(), namespace);
        ids.len()
    }

    /// Enable every module whose saved state says enabled, dependencies first
    ///
    /// Individual failures are logged; returns the number of modules enabled.
    /// Fails only on dependency cycles.
    pub fn restore_enabled(&self) -> Result<usize, ModuleError> {
        let mut modules = self.modules.lock();

        let manifests: Vec<Manifest> = modules
            .values()
            .filter(|manager| manager.state().enabled && !manager.is_enabled())
            .map(|manager| manager.manifest().clone())
            .collect();
        let order = enable_order(&manifests.iter().collect::<Vec<_>>())?;

        let mut enabled = 0;
        for namespace in order {
            for manager in modules.values_mut() {
                if manager.manifest().namespace == namespace
                    && manager.state().enabled
                    && !manager.is_enabled()
                    && manager.try_enable()
                {
                    enabled += 1;
                }
            }
        }

        info!("Restored {} enabled modules", enabled);
        Ok(enabled)
    }

    /// Disable every enabled module
    pub fn disable_all(&self) {
        let mut modules = self.modules.lock();
        for manager in modules.values_mut() {
            if let Err(e) = manager.disable() {
                warn!("{}", e);
            }
        }
    }

    pub fn is_explicitly_incompatible(&self, manifest: &Manifest) -> bool {
        self.services.is_explicitly_incompatible(manifest)
    }

    /// Currently enabled modules
    pub fn enabled_modules(&self) -> Vec<(ModuleId, Manifest)> {
        self.modules
            .lock()
            .iter()
            .filter(|(_, manager)| manager.is_enabled())
            .map(|(id, manager)| (*id, manager.manifest().clone()))
            .collect()
    }

    pub fn module_ids(&self) -> Vec<ModuleId> {
        self.modules.lock().keys().copied().collect()
    }

    /// Run a closure against one manager under the registry lock
    pub fn with_module<R>(&self, id: ModuleId, f: impl FnOnce(&mut ModuleManager) -> R) -> Option<R> {
        self.modules.lock().get_mut(&id).map(f)
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("services", &self.services)
            .field("modules", &self.modules.lock().len())
            .finish()
    }
}
