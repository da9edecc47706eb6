//! Module registry tests
//!
//! Tests for the reference host: registration, serialized transitions,
//! listeners, dependency ordering and persistence.

use parking_lot::Mutex;
use std::sync::Arc;

use super::test_utils::*;
use modhost::{
    DependencyChecker, HostServices, IncompatibleModule, JsonSettingsStore, LoaderConfig, Manifest, MemoryProvider, ModuleError,
    ModuleEventListener, ModuleManager, ModuleRegistry, ModuleState, NamespaceRegistry,
    RegisteredImageLoader, SettingsStore,
};

#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<String>>,
}

impl ModuleEventListener for EventLog {
    fn module_enabled(&self, manager: &ModuleManager) {
        self.events
            .lock()
            .push(format!("enabled {}", manager.manifest().namespace));
    }

    fn module_disabled(&self, manager: &ModuleManager) {
        self.events
            .lock()
            .push(format!("disabled {}", manager.manifest().namespace));
    }
}

struct RegistryHarness {
    _temp_dir: tempfile::TempDir,
    registry: ModuleRegistry,
    counters: Arc<HookCounters>,
    log: Arc<EventLog>,
}

impl RegistryHarness {
    fn new() -> Self {
        Self::with_settings(None)
    }

    fn with_settings(settings: Option<Arc<dyn SettingsStore>>) -> Self {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = LoaderConfig {
            staging_dir: temp_dir.path().join("staging"),
            data_dir: temp_dir.path().join("data"),
            ..LoaderConfig::default()
        };

        let counters = Arc::new(HookCounters::default());
        let loader = Arc::new(RegisteredImageLoader::new());
        for image in ["Core.dll", "Overlay.dll", "Foo.dll"] {
            loader.register(image, mock_registration(&counters, Failure::None));
        }

        let mut services = HostServices::new(config, loader)
            .with_namespaces(Arc::new(NamespaceRegistry::new()));
        if let Some(settings) = settings {
            services = services.with_settings(settings);
        }

        let registry = ModuleRegistry::new(services);
        let log = Arc::new(EventLog::default());
        registry.add_listener(log.clone());

        Self {
            _temp_dir: temp_dir,
            registry,
            counters,
            log,
        }
    }

    fn package(image: &str) -> Arc<MemoryProvider> {
        Arc::new(MemoryProvider::new(image).with_file(format!("{}.dll", image), managed_image()))
    }

    fn events(&self) -> Vec<String> {
        self.log.events.lock().clone()
    }
}

fn core_manifest() -> Manifest {
    Manifest::new("org.example.core", "Core", "1.2.0", "Core")
}

fn overlay_manifest() -> Manifest {
    Manifest::new("org.example.overlay", "Overlay", "0.3.0", "Overlay")
        .with_dependency("org.example.core", "^1.0")
}

#[test]
fn test_register_rejects_invalid_manifest() {
    let harness = RegistryHarness::new();
    let manifest = Manifest::new("bad namespace", "Bad", "one", "Bad");

    let err = harness
        .registry
        .register(manifest, None, RegistryHarness::package("Bad"))
        .unwrap_err();
    assert!(matches!(err, ModuleError::InvalidManifest(ref m) if m.contains("Invalid version format")));
    assert!(harness.registry.module_ids().is_empty());
}

#[test]
fn test_enable_and_disable_through_registry() {
    let harness = RegistryHarness::new();
    let id = harness
        .registry
        .register(core_manifest(), None, RegistryHarness::package("Core"))
        .unwrap();

    harness.registry.enable(id).unwrap();
    let enabled = harness.registry.enabled_modules();
    assert_eq!(enabled.len(), 1);
    assert_eq!(enabled[0].0, id);
    assert_eq!(enabled[0].1.namespace, "org.example.core");
    assert!(harness
        .registry
        .services()
        .namespace_registry()
        .is_dirty("org.example.core"));

    harness.registry.disable(id).unwrap();
    assert!(harness.registry.enabled_modules().is_empty());
    assert_eq!(
        harness.events(),
        vec!["enabled org.example.core", "disabled org.example.core"]
    );
}

#[test]
fn test_unknown_module_id() {
    let harness = RegistryHarness::new();
    let id = harness
        .registry
        .register(core_manifest(), None, RegistryHarness::package("Core"))
        .unwrap();
    harness.registry.delete(id).unwrap();

    assert!(matches!(harness.registry.enable(id), Err(ModuleError::ModuleNotFound(_))));
    assert!(matches!(harness.registry.disable(id), Err(ModuleError::ModuleNotFound(_))));
    assert!(harness.registry.with_module(id, |m| m.is_enabled()).is_none());
}

#[test]
fn test_dependencies_follow_enabled_state() {
    let harness = RegistryHarness::new();
    let core = harness
        .registry
        .register(core_manifest(), None, RegistryHarness::package("Core"))
        .unwrap();
    let overlay = harness
        .registry
        .register(overlay_manifest(), None, RegistryHarness::package("Overlay"))
        .unwrap();

    assert!(matches!(
        harness.registry.enable(overlay),
        Err(ModuleError::DependencyUnmet(ref m)) if m.contains("not enabled")
    ));

    harness.registry.enable(core).unwrap();
    harness.registry.enable(overlay).unwrap();

    harness.registry.disable(core).unwrap();
    let report = harness
        .registry
        .with_module(overlay, |m| m.dependency_report())
        .unwrap();
    assert_eq!(report[0].1, modhost::DependencyCheckResult::AvailableNotEnabled);
}

#[test]
fn test_restore_enabled_orders_dependencies_first() {
    let harness = RegistryHarness::new();
    let enabled = ModuleState {
        enabled: true,
        ..ModuleState::default()
    };

    harness
        .registry
        .register(overlay_manifest(), Some(enabled.clone()), RegistryHarness::package("Overlay"))
        .unwrap();
    harness
        .registry
        .register(core_manifest(), Some(enabled), RegistryHarness::package("Core"))
        .unwrap();
    harness
        .registry
        .register(
            Manifest::new("org.example.foo", "Foo", "1.0.0", "Foo"),
            None,
            RegistryHarness::package("Foo"),
        )
        .unwrap();

    assert_eq!(harness.registry.restore_enabled().unwrap(), 2);
    assert_eq!(
        harness.events(),
        vec!["enabled org.example.core", "enabled org.example.overlay"]
    );
    assert_eq!(HookCounters::get(&harness.counters.created), 2);

    harness.registry.disable_all();
    assert!(harness.registry.enabled_modules().is_empty());
}

#[test]
fn test_delete_unregisters_module() {
    let dir = tempfile::tempdir().unwrap();
    let settings: Arc<dyn SettingsStore> = Arc::new(JsonSettingsStore::new(dir.path()));
    let harness = RegistryHarness::with_settings(Some(settings.clone()));

    let id = harness
        .registry
        .register(core_manifest(), None, RegistryHarness::package("Core"))
        .unwrap();
    harness.registry.enable(id).unwrap();
    assert!(settings.load("org.example.core").unwrap().unwrap().enabled);

    harness.registry.delete(id).unwrap();
    assert!(harness.registry.module_ids().is_empty());
    assert!(settings.load("org.example.core").unwrap().is_none());
    assert!(!harness
        .registry
        .services()
        .installed()
        .is_installed("org.example.core"));
    assert_eq!(
        harness.events(),
        vec!["enabled org.example.core", "disabled org.example.core"]
    );
}

#[test]
fn test_registering_newer_version_keeps_enabled_dependency() {
    let harness = RegistryHarness::new();
    let core = harness
        .registry
        .register(core_manifest(), None, RegistryHarness::package("Core"))
        .unwrap();
    harness.registry.enable(core).unwrap();

    let mut newer = core_manifest();
    newer.version = "2.0.0".to_string();
    harness
        .registry
        .register(newer, None, RegistryHarness::package("Core"))
        .unwrap();

    let overlay = harness
        .registry
        .register(overlay_manifest(), None, RegistryHarness::package("Overlay"))
        .unwrap();
    harness.registry.enable(overlay).unwrap();
    assert_eq!(harness.registry.enabled_modules().len(), 2);
}

#[test]
fn test_delete_keeps_state_shared_with_other_versions() {
    let dir = tempfile::tempdir().unwrap();
    let settings: Arc<dyn SettingsStore> = Arc::new(JsonSettingsStore::new(dir.path()));
    let harness = RegistryHarness::with_settings(Some(settings.clone()));

    let active = harness
        .registry
        .register(core_manifest(), None, RegistryHarness::package("Core"))
        .unwrap();
    let mut newer = core_manifest();
    newer.version = "1.3.0".to_string();
    let unused = harness
        .registry
        .register(newer, None, RegistryHarness::package("Core"))
        .unwrap();
    harness.registry.enable(active).unwrap();

    harness.registry.delete(unused).unwrap();
    let installed = harness.registry.services().installed();
    assert!(installed.is_installed("org.example.core"));
    assert!(installed
        .check(&modhost::ModuleDependency::new("org.example.core", "^1.0"))
        .is_available());
    assert!(settings.load("org.example.core").unwrap().unwrap().enabled);

    harness.registry.delete(active).unwrap();
    assert!(!harness
        .registry
        .services()
        .installed()
        .is_installed("org.example.core"));
    assert!(settings.load("org.example.core").unwrap().is_none());
}

#[test]
fn test_dropping_registry_keeps_saved_state() {
    let dir = tempfile::tempdir().unwrap();
    let settings: Arc<dyn SettingsStore> = Arc::new(JsonSettingsStore::new(dir.path()));
    let harness = RegistryHarness::with_settings(Some(settings.clone()));

    let id = harness
        .registry
        .register(core_manifest(), None, RegistryHarness::package("Core"))
        .unwrap();
    harness.registry.enable(id).unwrap();
    drop(harness);

    let saved = settings.load("org.example.core").unwrap().unwrap();
    assert!(!saved.enabled);
}

#[test]
fn test_saved_state_is_loaded_on_register() {
    let dir = tempfile::tempdir().unwrap();
    let settings: Arc<dyn SettingsStore> = Arc::new(JsonSettingsStore::new(dir.path()));
    let mut saved = ModuleState::default();
    saved.settings.insert("theme".to_string(), "dark".to_string());
    settings.save("org.example.core", &saved).unwrap();

    let harness = RegistryHarness::with_settings(Some(settings));
    let id = harness
        .registry
        .register(core_manifest(), None, RegistryHarness::package("Core"))
        .unwrap();

    let theme = harness
        .registry
        .with_module(id, |m| m.state().settings.get("theme").cloned())
        .unwrap();
    assert_eq!(theme.as_deref(), Some("dark"));
}

#[test]
fn test_unregister_disables_every_version() {
    let harness = RegistryHarness::new();
    let first = harness
        .registry
        .register(core_manifest(), None, RegistryHarness::package("Core"))
        .unwrap();
    let mut newer = core_manifest();
    newer.version = "1.3.0".to_string();
    harness
        .registry
        .register(newer, None, RegistryHarness::package("Core"))
        .unwrap();

    harness.registry.enable(first).unwrap();
    assert_eq!(harness.registry.unregister("org.example.core"), 2);
    assert!(harness.registry.module_ids().is_empty());
    assert_eq!(HookCounters::get(&harness.counters.dispose), 1);
    assert_eq!(harness.events().last().map(String::as_str), Some("disabled org.example.core"));
}

#[test]
fn test_registry_denylist() {
    let config = LoaderConfig {
        incompatible: vec![IncompatibleModule {
            namespace: "org.example.core".to_string(),
            versions: None,
        }],
        ..LoaderConfig::default()
    };
    let services = HostServices::new(config, Arc::new(RegisteredImageLoader::new()))
        .with_namespaces(Arc::new(NamespaceRegistry::new()));
    let registry = ModuleRegistry::new(services);

    assert!(registry.is_explicitly_incompatible(&core_manifest()));
    assert!(!registry.is_explicitly_incompatible(&overlay_manifest()));

    let id = registry
        .register(core_manifest(), None, RegistryHarness::package("Core"))
        .unwrap();
    assert!(matches!(
        registry.enable(id),
        Err(ModuleError::ExplicitlyIncompatible(_))
    ));
}
