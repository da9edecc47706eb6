//! Test utilities for module system testing
//!
//! Provides PE image builders, mock modules with hook counters, a recording
//! host and a fixture wiring them to isolated directories.

use parking_lot::Mutex;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use modhost::module::provider::ImageStream;
use modhost::{
    DependencyChecker, DependencyResolver, ImageLoader, ImageRegistration, InstalledModules,
    LoaderConfig, Manifest, MemoryProvider, Module, ModuleHost, ModuleManager, ModuleParameters,
    ModuleState, NamespaceRegistry, RegisteredImageLoader, ResourceProvider,
};

/// Build a minimal PE image with the given optional-header magic and CLI header RVA
pub fn pe_image(magic: u16, cli_rva: u32) -> Vec<u8> {
    let mut bytes = vec![0u8; 512];
    bytes[0] = b'M';
    bytes[1] = b'Z';
    bytes[0x3C..0x40].copy_from_slice(&0x80u32.to_le_bytes());
    bytes[0x80..0x84].copy_from_slice(b"PE\0\0");
    bytes[0x80 + 24..0x80 + 26].copy_from_slice(&magic.to_le_bytes());
    let cli = 0x80 + if magic == 0x10b { 232 } else { 248 };
    bytes[cli..cli + 4].copy_from_slice(&cli_rva.to_le_bytes());
    bytes
}

/// A code image carrying a CLI header
pub fn managed_image() -> Vec<u8> {
    pe_image(0x20b, 0x2008)
}

/// A PE image without a CLI header
pub fn native_image() -> Vec<u8> {
    pe_image(0x20b, 0)
}

/// Shared observation point for mock module hooks
#[derive(Default)]
pub struct HookCounters {
    pub created: AtomicUsize,
    pub initialize: AtomicUsize,
    pub load: AtomicUsize,
    pub dispose: AtomicUsize,
    pub dropped: AtomicUsize,
    /// Parameters the last instance was composed with
    pub params: Mutex<Option<ModuleParameters>>,
}

impl HookCounters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Resolver handed to the last composed instance
    pub fn resolver(&self) -> Option<DependencyResolver> {
        self.params
            .lock()
            .as_ref()
            .and_then(|params| params.resolver().cloned())
    }
}

/// How a mock module misbehaves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Failure {
    #[default]
    None,
    InitializeError,
    LoadPanic,
    DisposeError,
    DisposePanic,
}

/// Module recording every hook call
pub struct MockModule {
    name: String,
    failure: Failure,
    counters: Arc<HookCounters>,
}

impl Module for MockModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self) -> anyhow::Result<()> {
        self.counters.initialize.fetch_add(1, Ordering::SeqCst);
        if self.failure == Failure::InitializeError {
            anyhow::bail!("initialize refused");
        }
        Ok(())
    }

    fn load(&mut self) -> anyhow::Result<()> {
        self.counters.load.fetch_add(1, Ordering::SeqCst);
        if self.failure == Failure::LoadPanic {
            panic!("load exploded");
        }
        Ok(())
    }

    fn dispose(&mut self) -> anyhow::Result<()> {
        self.counters.dispose.fetch_add(1, Ordering::SeqCst);
        match self.failure {
            Failure::DisposeError => anyhow::bail!("dispose refused"),
            Failure::DisposePanic => panic!("dispose exploded"),
            _ => Ok(()),
        }
    }
}

impl Drop for MockModule {
    fn drop(&mut self) {
        self.counters.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

/// Registration whose entry point composes a `MockModule`
pub fn mock_registration(counters: &Arc<HookCounters>, failure: Failure) -> ImageRegistration {
    let counters = Arc::clone(counters);
    ImageRegistration::module(move |params: ModuleParameters| {
        counters.created.fetch_add(1, Ordering::SeqCst);
        let name = params.manifest.name.clone();
        *counters.params.lock() = Some(params);
        Ok(Box::new(MockModule {
            name,
            failure,
            counters: Arc::clone(&counters),
        }) as Box<dyn Module>)
    })
}

/// Host recording every notification and save
pub struct RecordingHost {
    pub config: LoaderConfig,
    pub namespaces: Arc<NamespaceRegistry>,
    pub installed: InstalledModules,
    pub loader: Arc<RegisteredImageLoader>,
    pub enabled_events: Mutex<Vec<String>>,
    pub disabled_events: Mutex<Vec<String>>,
    pub saved: Mutex<Vec<(String, ModuleState)>>,
    pub unregistered: Mutex<Vec<String>>,
}

impl RecordingHost {
    pub fn enabled_count(&self) -> usize {
        self.enabled_events.lock().len()
    }

    pub fn disabled_count(&self) -> usize {
        self.disabled_events.lock().len()
    }

    pub fn last_saved(&self) -> Option<ModuleState> {
        self.saved.lock().last().map(|(_, state)| state.clone())
    }
}

impl ModuleHost for RecordingHost {
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
        self.loader.clone()
    }

    fn on_module_enabled(&self, manager: &ModuleManager) {
        assert!(manager.is_enabled());
        self.enabled_events
            .lock()
            .push(manager.manifest().namespace.clone());
    }

    fn on_module_disabled(&self, manager: &ModuleManager) {
        assert!(!manager.is_enabled());
        self.disabled_events
            .lock()
            .push(manager.manifest().namespace.clone());
    }

    fn save_settings(&self, namespace: &str, state: &ModuleState) -> anyhow::Result<()> {
        self.saved.lock().push((namespace.to_string(), state.clone()));
        Ok(())
    }

    fn unregister_module(&self, namespace: &str) {
        self.unregistered.lock().push(namespace.to_string());
    }
}

/// Provider wrapper counting every access
pub struct CountingProvider {
    pub inner: MemoryProvider,
    pub accesses: AtomicUsize,
}

impl CountingProvider {
    pub fn new(inner: MemoryProvider) -> Self {
        Self {
            inner,
            accesses: AtomicUsize::new(0),
        }
    }

    pub fn accesses(&self) -> usize {
        self.accesses.load(Ordering::SeqCst)
    }
}

impl ResourceProvider for CountingProvider {
    fn exists(&self, name: &str) -> bool {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        self.inner.exists(name)
    }

    fn open(&self, name: &str) -> io::Result<Box<dyn ImageStream>> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        self.inner.open(name)
    }

    fn delete_root(&self) -> io::Result<()> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_root()
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}

/// Test fixture for module system tests
pub struct ModuleTestFixture {
    /// Temporary directory for test data
    pub temp_dir: TempDir,
    /// Native staging root
    pub staging_dir: PathBuf,
    /// Module data root
    pub data_dir: PathBuf,
    /// Host shared by every manager of the fixture
    pub host: Arc<RecordingHost>,
    /// Hook counters of the mock module registered as `Foo.dll`
    pub counters: Arc<HookCounters>,
}

impl ModuleTestFixture {
    /// Fixture with default configuration and a well-behaved `Foo.dll`
    pub fn new() -> Self {
        Self::with_config(|_| {}, Failure::None)
    }

    /// Fixture with adjusted configuration and a `Foo.dll` that fails as requested
    pub fn with_config(configure: impl FnOnce(&mut LoaderConfig), failure: Failure) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let staging_dir = temp_dir.path().join("staging");
        let data_dir = temp_dir.path().join("data");

        let mut config = LoaderConfig {
            staging_dir: staging_dir.clone(),
            data_dir: data_dir.clone(),
            ..LoaderConfig::default()
        };
        configure(&mut config);

        let counters = Arc::new(HookCounters::default());
        let loader = Arc::new(RegisteredImageLoader::new());
        loader.register("Foo.dll", mock_registration(&counters, failure));

        let host = Arc::new(RecordingHost {
            config,
            namespaces: Arc::new(NamespaceRegistry::new()),
            installed: InstalledModules::new(),
            loader,
            enabled_events: Mutex::new(Vec::new()),
            disabled_events: Mutex::new(Vec::new()),
            saved: Mutex::new(Vec::new()),
            unregistered: Mutex::new(Vec::new()),
        });

        Self {
            temp_dir,
            staging_dir,
            data_dir,
            host,
            counters,
        }
    }

    /// Manifest of the `Foo` module
    pub fn foo_manifest(&self, version: &str) -> Manifest {
        Manifest::new("org.example.foo", "Foo", version, "Foo")
    }

    /// Package containing a managed `Foo.dll`
    pub fn foo_package(&self) -> MemoryProvider {
        MemoryProvider::new("foo").with_file("Foo.dll", managed_image())
    }

    /// Manager over a provider, using the fixture host
    pub fn manager(&self, manifest: Manifest, provider: Arc<dyn ResourceProvider>) -> ModuleManager {
        let host: Arc<dyn ModuleHost> = self.host.clone();
        ModuleManager::new(manifest, ModuleState::default(), provider, host)
    }

    /// Manager for `Foo` at `version` backed by `foo_package`
    pub fn foo_manager(&self, version: &str) -> ModuleManager {
        self.manager(self.foo_manifest(version), Arc::new(self.foo_package()))
    }

    /// Number of entries currently under the staging root
    pub fn staged_dirs(&self) -> usize {
        std::fs::read_dir(&self.staging_dir)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}
