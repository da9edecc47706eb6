//! Module state persistence

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::module::sandbox::FileSystemSandbox;
use crate::module::traits::ModuleState;

/// Storage of per-module state records
pub trait SettingsStore: Send + Sync {
    /// Load a module's state; None when nothing was saved yet
    fn load(&self, namespace: &str) -> anyhow::Result<Option<ModuleState>>;

    /// Save a module's state
    fn save(&self, namespace: &str, state: &ModuleState) -> anyhow::Result<()>;

    /// Forget a module's state
    fn remove(&self, namespace: &str) -> anyhow::Result<()>;
}

/// One pretty-printed JSON file per module namespace
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    sandbox: FileSystemSandbox,
}

impl JsonSettingsStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            sandbox: FileSystemSandbox::new(dir),
        }
    }

    fn path_of(&self, namespace: &str) -> io::Result<PathBuf> {
        self.sandbox.resolve(&format!("{}.json", namespace))
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self, namespace: &str) -> anyhow::Result<Option<ModuleState>> {
        let path = self.path_of(namespace)?;
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn save(&self, namespace: &str, state: &ModuleState) -> anyhow::Result<()> {
        let path = self.path_of(namespace)?;
        fs::create_dir_all(self.sandbox.root())?;
        let contents = serde_json::to_string_pretty(state)?;
        fs::write(&path, contents)?;
        debug!("Saved state of {} to {:?}", namespace, path);
        Ok(())
    }

    fn remove(&self, namespace: &str) -> anyhow::Result<()> {
        match fs::remove_file(self.path_of(namespace)?) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Volatile store for hosts without persistence and for tests
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    states: RwLock<HashMap<String, ModuleState>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self, namespace: &str) -> anyhow::Result<Option<ModuleState>> {
        Ok(self.states.read().get(namespace).cloned())
    }

    fn save(&self, namespace: &str, state: &ModuleState) -> anyhow::Result<()> {
        self.states.write().insert(namespace.to_string(), state.clone());
        Ok(())
    }

    fn remove(&self, namespace: &str) -> anyhow::Result<()> {
        self.states.write().remove(namespace);
        Ok(())
    }
}
