//! In-memory module packages
//!
//! Used for packages that were already unpacked from an archive and for tests.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::{self, Cursor};
use std::sync::Arc;

use crate::module::provider::{not_found, ImageStream, ResourceProvider};

/// Serves a module package from memory
#[derive(Debug, Default)]
pub struct MemoryProvider {
    label: String,
    files: RwLock<HashMap<String, Arc<[u8]>>>,
}

impl MemoryProvider {
    /// Create an empty provider
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            files: RwLock::new(HashMap::new()),
        }
    }

    /// Builder-style insert
    pub fn with_file(self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(name, bytes);
        self
    }

    /// Add or replace a file
    pub fn insert(&self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        let bytes: Vec<u8> = bytes.into();
        self.files.write().insert(name.into(), Arc::from(bytes));
    }

    /// Remove a file
    pub fn remove(&self, name: &str) -> bool {
        self.files.write().remove(name).is_some()
    }

    /// Number of files in the package
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

impl ResourceProvider for MemoryProvider {
    fn exists(&self, name: &str) -> bool {
        self.files.read().contains_key(name)
    }

    fn open(&self, name: &str) -> io::Result<Box<dyn ImageStream>> {
        let bytes = self.files.read().get(name).cloned().ok_or_else(|| not_found(name))?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        self.files
            .read()
            .get(name)
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| not_found(name))
    }

    fn delete_root(&self) -> io::Result<()> {
        self.files.write().clear();
        Ok(())
    }

    fn describe(&self) -> String {
        format!("memory package {}", self.label)
    }
}
