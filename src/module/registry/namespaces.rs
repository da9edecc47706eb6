//! Dirty namespace tracking
//!
//! Once a module namespace has been activated in a process its code may still
//! be referenced from host state, so a different version of that namespace can
//! never be enabled afterwards. The registry only ever grows.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Namespace -> activated version
#[derive(Debug, Default)]
pub struct NamespaceRegistry {
    dirty: Mutex<HashMap<String, String>>,
}

static GLOBAL: OnceLock<Arc<NamespaceRegistry>> = OnceLock::new();

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry for hosts that do not inject their own
    pub fn global() -> Arc<NamespaceRegistry> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(NamespaceRegistry::new())))
    }

    /// Record a namespace as activated at a version
    ///
    /// Idempotent for the same version. The first recorded version wins.
    pub fn mark_dirty(&self, namespace: &str, version: &str) {
        let mut dirty = self.dirty.lock();
        match dirty.get(namespace) {
            Some(existing) if existing == version => {}
            Some(existing) => warn!(
                "Namespace {} already dirty at {}, not recording {}",
                namespace, existing, version
            ),
            None => {
                debug!("Namespace {} is now dirty at {}", namespace, version);
                dirty.insert(namespace.to_string(), version.to_string());
            }
        }
    }

    pub fn is_dirty(&self, namespace: &str) -> bool {
        self.dirty.lock().contains_key(namespace)
    }

    /// Version the namespace was activated at
    pub fn dirty_version(&self, namespace: &str) -> Option<String> {
        self.dirty.lock().get(namespace).cloned()
    }

    /// The activated version, when it differs from `version`
    pub fn conflicts_with(&self, namespace: &str, version: &str) -> Option<String> {
        self.dirty
            .lock()
            .get(namespace)
            .filter(|existing| existing.as_str() != version)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.dirty.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirty.lock().is_empty()
    }
}
