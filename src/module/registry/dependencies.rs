//! Module dependency checking
//!
//! Handles dependency availability checks and enable order for modules.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use tracing::{debug, warn};

use crate::module::registry::manifest::{Manifest, ModuleDependency};
use crate::module::traits::ModuleError;

/// Outcome of checking one dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyCheckResult {
    /// Installed, enabled and version-compatible
    Available,
    /// No module with the namespace is installed
    NotFound,
    /// Installed, but its version does not satisfy the requirement
    AvailableWrongVersion(String),
    /// Installed and compatible, but not enabled
    AvailableNotEnabled,
}

impl DependencyCheckResult {
    pub fn is_available(&self) -> bool {
        matches!(self, DependencyCheckResult::Available)
    }
}

impl fmt::Display for DependencyCheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyCheckResult::Available => f.write_str("available"),
            DependencyCheckResult::NotFound => f.write_str("not installed"),
            DependencyCheckResult::AvailableWrongVersion(found) => {
                write!(f, "installed at incompatible version {}", found)
            }
            DependencyCheckResult::AvailableNotEnabled => f.write_str("installed but not enabled"),
        }
    }
}

/// Host-side dependency availability check
pub trait DependencyChecker: Send + Sync {
    fn check(&self, dependency: &ModuleDependency) -> DependencyCheckResult;
}

#[derive(Debug, Clone)]
struct InstalledModule {
    version: String,
    enabled: bool,
}

/// Dependency checker backed by a namespace -> (version, enabled) table
#[derive(Debug, Default)]
pub struct InstalledModules {
    modules: RwLock<HashMap<String, InstalledModule>>,
}

impl InstalledModules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an installed module (disabled)
    ///
    /// An enabled entry is left untouched: the active package stays the one
    /// dependents are checked against until it is disabled.
    pub fn install(&self, namespace: impl Into<String>, version: impl Into<String>) {
        let namespace = namespace.into();
        let version = version.into();
        let mut modules = self.modules.write();
        match modules.get(&namespace) {
            Some(active) if active.enabled => debug!(
                "{} is enabled at {}, keeping it over installed {}",
                namespace, active.version, version
            ),
            _ => {
                modules.insert(
                    namespace,
                    InstalledModule {
                        version,
                        enabled: false,
                    },
                );
            }
        }
    }

    /// Record the package of a namespace that was just enabled
    pub fn activate(&self, namespace: &str, version: &str) {
        self.modules.write().insert(
            namespace.to_string(),
            InstalledModule {
                version: version.to_string(),
                enabled: true,
            },
        );
    }

    /// Builder-style install of an enabled module
    pub fn with_enabled(self, namespace: &str, version: &str) -> Self {
        self.activate(namespace, version);
        self
    }

    /// Update the enabled flag; unknown namespaces are ignored
    pub fn set_enabled(&self, namespace: &str, enabled: bool) {
        if let Some(module) = self.modules.write().get_mut(namespace) {
            module.enabled = enabled;
        }
    }

    pub fn remove(&self, namespace: &str) -> bool {
        self.modules.write().remove(namespace).is_some()
    }

    pub fn is_installed(&self, namespace: &str) -> bool {
        self.modules.read().contains_key(namespace)
    }
}

impl DependencyChecker for InstalledModules {
    fn check(&self, dependency: &ModuleDependency) -> DependencyCheckResult {
        let modules = self.modules.read();
        let Some(installed) = modules.get(&dependency.namespace) else {
            return DependencyCheckResult::NotFound;
        };

        let compatible = match (
            semver::VersionReq::parse(&dependency.version),
            semver::Version::parse(&installed.version),
        ) {
            (Ok(requirement), Ok(version)) => requirement.matches(&version),
            (Err(e), _) => {
                warn!(
                    "Bad version requirement {:?} on {}: {}",
                    dependency.version, dependency.namespace, e
                );
                false
            }
            (Ok(_), Err(_)) => false,
        };

        if !compatible {
            return DependencyCheckResult::AvailableWrongVersion(installed.version.clone());
        }
        if !installed.enabled {
            return DependencyCheckResult::AvailableNotEnabled;
        }
        DependencyCheckResult::Available
    }
}

/// Order manifests so every module comes after the modules it depends on
///
/// Dependencies on namespaces outside `manifests` are ignored (they are the
/// dependency checker's concern). Fails on cycles.
pub fn enable_order(manifests: &[&Manifest]) -> Result<Vec<String>, ModuleError> {
    let known: BTreeMap<&str, &Manifest> =
        manifests.iter().map(|m| (m.namespace.as_str(), *m)).collect();

    let mut in_degree: BTreeMap<&str, usize> = known.keys().map(|ns| (*ns, 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for (namespace, manifest) in &known {
        for dependency in &manifest.dependencies {
            let dependency = dependency.namespace.as_str();
            if dependency == *namespace || !known.contains_key(dependency) {
                continue;
            }
            dependents.entry(dependency).or_default().push(*namespace);
            if let Some(degree) = in_degree.get_mut(namespace) {
                *degree += 1;
            }
        }
    }

    // Kahn's algorithm; BTreeMap iteration keeps the order deterministic
    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(namespace, _)| *namespace)
        .collect();

    let mut order = Vec::with_capacity(known.len());
    while let Some(namespace) = queue.pop_front() {
        order.push(namespace.to_string());
        for dependent in dependents.get(namespace).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(*dependent);
                }
            }
        }
    }

    if order.len() != known.len() {
        let cyclic: Vec<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree > 0)
            .map(|(namespace, _)| *namespace)
            .collect();
        return Err(ModuleError::DependencyUnmet(format!(
            "Circular dependency between {:?}",
            cyclic
        )));
    }

    debug!("Module enable order: {:?}", order);
    Ok(order)
}
