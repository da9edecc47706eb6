//! Module registry
//!
//! Handles manifest parsing, dependency checking, dirty namespace tracking,
//! state persistence and the reference host.

pub mod dependencies;
pub mod host;
pub mod manifest;
pub mod namespaces;
pub mod settings;

pub use dependencies::{enable_order, DependencyCheckResult, DependencyChecker, InstalledModules};
pub use host::{HostServices, ModuleEventListener, ModuleId, ModuleRegistry};
pub use manifest::{Manifest, ModuleDependency};
pub use namespaces::NamespaceRegistry;
pub use settings::{JsonSettingsStore, MemorySettingsStore, SettingsStore};
