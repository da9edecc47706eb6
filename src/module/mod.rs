//! Module system for modhost
//!
//! This module provides in-process, per-load-context module support: packages
//! are loaded from a resource provider, composed through a registered entry
//! point and torn down again on disable.
//!
//! ## Architecture
//!
//! - **Load Context Isolation**: Each enable cycle gets a fresh context with its own images and staging directory
//! - **Resolution Gating**: Dependencies resolve only while the module is enabled or composing
//! - **Native Staging**: Module-supplied native libraries are materialized outside the package before loading
//! - **Failure Containment**: Module failures surface as typed errors, never as host crashes
//! - **Version Pinning**: Namespaces stay dirty for the registry's lifetime once activated

pub mod classifier;
pub mod context;
pub mod loader;
pub mod manager;
pub mod parameters;
pub mod provider;
pub mod registry;
pub mod sandbox;
pub mod traits;
pub mod validation;

pub use traits::{
    CompositionError, LifecycleState, LoadError, Module, ModuleError, ModuleHost, ModuleState,
};
pub use manager::ModuleManager;
pub use context::{DependencyResolver, LoadContext};
