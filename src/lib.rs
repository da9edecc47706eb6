//! Modhost - module loading and isolation runtime
//!
//! This crate loads third-party module packages into a host process, resolves
//! their managed and native dependencies inside a per-module load context, and
//! unloads them again without leaking staged files, library handles or stale
//! module instances.
//!
//! ## Architecture
//!
//! 1. Resource providers expose a module package as named byte streams
//! 2. The image classifier tells managed images apart from native libraries
//! 3. A load context loads one module's images and stages its native libraries
//! 4. A module manager drives enable/disable transitions for one package
//! 5. The module registry is the reference host that owns every manager
//!
//! ## Design Principles
//!
//! 1. **Malformed input never crashes the host**: every failure becomes a typed error
//! 2. **Fresh context per enable**: load contexts are never reused
//! 3. **Version-skew safety**: a namespace activated once stays pinned to its version
//! 4. **Explicit composition**: modules expose one registered entry point

pub mod config;
pub mod module;
pub mod utils;

pub use config::{ConfigError, IncompatibleModule, LoaderConfig, LoggingConfig};

pub use module::classifier::{classify, classify_bytes, ImageKind};
pub use module::context::{
    DependencyResolver, ImageIdentity, LoadContext, ModuleGate, NativeLibrary, NativeOrigin,
};
pub use module::loader::{
    CodeImage, EntryPoint, ImageLoader, ImageRegistration, ImageSource, RegisteredImage,
    RegisteredImageLoader,
};
pub use module::manager::ModuleManager;
pub use module::parameters::ModuleParameters;
pub use module::provider::{DirectoryProvider, ImageStream, MemoryProvider, ResourceProvider};
pub use module::registry::{
    enable_order, DependencyCheckResult, DependencyChecker, HostServices, InstalledModules,
    JsonSettingsStore, Manifest, MemorySettingsStore, ModuleDependency, ModuleEventListener,
    ModuleId, ModuleRegistry, NamespaceRegistry, SettingsStore,
};
pub use module::traits::{
    CompositionError, LifecycleState, LoadError, Module, ModuleError, ModuleHost, ModuleState,
};
pub use module::validation::{ManifestValidator, ValidationResult};
