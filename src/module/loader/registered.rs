//! Factory-registration image loader
//!
//! Module packages are compiled into the host (or an adapter crate) and
//! register their entry points by image file name. Loading still reads and
//! classifies the packaged bytes and resolves declared dependencies through the
//! load context, so packaging mistakes surface exactly as they would for
//! dynamically loaded images.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::module::classifier::classify_bytes;
use crate::module::context::{DependencyResolver, ImageIdentity, NativeLibrary};
use crate::module::loader::{CodeImage, ImageLoader, ImageSource};
use crate::module::parameters::ModuleParameters;
use crate::module::traits::{CompositionError, LoadError, Module};

/// Designated module entry point
pub type EntryPoint =
    Arc<dyn Fn(ModuleParameters) -> anyhow::Result<Box<dyn Module>> + Send + Sync>;

/// What an image provides and requires
#[derive(Clone, Default)]
pub struct ImageRegistration {
    entry_point: Option<EntryPoint>,
    dependencies: Vec<ImageIdentity>,
    natives: Vec<String>,
}

impl ImageRegistration {
    /// An image without an entry point (a dependency library)
    pub fn library() -> Self {
        Self::default()
    }

    /// An image whose entry point composes a module
    pub fn module<F>(entry_point: F) -> Self
    where
        F: Fn(ModuleParameters) -> anyhow::Result<Box<dyn Module>> + Send + Sync + 'static,
    {
        Self {
            entry_point: Some(Arc::new(entry_point)),
            ..Self::default()
        }
    }

    /// Declare a dependency image
    pub fn with_dependency(mut self, identity: ImageIdentity) -> Self {
        self.dependencies.push(identity);
        self
    }

    /// Declare a native library
    pub fn with_native(mut self, name: impl Into<String>) -> Self {
        self.natives.push(name.into());
        self
    }

    pub fn has_entry_point(&self) -> bool {
        self.entry_point.is_some()
    }
}

impl fmt::Debug for ImageRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRegistration")
            .field("entry_point", &self.entry_point.is_some())
            .field("dependencies", &self.dependencies)
            .field("natives", &self.natives)
            .finish()
    }
}

/// An image loaded by `RegisteredImageLoader`
///
/// Keeps its resolved dependencies and natives alive for as long as the image
/// itself is held by its context.
pub struct RegisteredImage {
    name: String,
    entry_point: Option<EntryPoint>,
    dependencies: Vec<Arc<dyn CodeImage>>,
    natives: Vec<Arc<NativeLibrary>>,
    symbols: bool,
}

impl RegisteredImage {
    /// Dependency images resolved from the package
    pub fn dependencies(&self) -> &[Arc<dyn CodeImage>] {
        &self.dependencies
    }

    /// Native libraries resolved for this image
    pub fn natives(&self) -> &[Arc<NativeLibrary>] {
        &self.natives
    }
}

impl CodeImage for RegisteredImage {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_symbols(&self) -> bool {
        self.symbols
    }

    fn create_module(&self, params: ModuleParameters) -> Result<Box<dyn Module>, CompositionError> {
        let entry_point = self
            .entry_point
            .as_ref()
            .ok_or_else(|| CompositionError::NoEntryPoint(self.name.clone()))?;
        entry_point(params).map_err(CompositionError::EntryPoint)
    }
}

/// Loader backed by an explicit table of image registrations
#[derive(Default)]
pub struct RegisteredImageLoader {
    registrations: RwLock<HashMap<String, ImageRegistration>>,
    host_images: RwLock<HashSet<String>>,
}

impl RegisteredImageLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an image by its logical file name
    pub fn register(&self, image: impl Into<String>, registration: ImageRegistration) {
        let image = image.into();
        debug!("Registered image {} ({:?})", image, registration);
        self.registrations.write().insert(image, registration);
    }

    /// Builder-style register
    pub fn with_image(self, image: impl Into<String>, registration: ImageRegistration) -> Self {
        self.register(image, registration);
        self
    }

    /// Declare an image the host itself provides; unresolved requests for it
    /// are satisfied by the host instead of failing
    pub fn provide_host_image(&self, name: impl Into<String>) {
        self.host_images.write().insert(name.into());
    }

    pub fn is_registered(&self, image: &str) -> bool {
        self.registrations.read().contains_key(image)
    }
}

impl ImageLoader for RegisteredImageLoader {
    fn load_image(
        &self,
        source: ImageSource,
        resolver: &DependencyResolver,
    ) -> Result<Arc<dyn CodeImage>, LoadError> {
        let kind = classify_bytes(&source.bytes);
        if !kind.is_managed() {
            return Err(LoadError::MalformedImage {
                name: source.name,
                kind,
            });
        }

        // Clone out of the lock: resolving dependencies re-enters this loader
        let registration = self
            .registrations
            .read()
            .get(&source.name)
            .cloned()
            .ok_or_else(|| CompositionError::Unregistered(source.name.clone()))?;

        let mut dependencies = Vec::with_capacity(registration.dependencies.len());
        for identity in &registration.dependencies {
            match resolver.resolve_image(identity) {
                Some(image) => dependencies.push(image),
                None if self.host_images.read().contains(&identity.name) => {
                    debug!("Dependency {} of {} provided by host", identity, source.name);
                }
                None if identity.culture.is_some() => {
                    debug!(
                        "Satellite {} of {} unavailable, using neutral resources",
                        identity, source.name
                    );
                }
                None => {
                    return Err(LoadError::DependencyMissing {
                        image: source.name,
                        dependency: identity.to_string(),
                    })
                }
            }
        }

        let mut natives = Vec::with_capacity(registration.natives.len());
        for library in &registration.natives {
            match resolver.resolve_native(library) {
                Some(native) => natives.push(native),
                None => {
                    return Err(LoadError::NativeMissing {
                        image: source.name,
                        library: library.clone(),
                    })
                }
            }
        }

        info!(
            "Loaded image {} ({} bytes, {} dependencies, {} natives{})",
            source.name,
            source.bytes.len(),
            dependencies.len(),
            natives.len(),
            if source.symbols.is_some() { ", with symbols" } else { "" }
        );

        Ok(Arc::new(RegisteredImage {
            name: source.name,
            entry_point: registration.entry_point,
            dependencies,
            natives,
            symbols: source.symbols.is_some(),
        }))
    }
}

impl fmt::Debug for RegisteredImageLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut images: Vec<String> = self.registrations.read().keys().cloned().collect();
        images.sort();
        f.debug_struct("RegisteredImageLoader")
            .field("images", &images)
            .finish()
    }
}
