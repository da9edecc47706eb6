//! Resolution handle given to image loaders and module instances

use std::fmt;
use std::sync::{Arc, Weak};

use crate::module::context::native::NativeLibrary;
use crate::module::context::ContextShared;
use crate::module::loader::CodeImage;

/// Identity of a requested code image
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageIdentity {
    /// Simple image name without extension
    pub name: String,
    /// Culture of a satellite (resource-only) image; None for code images
    pub culture: Option<String>,
}

impl ImageIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            culture: None,
        }
    }

    /// Identity of a culture-specific satellite image
    pub fn satellite(name: impl Into<String>, culture: impl Into<String>) -> Self {
        let culture = culture.into();
        Self {
            name: name.into(),
            culture: if culture.is_empty() { None } else { Some(culture) },
        }
    }

    /// Two-letter language part of the culture (`de` for `de-AT`)
    pub fn language(&self) -> Option<&str> {
        self.culture
            .as_deref()
            .and_then(|culture| culture.split(['-', '_']).next())
    }
}

impl fmt::Display for ImageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.culture {
            Some(culture) => write!(f, "{} [{}]", self.name, culture),
            None => f.write_str(&self.name),
        }
    }
}

/// Resolves dependency images and native libraries against one load context
///
/// Holds only a weak reference: a resolver that outlives its context (or is
/// used after unload) resolves nothing.
#[derive(Clone)]
pub struct DependencyResolver {
    shared: Weak<ContextShared>,
    generation: u64,
}

impl DependencyResolver {
    pub(crate) fn new(shared: &Arc<ContextShared>) -> Self {
        Self {
            shared: Arc::downgrade(shared),
            generation: shared.generation(),
        }
    }

    /// Generation of the context this resolver belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the owning context is still alive and loaded
    pub fn is_active(&self) -> bool {
        self.shared
            .upgrade()
            .map(|shared| !shared.is_unloaded())
            .unwrap_or(false)
    }

    /// Resolve a dependency image from the module package
    ///
    /// Returns None when the image is not in the package, the context is
    /// unloaded, or the owning module is neither enabled nor being composed.
    /// Callers fall back to host-provided images in that case.
    pub fn resolve_image(&self, identity: &ImageIdentity) -> Option<Arc<dyn CodeImage>> {
        self.shared.upgrade()?.resolve_image(identity)
    }

    /// Resolve a native library, staging it out of the package when present
    pub fn resolve_native(&self, name: &str) -> Option<Arc<NativeLibrary>> {
        self.shared.upgrade()?.resolve_native(name)
    }
}

impl fmt::Debug for DependencyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyResolver")
            .field("generation", &self.generation)
            .field("active", &self.is_active())
            .finish()
    }
}
