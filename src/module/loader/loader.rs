//! Image loader abstraction
//!
//! An `ImageLoader` turns the bytes of a packaged code image into a loaded
//! `CodeImage`, calling back into the owning context's `DependencyResolver`
//! for dependency images and native libraries.

use std::fmt;
use std::sync::Arc;

use crate::module::context::{DependencyResolver, NativeLibrary};
use crate::module::parameters::ModuleParameters;
use crate::module::traits::{CompositionError, LoadError, Module};

/// Bytes of one image read from a module package
#[derive(Clone)]
pub struct ImageSource {
    /// Logical file name inside the package (e.g. `Foo.dll`, `de/Foo.resources.dll`)
    pub name: String,
    /// Image bytes
    pub bytes: Vec<u8>,
    /// Optional debug symbol side-stream
    pub symbols: Option<Vec<u8>>,
}

impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageSource")
            .field("name", &self.name)
            .field("bytes", &self.bytes.len())
            .field("symbols", &self.symbols.as_ref().map(Vec::len))
            .finish()
    }
}

/// A loaded code image
pub trait CodeImage: Send + Sync {
    /// Logical file name the image was loaded from
    fn name(&self) -> &str;

    /// Whether debug symbols were supplied with the image
    fn has_symbols(&self) -> bool {
        false
    }

    /// Run the image's designated entry point
    fn create_module(&self, _params: ModuleParameters) -> Result<Box<dyn Module>, CompositionError> {
        Err(CompositionError::NoEntryPoint(self.name().to_string()))
    }
}

/// Host-provided loader of code images
pub trait ImageLoader: Send + Sync {
    /// Load an image, resolving its dependencies through `resolver`
    fn load_image(
        &self,
        source: ImageSource,
        resolver: &DependencyResolver,
    ) -> Result<Arc<dyn CodeImage>, LoadError>;

    /// Last-chance native lookup relative to a loaded image
    fn resolve_native_fallback(&self, _image: &dyn CodeImage, _name: &str) -> Option<NativeLibrary> {
        None
    }
}
