//! Native library handles owned by a load context

use libloading::{Library, Symbol};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where a native library was loaded from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeOrigin {
    /// Copied out of the module package into the context's staging directory
    Staged(PathBuf),
    /// Found on the host process search path
    System,
    /// Supplied by the image loader's own search
    Module,
}

/// A loaded native library
///
/// The library is closed when the last handle is dropped; load contexts drop
/// their handles before deleting staged files.
pub struct NativeLibrary {
    name: String,
    origin: NativeOrigin,
    library: Library,
}

impl NativeLibrary {
    /// Load a library that was materialized into a staging directory
    pub fn open_staged(name: &str, path: &Path) -> Result<Self, libloading::Error> {
        // Safety: loading runs the library's initializers; staged libraries come
        // from module packages the host chose to enable.
        let library = unsafe { Library::new(path)? };
        debug!("Loaded staged native library {} from {:?}", name, path);
        Ok(Self {
            name: name.to_string(),
            origin: NativeOrigin::Staged(path.to_path_buf()),
            library,
        })
    }

    /// Load a library by name through the platform search path
    pub fn open_system(name: &str) -> Result<Self, libloading::Error> {
        // Safety: same contract as `open_staged`.
        let library = unsafe { Library::new(name)? };
        debug!("Loaded native library {} from the host search path", name);
        Ok(Self {
            name: name.to_string(),
            origin: NativeOrigin::System,
            library,
        })
    }

    /// Wrap a library located by an image loader
    pub fn from_module(name: &str, library: Library) -> Self {
        Self {
            name: name.to_string(),
            origin: NativeOrigin::Module,
            library,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> &NativeOrigin {
        &self.origin
    }

    /// Look up a symbol
    ///
    /// # Safety
    /// The caller must ensure `T` matches the symbol's actual type.
    pub unsafe fn symbol<T>(&self, symbol: &[u8]) -> Option<Symbol<'_, T>> {
        self.library.get(symbol).ok()
    }
}

impl fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl Drop for NativeLibrary {
    fn drop(&mut self) {
        debug!("Closing native library {}", self.name);
    }
}
