//! Resource providers
//!
//! A resource provider exposes one module package as named byte streams. The
//! load context reads images, symbol side-streams and native libraries through
//! it and never touches the package storage directly.

pub mod directory;
pub mod memory;

use std::io::{self, Read, Seek};

pub use directory::DirectoryProvider;
pub use memory::MemoryProvider;

/// A readable, seekable stream handed out by a provider
pub trait ImageStream: Read + Seek + Send {}

impl<T: Read + Seek + Send> ImageStream for T {}

/// Storage backend of one module package
///
/// Names are case-sensitive logical paths rooted at the package, separated by
/// `/`. Implementations must support concurrent reads.
pub trait ResourceProvider: Send + Sync {
    /// Whether a named file exists in the package
    fn exists(&self, name: &str) -> bool;

    /// Open a named file
    fn open(&self, name: &str) -> io::Result<Box<dyn ImageStream>>;

    /// Read a named file to the end
    fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        let mut stream = self.open(name)?;
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    /// Remove the package's entire backing storage
    fn delete_root(&self) -> io::Result<()>;

    /// Short description used in diagnostics
    fn describe(&self) -> String;
}

pub(crate) fn not_found(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{} not found in module package", name))
}
