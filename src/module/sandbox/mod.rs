//! Confinement of module-supplied file names
//!
//! Keeps package lookups and native staging inside their own directories.

pub mod filesystem;

pub use filesystem::FileSystemSandbox;
