//! File system confinement for module-supplied names
//!
//! Logical names coming from module packages (image names, native library
//! names, satellite culture folders) are resolved against a root directory and
//! must never escape it.

use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Resolves logical, `/`-separated names strictly below a root directory
#[derive(Debug, Clone)]
pub struct FileSystemSandbox {
    /// Allowed root (names resolve only under this directory)
    root: PathBuf,
}

impl FileSystemSandbox {
    /// Create a new file system sandbox
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Resolve a logical name to a path under the root
    ///
    /// Rejects empty names, absolute paths, drive prefixes and any `..` or `.`
    /// component.
    pub fn resolve(&self, logical: &str) -> io::Result<PathBuf> {
        if logical.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty resource name"));
        }

        let mut resolved = self.root.clone();
        for part in logical.split(['/', '\\']) {
            let mut components = Path::new(part).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(segment)), None) => resolved.push(segment),
                _ => {
                    warn!(
                        "Rejected resource name {:?} escaping sandbox {:?}",
                        logical, self.root
                    );
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("resource name {:?} is not confined to {:?}", logical, self.root),
                    ));
                }
            }
        }

        debug!("Resolved {:?} to {:?}", logical, resolved);
        Ok(resolved)
    }

    /// Get the sandbox root
    pub fn root(&self) -> &Path {
        &self.root
    }
}
