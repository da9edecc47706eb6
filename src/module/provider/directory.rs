//! Directory-backed module packages

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::module::provider::{not_found, ImageStream, ResourceProvider};
use crate::module::sandbox::FileSystemSandbox;

/// Serves a module package from an unpacked directory
#[derive(Debug, Clone)]
pub struct DirectoryProvider {
    sandbox: FileSystemSandbox,
}

impl DirectoryProvider {
    /// Create a provider rooted at a package directory
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            sandbox: FileSystemSandbox::new(root),
        }
    }

    /// Package root
    pub fn root(&self) -> &Path {
        self.sandbox.root()
    }

    fn path_of(&self, name: &str) -> Option<PathBuf> {
        self.sandbox.resolve(name).ok()
    }
}

impl ResourceProvider for DirectoryProvider {
    fn exists(&self, name: &str) -> bool {
        self.path_of(name).map(|p| p.is_file()).unwrap_or(false)
    }

    fn open(&self, name: &str) -> io::Result<Box<dyn ImageStream>> {
        let path = self.sandbox.resolve(name)?;
        if !path.is_file() {
            return Err(not_found(name));
        }
        debug!("Opening {:?} from {:?}", name, self.root());
        Ok(Box::new(File::open(path)?))
    }

    fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        let path = self.sandbox.resolve(name)?;
        if !path.is_file() {
            return Err(not_found(name));
        }
        fs::read(path)
    }

    fn delete_root(&self) -> io::Result<()> {
        info!("Deleting module package directory {:?}", self.root());
        match fs::remove_dir_all(self.root()) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn describe(&self) -> String {
        format!("directory {}", self.root().display())
    }
}
