//! Private native-library staging directories
//!
//! Native loaders resolve by file path, so module-supplied native libraries are
//! copied out of the package into a directory owned by one load context and
//! loaded from there. The directory is created lazily and removed on unload.

use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::module::sandbox::FileSystemSandbox;

/// Staging directory of one load context
#[derive(Debug)]
pub struct NativeStaging {
    sandbox: FileSystemSandbox,
    lock: Mutex<()>,
}

impl NativeStaging {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            sandbox: FileSystemSandbox::new(dir),
            lock: Mutex::new(()),
        }
    }

    /// Staging directory path (may not exist yet)
    pub fn dir(&self) -> &Path {
        self.sandbox.root()
    }

    pub fn exists(&self) -> bool {
        self.dir().is_dir()
    }

    /// Copy a library into the staging directory, returning the staged path
    ///
    /// A library staged earlier in the same context is reused as is.
    pub fn stage(&self, name: &str, source: &mut dyn Read) -> io::Result<PathBuf> {
        let _guard = self.lock.lock();
        let target = self.sandbox.resolve(name)?;

        if target.is_file() {
            debug!("Native library {} already staged at {:?}", name, target);
            return Ok(target);
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = File::create(&target)?;
        let copied = io::copy(source, &mut file)?;
        file.flush()?;
        file.sync_all()?;

        debug!("Staged native library {} ({} bytes) at {:?}", name, copied, target);
        Ok(target)
    }

    /// Delete every staged file and the directory itself
    ///
    /// Returns the number of entries removed. A directory that never existed
    /// is not an error.
    pub fn clear(&self) -> io::Result<usize> {
        let _guard = self.lock.lock();

        let entries = match fs::read_dir(self.dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        let mut first_error = None;
        for entry in entries {
            let result = entry.and_then(|entry| {
                let path = entry.path();
                if entry.file_type()?.is_dir() {
                    fs::remove_dir_all(&path)
                } else {
                    fs::remove_file(&path)
                }
            });
            match result {
                Ok(()) => removed += 1,
                Err(e) => {
                    warn!("Failed to remove staged file in {:?}: {}", self.dir(), e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Err(e) = fs::remove_dir(self.dir()) {
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }
}
