//! Per-module isolated load contexts
//!
//! A `LoadContext` owns every code image and native library loaded on behalf of
//! one module enable cycle. Dependencies are resolved from the module's own
//! package first, natives are staged into a private directory, and the whole
//! set is released together on `unload`. Every context carries a fresh
//! generation so a module re-enabled after disable never observes state from
//! its previous cycle.

pub mod native;
pub mod resolver;
pub mod staging;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::io::{Seek, SeekFrom};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use native::{NativeLibrary, NativeOrigin};
pub use resolver::{DependencyResolver, ImageIdentity};
pub use staging::NativeStaging;

use crate::config::LoaderConfig;
use crate::module::classifier::classify;
use crate::module::loader::{CodeImage, ImageLoader, ImageSource};
use crate::module::parameters::ModuleParameters;
use crate::module::provider::ResourceProvider;
use crate::module::registry::manifest::Manifest;
use crate::module::traits::{CompositionError, LoadError, Module};
use crate::utils::panic_message;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Shared enabled flag of a module
///
/// The manager opens the gate once the module is enabled; contexts refuse to
/// resolve dependency images while it is closed, except during composition.
#[derive(Debug, Clone, Default)]
pub struct ModuleGate(Arc<AtomicBool>);

impl ModuleGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Images and natives owned by a context
#[derive(Default)]
struct ImageSet {
    primary: Option<Arc<dyn CodeImage>>,
    dependencies: HashMap<String, Arc<dyn CodeImage>>,
    natives: HashMap<String, Arc<NativeLibrary>>,
}

/// Context state reachable from resolvers
pub(crate) struct ContextShared {
    generation: u64,
    module: String,
    config: LoaderConfig,
    provider: Arc<dyn ResourceProvider>,
    loader: Arc<dyn ImageLoader>,
    gate: ModuleGate,
    composing: AtomicBool,
    loaded: AtomicBool,
    unloaded: AtomicBool,
    staging: NativeStaging,
    images: Mutex<ImageSet>,
}

impl ContextShared {
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn is_unloaded(&self) -> bool {
        self.unloaded.load(Ordering::SeqCst)
    }

    fn accepts_dependencies(&self) -> bool {
        self.gate.is_open() || self.composing.load(Ordering::SeqCst)
    }

    pub(crate) fn resolve_image(
        self: &Arc<Self>,
        identity: &ImageIdentity,
    ) -> Option<Arc<dyn CodeImage>> {
        if self.is_unloaded() {
            debug!(
                "Context {} of {} is unloaded, not resolving {}",
                self.generation, self.module, identity
            );
            return None;
        }

        if !self.accepts_dependencies() {
            debug!(
                "Module {} is not enabled, not resolving {}",
                self.module, identity
            );
            return None;
        }

        let file_name = match &identity.culture {
            None => self.config.image_file_name(&identity.name),
            Some(culture) => {
                let language = identity.language().unwrap_or_default();
                if language.eq_ignore_ascii_case(&self.config.default_language) {
                    return None;
                }
                format!("{}/{}", culture, self.config.image_file_name(&identity.name))
            }
        };

        if let Some(cached) = self.images.lock().dependencies.get(&file_name) {
            return Some(Arc::clone(cached));
        }

        if !self.provider.exists(&file_name) {
            debug!(
                "Requested dependency {} was not found in {}",
                file_name,
                self.provider.describe()
            );
            return None;
        }

        debug!(
            "Requested dependency {} was found by module {}",
            identity, self.module
        );

        match self.load_packaged_image(&file_name) {
            Ok(image) => {
                let mut images = self.images.lock();
                if self.is_unloaded() {
                    return None;
                }
                Some(Arc::clone(
                    images.dependencies.entry(file_name).or_insert(image),
                ))
            }
            Err(e) => {
                warn!(
                    "Module {} failed to load dependency {}: {}",
                    self.module, file_name, e
                );
                None
            }
        }
    }

    pub(crate) fn resolve_native(self: &Arc<Self>, name: &str) -> Option<Arc<NativeLibrary>> {
        if self.is_unloaded() {
            return None;
        }

        if let Some(cached) = self.images.lock().natives.get(name) {
            return Some(Arc::clone(cached));
        }

        let library = if self.provider.exists(name) {
            self.stage_native(name)?
        } else {
            self.load_fallback_native(name)?
        };

        let mut images = self.images.lock();
        if self.is_unloaded() {
            return None;
        }
        Some(Arc::clone(
            images
                .natives
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(library)),
        ))
    }

    fn stage_native(&self, name: &str) -> Option<NativeLibrary> {
        let mut stream = match self.provider.open(name) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Module {} could not open native {}: {}", self.module, name, e);
                return None;
            }
        };

        if classify(&mut stream).is_managed() {
            warn!(
                "Module {} requested {} as a native library but it is a managed image",
                self.module, name
            );
            return None;
        }

        let staged = stream
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.staging.stage(name, &mut stream));
        let path = match staged {
            Ok(path) => path,
            Err(e) => {
                warn!("Module {} failed to stage native {}: {}", self.module, name, e);
                return None;
            }
        };

        match NativeLibrary::open_staged(name, &path) {
            Ok(library) => Some(library),
            Err(e) => {
                warn!("Module {} failed to load native {}: {}", self.module, name, e);
                None
            }
        }
    }

    fn load_fallback_native(&self, name: &str) -> Option<NativeLibrary> {
        match NativeLibrary::open_system(name) {
            Ok(library) => Some(library),
            Err(e) => {
                debug!("Native {} not found on the host search path: {}", name, e);
                let primary = self.images.lock().primary.clone()?;
                self.loader.resolve_native_fallback(primary.as_ref(), name)
            }
        }
    }

    fn load_packaged_image(self: &Arc<Self>, file_name: &str) -> Result<Arc<dyn CodeImage>, LoadError> {
        let bytes = self.provider.read(file_name).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LoadError::AssetMissing(file_name.to_string()),
            _ => LoadError::Io(e),
        })?;

        let symbols_name = self.config.symbols_file_name(file_name);
        let symbols = if self.provider.exists(&symbols_name) {
            match self.provider.read(&symbols_name) {
                Ok(symbols) => Some(symbols),
                Err(e) => {
                    debug!("Ignoring unreadable symbols {}: {}", symbols_name, e);
                    None
                }
            }
        } else {
            None
        };

        let source = ImageSource {
            name: file_name.to_string(),
            bytes,
            symbols,
        };
        let resolver = DependencyResolver::new(self);
        let loader = Arc::clone(&self.loader);

        catch_unwind(AssertUnwindSafe(|| loader.load_image(source, &resolver))).unwrap_or_else(
            |payload| {
                Err(LoadError::Composition(CompositionError::Panicked(
                    panic_message(payload.as_ref()),
                )))
            },
        )
    }

    fn release_images(&self) -> (usize, usize) {
        let ImageSet {
            primary,
            dependencies,
            natives,
        } = std::mem::take(&mut *self.images.lock());
        let images = dependencies.len() + usize::from(primary.is_some());
        (images, natives.len())
    }

    fn unload(&self) {
        if self.unloaded.swap(true, Ordering::SeqCst) {
            return;
        }

        let (images, natives) = self.release_images();
        self.loaded.store(false, Ordering::SeqCst);

        match self.staging.clear() {
            Ok(removed) if removed > 0 => {
                debug!("Removed {} staged files from {:?}", removed, self.staging.dir())
            }
            Ok(_) => {}
            Err(e) => warn!(
                "Failed to clean staging directory {:?}: {}",
                self.staging.dir(),
                e
            ),
        }

        info!(
            "Unloaded context {} of {} ({} images, {} native libraries)",
            self.generation, self.module, images, natives
        );
    }
}

/// Marks the composition window; dependency resolution is allowed inside it
struct CompositionWindow<'a>(&'a AtomicBool);

impl<'a> CompositionWindow<'a> {
    fn open(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for CompositionWindow<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Isolated load context of one module enable cycle
pub struct LoadContext {
    shared: Arc<ContextShared>,
}

impl LoadContext {
    /// Create a context for a module; nothing is loaded or staged yet
    pub fn new(
        manifest: &Manifest,
        provider: Arc<dyn ResourceProvider>,
        loader: Arc<dyn ImageLoader>,
        gate: ModuleGate,
        config: &LoaderConfig,
    ) -> Self {
        let generation = NEXT_GENERATION.fetch_add(1, Ordering::SeqCst);
        let staging_dir = config.staging_dir.join(format!(
            "{}-{}",
            sanitize_dir_name(&manifest.namespace),
            generation
        ));

        debug!(
            "Created load context {} for {} (staging {:?})",
            generation,
            manifest.detailed_name(),
            staging_dir
        );

        Self {
            shared: Arc::new(ContextShared {
                generation,
                module: manifest.detailed_name(),
                config: config.clone(),
                provider,
                loader,
                gate,
                composing: AtomicBool::new(false),
                loaded: AtomicBool::new(false),
                unloaded: AtomicBool::new(false),
                staging: NativeStaging::new(staging_dir),
                images: Mutex::new(ImageSet::default()),
            }),
        }
    }

    /// Load the primary image and compose the module instance
    ///
    /// Returns `Ok(None)` when this context already composed its module.
    pub fn load(
        &self,
        primary: &str,
        params: ModuleParameters,
    ) -> Result<Option<Box<dyn Module>>, LoadError> {
        if self.is_unloaded() {
            return Err(LoadError::Unloaded);
        }
        if self.is_loaded() {
            debug!(
                "Context {} of {} is already loaded",
                self.shared.generation, self.shared.module
            );
            return Ok(None);
        }

        let _window = CompositionWindow::open(&self.shared.composing);
        match self.compose(primary, params) {
            Ok(module) => {
                self.shared.loaded.store(true, Ordering::SeqCst);
                info!(
                    "Composed module {} from {} (context {})",
                    self.shared.module, primary, self.shared.generation
                );
                Ok(Some(module))
            }
            Err(e) => {
                warn!("Module {} failed to load: {}", self.shared.module, e);
                self.shared.release_images();
                Err(e)
            }
        }
    }

    fn compose(&self, primary: &str, params: ModuleParameters) -> Result<Box<dyn Module>, LoadError> {
        if !self.shared.provider.exists(primary) {
            return Err(LoadError::AssetMissing(primary.to_string()));
        }

        let image = self.shared.load_packaged_image(primary)?;
        self.shared.images.lock().primary = Some(Arc::clone(&image));

        let params = params.with_resolver(self.resolver());
        let module = catch_unwind(AssertUnwindSafe(|| image.create_module(params)))
            .map_err(|payload| CompositionError::Panicked(panic_message(payload.as_ref())))??;
        Ok(module)
    }

    /// Release every image and native library and delete staged files
    ///
    /// Idempotent. The caller must have dropped the module instance first.
    pub fn unload(&self) {
        self.shared.unload();
    }

    /// Resolution handle bound to this context
    pub fn resolver(&self) -> DependencyResolver {
        DependencyResolver::new(&self.shared)
    }

    /// Resolve a dependency image (see `DependencyResolver::resolve_image`)
    pub fn resolve_image(&self, identity: &ImageIdentity) -> Option<Arc<dyn CodeImage>> {
        self.shared.resolve_image(identity)
    }

    /// Resolve a native library (see `DependencyResolver::resolve_native`)
    pub fn resolve_native(&self, name: &str) -> Option<Arc<NativeLibrary>> {
        self.shared.resolve_native(name)
    }

    pub fn generation(&self) -> u64 {
        self.shared.generation
    }

    pub fn is_loaded(&self) -> bool {
        self.shared.loaded.load(Ordering::SeqCst)
    }

    pub fn is_unloaded(&self) -> bool {
        self.shared.is_unloaded()
    }

    /// Private native staging directory (created on first staged native)
    pub fn staging_dir(&self) -> &Path {
        self.shared.staging.dir()
    }

    /// File names of every code image currently held, primary first
    pub fn loaded_images(&self) -> Vec<String> {
        let images = self.shared.images.lock();
        let mut names: Vec<String> = images
            .primary
            .iter()
            .map(|image| image.name().to_string())
            .collect();
        let mut dependencies: Vec<String> = images.dependencies.keys().cloned().collect();
        dependencies.sort();
        names.extend(dependencies);
        names
    }

    /// Names of native libraries currently held
    pub fn native_libraries(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.images.lock().natives.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadContext")
            .field("module", &self.shared.module)
            .field("generation", &self.shared.generation)
            .field("loaded", &self.is_loaded())
            .field("unloaded", &self.is_unloaded())
            .finish()
    }
}

impl Drop for LoadContext {
    fn drop(&mut self) {
        self.shared.unload();
    }
}

fn sanitize_dir_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
