//! Module loaders
//!
//! Module turns an archive plus its descriptor into a live module instance
//! and the loading unit that backs it. Statically linked modules are built
//! by factory; native modules are staged out of the archive and opened
//! with `libloading`.

use crate::core::error::{PlugError, PlugResult};
use crate::plugin::api::{MODULE_ABI_VERSION, Module, ModuleCreateFn, ModuleFactory};
use crate::plugin::descriptor::{ModuleDescriptor, read_entry};
use crate::plugin::types::ModuleId;
use libloading::{Library, Symbol};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Everything that keeps a module's code resident
///
/// Owned exclusively by the module's record and released on unload.
#[derive(Debug)]
pub struct LoadUnit {
    artifact: PathBuf,
    library: Option<Library>,
    staged: Option<PathBuf>,
    owner: Option<ModuleId>,
    alive: Arc<()>,
}

impl LoadUnit {
    /// Unit for a module whose code is linked into the host
    pub fn new(artifact: impl Into<PathBuf>) -> Self {
        Self {
            artifact: artifact.into(),
            library: None,
            staged: None,
            owner: None,
            alive: Arc::new(()),
        }
    }

    fn with_library(artifact: &Path, library: Library, staged: PathBuf) -> Self {
        Self {
            library: Some(library),
            staged: Some(staged),
            ..Self::new(artifact)
        }
    }

    /// Record which module this unit backs
    pub fn bind(&mut self, owner: ModuleId) {
        self.owner = Some(owner);
    }

    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    pub fn is_dynamic(&self) -> bool {
        self.library.is_some()
    }

    /// Weak liveness token handed to command segments
    pub fn handle(&self) -> Weak<()> {
        Arc::downgrade(&self.alive)
    }

    /// Break the back-reference, close the library and delete the staged copy.
    ///
    /// Best-effort: failures are logged, code may stay mapped if something
    /// still references it.
    pub fn release(mut self) {
        let owner = self.owner.take();
        if let Some(library) = self.library.take() {
            if let Err(e) = library.close() {
                warn!("Failed to close library for {:?}: {}", owner, e);
            }
        }
        if let Some(staged) = self.staged.take() {
            if let Err(e) = std::fs::remove_file(&staged) {
                debug!("Could not delete staged library {}: {}", staged.display(), e);
            }
        }
        debug!("Released loading unit for {}", self.artifact.display());
    }
}

/// Materializes modules for the lifecycle manager
pub trait ModuleLoader: Send + Sync {
    /// Whether this loader knows how to build the described module
    fn accepts(&self, descriptor: &ModuleDescriptor) -> bool;

    /// Build the instance and its unit; runs on the main context
    fn instantiate(
        &self,
        artifact: &Path,
        descriptor: &ModuleDescriptor,
    ) -> PlugResult<(Box<dyn Module>, LoadUnit)>;
}

/// Loader for modules compiled into the host, keyed by descriptor `main`
#[derive(Default, Clone)]
pub struct FactoryLoader {
    factories: HashMap<String, ModuleFactory>,
}

impl FactoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for a descriptor `main` value
    pub fn register<F>(&mut self, main: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Module> + Send + Sync + 'static,
    {
        self.factories.insert(main.into(), Arc::new(factory));
        self
    }

    pub fn with<F>(mut self, main: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Module> + Send + Sync + 'static,
    {
        self.register(main, factory);
        self
    }
}

impl ModuleLoader for FactoryLoader {
    fn accepts(&self, descriptor: &ModuleDescriptor) -> bool {
        descriptor.library.is_none() && self.factories.contains_key(&descriptor.main)
    }

    fn instantiate(
        &self,
        artifact: &Path,
        descriptor: &ModuleDescriptor,
    ) -> PlugResult<(Box<dyn Module>, LoadUnit)> {
        let factory = self.factories.get(&descriptor.main).ok_or_else(|| {
            PlugError::invalid_module(
                &descriptor.name,
                format!("no factory registered for main '{}'", descriptor.main),
            )
        })?;
        Ok((factory(), LoadUnit::new(artifact)))
    }
}

/// Loader for native modules shipped inside the archive
pub struct DylibLoader {
    staging_dir: PathBuf,
}

impl DylibLoader {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
        }
    }

    /// Copy the library entry out of the archive under a unique name, so a
    /// replaced archive never aliases a library that is still mapped.
    fn stage(&self, artifact: &Path, descriptor: &ModuleDescriptor, entry: &str) -> PlugResult<PathBuf> {
        let bytes = read_entry(artifact, entry)
            .map_err(|e| PlugError::invalid_module(&descriptor.name, e.to_string()))?;
        std::fs::create_dir_all(&self.staging_dir)?;
        let staged = self.staging_dir.join(format!(
            "{}-{}.{}",
            descriptor.name,
            Uuid::new_v4().simple(),
            std::env::consts::DLL_EXTENSION
        ));
        std::fs::write(&staged, bytes)?;
        Ok(staged)
    }

    fn open(descriptor: &ModuleDescriptor, staged: &Path) -> PlugResult<(Library, Box<dyn Module>)> {
        let name = descriptor.name.as_str();
        let library = unsafe {
            Library::new(staged).map_err(|e| {
                error!("Failed to load library: {}", e);
                PlugError::invalid_module(name, e.to_string())
            })?
        };

        let instance = {
            let abi: Symbol<unsafe extern "C" fn() -> u32> = unsafe {
                library.get(b"_modswap_abi_version\0").map_err(|_| {
                    PlugError::invalid_module(name, "missing _modswap_abi_version export")
                })?
            };
            let found = unsafe { abi() };
            if found != MODULE_ABI_VERSION {
                return Err(PlugError::invalid_module(
                    name,
                    format!("ABI version {found}, host expects {MODULE_ABI_VERSION}"),
                ));
            }

            let create: Symbol<ModuleCreateFn> = unsafe {
                library.get(b"_modswap_module_create\0").map_err(|_| {
                    PlugError::invalid_module(name, "missing _modswap_module_create export")
                })?
            };
            let raw = unsafe { create() };
            if raw.is_null() {
                return Err(PlugError::invalid_module(name, "module creation returned null"));
            }
            unsafe { *Box::from_raw(raw) }
        };

        Ok((library, instance))
    }
}

impl ModuleLoader for DylibLoader {
    fn accepts(&self, descriptor: &ModuleDescriptor) -> bool {
        descriptor.library.is_some()
    }

    fn instantiate(
        &self,
        artifact: &Path,
        descriptor: &ModuleDescriptor,
    ) -> PlugResult<(Box<dyn Module>, LoadUnit)> {
        let entry = descriptor.library.as_deref().ok_or_else(|| {
            PlugError::invalid_module(&descriptor.name, "descriptor does not name a library")
        })?;

        let staged = self.stage(artifact, descriptor, entry)?;
        match Self::open(descriptor, &staged) {
            Ok((library, instance)) => {
                info!("Opened native module {} from {}", descriptor.name, staged.display());
                Ok((instance, LoadUnit::with_library(artifact, library, staged)))
            }
            Err(e) => {
                let _ = std::fs::remove_file(&staged);
                Err(e)
            }
        }
    }
}

/// Tries each loader in order and uses the first that accepts
#[derive(Default, Clone)]
pub struct LoaderChain {
    loaders: Vec<Arc<dyn ModuleLoader>>,
}

impl LoaderChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, loader: impl ModuleLoader + 'static) -> Self {
        self.loaders.push(Arc::new(loader));
        self
    }
}

impl ModuleLoader for LoaderChain {
    fn accepts(&self, descriptor: &ModuleDescriptor) -> bool {
        self.loaders.iter().any(|l| l.accepts(descriptor))
    }

    fn instantiate(
        &self,
        artifact: &Path,
        descriptor: &ModuleDescriptor,
    ) -> PlugResult<(Box<dyn Module>, LoadUnit)> {
        self.loaders
            .iter()
            .find(|l| l.accepts(descriptor))
            .ok_or_else(|| {
                PlugError::invalid_module(
                    &descriptor.name,
                    format!("no loader accepts main '{}'", descriptor.main),
                )
            })?
            .instantiate(artifact, descriptor)
    }
}
