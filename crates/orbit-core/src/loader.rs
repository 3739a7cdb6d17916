//! ModuleLoader - resolver, backends and unwrapper composed into one step.

use crate::archive::{self, Container};
use crate::error::ResolutionError;
use crate::locator::{Backend, FileBackend, FileResolver, Resolver};
use crate::reference::ModuleReference;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Guest bytes ready to hand to a sandbox.
#[derive(Debug, Clone)]
pub struct LoadedModule {
    /// Where the bytes came from.
    pub reference: ModuleReference,
    /// Container they were unwrapped from.
    pub container: Container,
    /// The guest binary.
    pub bytes: Vec<u8>,
}

/// Turns module names into guest bytes.
#[derive(Clone)]
pub struct ModuleLoader {
    resolver: Arc<dyn Resolver>,
    backends: HashMap<String, Arc<dyn Backend>>,
}

impl ModuleLoader {
    /// Create a loader with no backends.
    pub fn new(resolver: impl Resolver + 'static) -> Self {
        Self {
            resolver: Arc::new(resolver),
            backends: HashMap::new(),
        }
    }

    /// Loader that serves every module from one local file.
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        Self::new(FileResolver::new(path)).with_backend(FileBackend::new())
    }

    /// Register a backend under its scheme, replacing any previous one.
    pub fn with_backend(mut self, backend: impl Backend + 'static) -> Self {
        self.backends
            .insert(backend.scheme().to_string(), Arc::new(backend));
        self
    }

    /// Resolve a module name to a reference.
    pub fn lookup(&self, module: &str) -> Result<ModuleReference, ResolutionError> {
        self.resolver.lookup(module)
    }

    /// Open and unwrap `reference`. Blocking.
    pub fn open(&self, reference: &ModuleReference) -> Result<LoadedModule, ResolutionError> {
        let backend = self
            .backends
            .get(reference.tag())
            .ok_or_else(|| ResolutionError::NoBackend(reference.tag().to_string()))?;

        let source = backend.get(reference)?;
        let binary = archive::unwrap(source)?;
        let container = binary.container();
        let bytes = binary.into_bytes()?;

        Ok(LoadedModule {
            reference: reference.clone(),
            container,
            bytes,
        })
    }

    /// Resolve, open and unwrap `module` on the blocking thread pool.
    pub async fn load(&self, module: &str) -> Result<LoadedModule, ResolutionError> {
        let start = Instant::now();
        let reference = self.lookup(module)?;
        tracing::debug!(module, reference = %reference, "Resolved module");

        let loader = self.clone();
        let loaded = tokio::task::spawn_blocking(move || loader.open(&reference))
            .await
            .map_err(|e| ResolutionError::Task(e.to_string()))??;

        tracing::debug!(
            module,
            container = %loaded.container,
            size = loaded.bytes.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Module loaded"
        );
        Ok(loaded)
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
