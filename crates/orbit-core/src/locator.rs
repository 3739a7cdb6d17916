//! Module location: resolvers map module names to references, backends turn
//! references into raw byte streams.

use crate::archive::SourceStream;
use crate::error::{LocateError, ResolutionError};
use crate::reference::{ModuleReference, FILE_PROTOCOL};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Fetches the bytes behind a [`ModuleReference`].
///
/// Implementations hold no per-call mutable state and may be used from
/// several threads at once.
pub trait Backend: Send + Sync {
    /// Protocol tag this backend serves.
    fn scheme(&self) -> &str;

    /// Open the referenced source, positioned at offset 0.
    fn get(&self, reference: &ModuleReference) -> Result<SourceStream, LocateError>;
}

/// Serves `file` references from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileBackend;

impl FileBackend {
    /// Create a file backend.
    pub fn new() -> Self {
        Self
    }
}

impl Backend for FileBackend {
    fn scheme(&self) -> &str {
        FILE_PROTOCOL
    }

    fn get(&self, reference: &ModuleReference) -> Result<SourceStream, LocateError> {
        if reference.tag() != FILE_PROTOCOL {
            return Err(LocateError::UnsupportedProtocol {
                expected: FILE_PROTOCOL.to_string(),
                found: reference.tag().to_string(),
            });
        }

        let path = Path::new(reference.value());
        let file = File::open(path).map_err(|e| LocateError::from_io(path, e))?;
        tracing::debug!(path = %path.display(), "Opened module file");
        Ok(Box::new(file))
    }
}

/// Maps a module name to a [`ModuleReference`].
pub trait Resolver: Send + Sync {
    /// Resolve `module`.
    fn lookup(&self, module: &str) -> Result<ModuleReference, ResolutionError>;
}

/// Resolves every module name to one fixed file.
#[derive(Debug, Clone)]
pub struct FileResolver {
    path: PathBuf,
}

impl FileResolver {
    /// Resolve to `path`, made absolute against the current directory.
    ///
    /// If the path cannot be made absolute it is used as given.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        Self { path }
    }

    /// The absolute path every module resolves to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Resolver for FileResolver {
    fn lookup(&self, module: &str) -> Result<ModuleReference, ResolutionError> {
        let value = self
            .path
            .to_str()
            .ok_or_else(|| ResolutionError::Lookup {
                module: module.to_string(),
                reason: format!("path {} is not valid UTF-8", self.path.display()),
            })?;
        Ok(ModuleReference::file(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_file_backend_rejects_other_protocols() {
        let reference = ModuleReference::new("ipfs", "bafy");
        let err = FileBackend::new().get(&reference).err().expect("must fail");
        assert!(matches!(err, LocateError::UnsupportedProtocol { .. }));
    }

    #[test]
    fn test_file_backend_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing.wasm");
        let reference = ModuleReference::file(path.to_string_lossy());
        let err = FileBackend::new().get(&reference).err().expect("must fail");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_serialized_reference_opens_same_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("guest.wasm");
        std::fs::write(&path, b"\0asm").expect("write");

        let reference = FileResolver::new(&path).lookup("functions/ping").expect("lookup");
        let reparsed: ModuleReference = reference.to_string().parse().expect("parse");

        let mut bytes = Vec::new();
        FileBackend::new()
            .get(&reparsed)
            .expect("open")
            .read_to_end(&mut bytes)
            .expect("read");
        assert_eq!(bytes, b"\0asm");
    }

    #[test]
    fn test_file_resolver_absolutizes() {
        let resolver = FileResolver::new("build/artifact.zip");
        assert!(resolver.path().is_absolute());
        let reference = resolver.lookup("anything").expect("lookup");
        assert_eq!(reference.tag(), "file");
        assert!(reference.value().ends_with("build/artifact.zip"));
    }
}
