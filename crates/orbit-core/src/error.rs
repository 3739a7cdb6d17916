//! Error types for orbit-core.

use crate::function::TriggerKind;
use orbit_vm::{BootError, LinkError, TeardownError};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for invocations.
pub type Result<T> = std::result::Result<T, InvokeError>;

/// Errors fetching the raw bytes behind a module reference.
#[derive(Debug, Error)]
pub enum LocateError {
    /// The reference uses a protocol this backend does not serve.
    #[error("unsupported protocol `{found}`, expected `{expected}`")]
    UnsupportedProtocol { expected: String, found: String },

    /// The serialized reference could not be parsed.
    #[error("invalid module reference `{0}`")]
    InvalidReference(String),

    /// Nothing exists at the referenced location.
    #[error("module not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The referenced location exists but cannot be read.
    #[error("access denied: {}", .0.display())]
    AccessDenied(PathBuf),

    /// Any other I/O failure.
    #[error("I/O error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LocateError {
    /// Classify an error from opening `path`.
    pub fn from_io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        let path = path.into();
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path),
            std::io::ErrorKind::PermissionDenied => Self::AccessDenied(path),
            _ => Self::Io { path, source: err },
        }
    }

    /// Returns true if the module does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Errors turning a source stream into guest bytes.
#[derive(Debug, Error)]
pub enum UnwrapError {
    /// Reading, seeking or decompressing failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The container is malformed.
    #[error("failed to decode {container} container: {reason}")]
    Decode {
        container: &'static str,
        reason: String,
    },

    /// A zip archive holds neither the current nor the legacy entry.
    #[error("archive has no `{current}` or `{legacy}` entry")]
    MissingEntry {
        current: &'static str,
        legacy: &'static str,
    },
}

/// Errors resolving a module name to guest bytes.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// The resolver could not map the module name.
    #[error("failed to resolve module `{module}`: {reason}")]
    Lookup { module: String, reason: String },

    /// No backend is registered for the reference's protocol.
    #[error("no backend for protocol `{0}`")]
    NoBackend(String),

    /// The backend failed to open the reference.
    #[error(transparent)]
    Locate(#[from] LocateError),

    /// The source could not be unwrapped.
    #[error(transparent)]
    Unwrap(#[from] UnwrapError),

    /// The blocking loader task died.
    #[error("loader task failed: {0}")]
    Task(String),
}

/// Errors that can occur during an invocation.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// The function is not triggered by HTTP.
    #[error("unsupported trigger `{0}`, only http and https functions can be invoked")]
    UnsupportedTrigger(TriggerKind),

    /// The guest module could not be located or unwrapped.
    #[error("resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    /// The sandbox could not be booted.
    #[error("boot failed: {0}")]
    Boot(#[from] BootError),

    /// The module could not be loaded or the export is unusable.
    #[error("link failed: {0}")]
    Link(#[from] LinkError),

    /// The export did not return before the deadline.
    #[error("`{export}` timed out after {deadline:?}")]
    Timeout { export: String, deadline: Duration },

    /// The guest trapped or returned a non-zero status.
    #[error("guest fault in `{export}`: {reason}")]
    GuestTrap {
        export: String,
        reason: String,
        /// Status returned by the export, if it returned one.
        code: Option<i64>,
    },

    /// The caller abandoned the invocation.
    #[error("invocation of `{0}` was cancelled")]
    Cancelled(String),

    /// Releasing the sandbox failed after a successful call.
    #[error("teardown failed: {0}")]
    Teardown(#[from] TeardownError),
}

impl InvokeError {
    /// Returns true if the guest ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if the failure is attributable to the guest code.
    pub fn is_guest_fault(&self) -> bool {
        matches!(self, Self::GuestTrap { .. } | Self::Timeout { .. })
    }

    /// Returns true if retrying could help.
    ///
    /// Invocations are never retried internally and no failure kind is
    /// considered transient.
    pub fn is_retriable(&self) -> bool {
        false
    }

    /// Returns true if the module could not be found.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Resolution(ResolutionError::Locate(LocateError::NotFound(_)))
        )
    }
}
