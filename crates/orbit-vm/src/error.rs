//! Error types for orbit-vm.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for orbit-vm operations.
pub type Result<T> = std::result::Result<T, VmError>;

/// Boxed error carried inside composite failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while configuring the sandbox service itself.
#[derive(Debug, Error)]
pub enum VmError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// Error reported by a capability provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider could not allocate what its operations need.
    #[error("bind failed: {0}")]
    Bind(String),

    /// The provider failed to release a resource.
    #[error("release failed: {0}")]
    Release(String),
}

/// One provider that failed to bind.
#[derive(Debug, Error)]
#[error("provider `{provider}`: {source}")]
pub struct BindFailure {
    /// Name of the provider.
    pub provider: String,
    /// Underlying failure.
    pub source: BoxError,
}

/// Every bind failure collected across all providers.
#[derive(Debug, Error)]
#[error("{} capability provider(s) failed to bind:{}", .failures.len(), render(.failures))]
pub struct BindError {
    failures: Vec<BindFailure>,
}

impl BindError {
    pub(crate) fn new(failures: Vec<BindFailure>) -> Self {
        Self { failures }
    }

    /// Failures in the order the providers were attempted.
    pub fn failures(&self) -> &[BindFailure] {
        &self.failures
    }

    /// Names of the providers that failed.
    pub fn providers(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.provider.as_str()).collect()
    }
}

/// Errors that can occur while booting a sandbox instance.
#[derive(Debug, Error)]
pub enum BootError {
    /// Invalid sandbox configuration
    #[error("invalid sandbox configuration: {0}")]
    Config(String),

    /// The per-instance engine could not be created
    #[error("failed to create engine: {0}")]
    Engine(String),

    /// One or more capability providers failed to bind
    #[error(transparent)]
    Bind(#[from] BindError),
}

/// Errors resolving a guest module or one of its exports.
#[derive(Debug, Error)]
pub enum LinkError {
    /// No module was loaded under this name.
    #[error("module `{0}` is not loaded")]
    MissingModule(String),

    /// The guest bytes are not a valid module.
    #[error("failed to compile module `{module}`: {reason}")]
    Compile { module: String, reason: String },

    /// Imports could not be satisfied or the start function trapped.
    #[error("failed to instantiate module `{module}`: {reason}")]
    Instantiate { module: String, reason: String },

    /// Instantiation was interrupted because the instance was cancelled.
    #[error("instantiation of module `{0}` was interrupted")]
    Interrupted(String),

    /// The module has no function export with this name.
    #[error("export `{export}` not found in module `{module}`")]
    MissingExport { module: String, export: String },

    /// The export does not take exactly one integer argument.
    #[error("export `{export}` has unsupported signature {signature}")]
    Signature { export: String, signature: String },

    /// The sandbox was already closed.
    #[error("sandbox instance is closed")]
    Closed,
}

/// Errors returned by a guest call.
#[derive(Debug, Error)]
pub enum CallError {
    /// The deadline elapsed before the export returned.
    #[error("call to `{export}` exceeded its {deadline:?} deadline")]
    DeadlineExceeded { export: String, deadline: Duration },

    /// The caller cancelled the invocation.
    #[error("call to `{export}` was cancelled")]
    Cancelled { export: String },

    /// The guest trapped.
    #[error("guest trapped in `{export}`: {reason}")]
    Trap { export: String, reason: String },

    /// The guest returned a non-zero status.
    #[error("`{export}` returned error code {code}")]
    ErrorCode { export: String, code: i64 },

    /// The sandbox was already closed.
    #[error("sandbox instance is closed")]
    Closed,
}

/// Which teardown step failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownStage {
    /// Releasing a capability provider.
    Provider(String),
    /// Dropping the store, linker and guest instances.
    Runtime,
    /// Stopping the engine and its epoch ticker.
    Vm,
}

impl fmt::Display for TeardownStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provider(name) => write!(f, "provider `{name}`"),
            Self::Runtime => write!(f, "runtime"),
            Self::Vm => write!(f, "vm"),
        }
    }
}

/// One failed teardown step.
#[derive(Debug, Error)]
#[error("{stage}: {source}")]
pub struct TeardownFailure {
    /// The step that failed.
    pub stage: TeardownStage,
    /// Underlying failure.
    pub source: BoxError,
}

/// Every failure collected while releasing a sandbox.
#[derive(Debug, Error)]
#[error("teardown failed with {} error(s):{}", .failures.len(), render(.failures))]
pub struct TeardownError {
    failures: Vec<TeardownFailure>,
}

impl TeardownError {
    pub(crate) fn new(failures: Vec<TeardownFailure>) -> Self {
        Self { failures }
    }

    /// The first failure in release order.
    pub fn first(&self) -> Option<&TeardownFailure> {
        self.failures.first()
    }

    /// All failures in release order.
    pub fn failures(&self) -> &[TeardownFailure] {
        &self.failures
    }

    pub(crate) fn into_failures(self) -> Vec<TeardownFailure> {
        self.failures
    }
}

fn render<E: fmt::Display>(items: &[E]) -> String {
    items.iter().map(|item| format!("\n  - {item}")).collect()
}
