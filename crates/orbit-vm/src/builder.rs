//! Builder pattern for booting sandbox instances.

use crate::config::{memory_limit_pages, SandboxConfig};
use crate::error::BootError;
use crate::instance::SandboxInstance;
use crate::registry::CapabilityProvider;
use crate::service::SandboxService;
use tokio_util::sync::CancellationToken;

/// Fluent builder for configuring and booting a [`SandboxInstance`].
///
/// # Example
///
/// ```no_run
/// use orbit_vm::SandboxService;
///
/// # async fn example() -> Result<(), orbit_vm::BootError> {
/// let service = SandboxService::with_defaults();
/// let mut instance = service
///     .instance()
///     .memory_bytes(64 * 1024 * 1024)
///     .boot()
///     .await?;
/// # let _ = instance.close().await;
/// # Ok(())
/// # }
/// ```
pub struct InstanceBuilder<'a> {
    service: &'a SandboxService,
    config: SandboxConfig,
    providers: Vec<Box<dyn CapabilityProvider>>,
    parent: Option<CancellationToken>,
}

impl<'a> InstanceBuilder<'a> {
    pub(crate) fn new(service: &'a SandboxService) -> Self {
        Self {
            service,
            config: SandboxConfig::default(),
            providers: Vec::new(),
            parent: None,
        }
    }

    /// Set the memory ceiling from a declared size in bytes.
    ///
    /// Rounded up to whole pages and capped at the platform maximum.
    pub fn memory_bytes(mut self, bytes: u64) -> Self {
        self.config.memory_pages = memory_limit_pages(bytes);
        self
    }

    /// Set the memory ceiling in pages.
    pub fn memory_pages(mut self, pages: u32) -> Self {
        self.config.memory_pages = pages;
        self
    }

    /// Attach a capability provider.
    pub fn provider(mut self, provider: impl CapabilityProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// Attach several already-boxed providers.
    pub fn providers(mut self, providers: Vec<Box<dyn CapabilityProvider>>) -> Self {
        self.providers.extend(providers);
        self
    }

    /// Derive the instance's cancellation from `parent`.
    pub fn cancellation(mut self, parent: &CancellationToken) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Return the configuration without booting.
    pub fn build_config(&self) -> SandboxConfig {
        self.config
    }

    /// Boot the instance.
    pub async fn boot(self) -> Result<SandboxInstance, BootError> {
        let parent = self.parent.unwrap_or_default();
        self.service
            .boot(self.config, self.providers, &parent)
            .await
    }
}
