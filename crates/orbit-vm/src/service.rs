//! SandboxService - boots sandbox instances and tracks how many are live.

use crate::builder::InstanceBuilder;
use crate::config::{SandboxConfig, ServiceConfig};
use crate::error::{BootError, Result};
use crate::instance::SandboxInstance;
use crate::registry::CapabilityProvider;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Instance counters for observability.
///
/// All counters are atomic and can be read without locking.
#[derive(Debug, Default)]
pub struct ServiceStats {
    /// Total instances booted successfully.
    pub booted: AtomicU64,
    /// Total boots that failed after the engine was created.
    pub boot_failures: AtomicU64,
    /// Total instances closed (explicitly or on drop).
    pub closed: AtomicU64,
}

impl ServiceStats {
    /// Get the number of successful boots.
    pub fn booted(&self) -> u64 {
        self.booted.load(Ordering::Relaxed)
    }

    /// Get the number of failed boots.
    pub fn boot_failures(&self) -> u64 {
        self.boot_failures.load(Ordering::Relaxed)
    }

    /// Get the number of closed instances.
    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::Relaxed)
    }

    /// Instances booted and not yet closed.
    pub fn live(&self) -> u64 {
        self.booted().saturating_sub(self.closed())
    }

    pub(crate) fn record_boot(&self) {
        self.booted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_boot_failure(&self) {
        self.boot_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_close(&self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Boots isolated sandbox instances.
///
/// Cheap to clone; clones share the same counters.
#[derive(Debug, Clone)]
pub struct SandboxService {
    config: Arc<ServiceConfig>,
    stats: Arc<ServiceStats>,
}

impl SandboxService {
    /// Create a service with the given engine settings.
    pub fn new(config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            stats: Arc::new(ServiceStats::default()),
        })
    }

    /// Create a service with default settings.
    pub fn with_defaults() -> Self {
        Self {
            config: Arc::new(ServiceConfig::default()),
            stats: Arc::new(ServiceStats::default()),
        }
    }

    /// Start building an instance.
    pub fn instance(&self) -> InstanceBuilder<'_> {
        InstanceBuilder::new(self)
    }

    /// Boot an instance with `providers` bound.
    ///
    /// The instance's cancellation token is a child of `parent`. If any
    /// provider fails to bind, every provider and the engine are released
    /// before the error is returned.
    pub async fn boot(
        &self,
        config: SandboxConfig,
        providers: Vec<Box<dyn CapabilityProvider>>,
        parent: &CancellationToken,
    ) -> std::result::Result<SandboxInstance, BootError> {
        SandboxInstance::boot(
            &self.config,
            config,
            providers,
            parent,
            Arc::clone(&self.stats),
        )
        .await
    }

    /// Engine settings.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Instance counters.
    pub fn stats(&self) -> &ServiceStats {
        &self.stats
    }

    /// Instances booted and not yet closed.
    pub fn live_instances(&self) -> u64 {
        self.stats.live()
    }
}

impl Default for SandboxService {
    fn default() -> Self {
        Self::with_defaults()
    }
}
