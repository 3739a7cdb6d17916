//! Capability registry.
//!
//! Every [`CapabilityProvider`] describes its own host operations as an
//! explicit list. The registry binds them into the guest's import module
//! ([`HOST_MODULE`]) on boot and releases every provider on teardown. Both
//! directions are best-effort: all providers are attempted and every failure
//! is reported together.

use crate::error::{
    BindError, BindFailure, ProviderError, TeardownError, TeardownFailure, TeardownStage,
};
use crate::instance::HostState;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use wasmtime::{Caller, FuncType, Linker, Val, ValType};

/// Import module name under which every host operation is exposed.
pub const HOST_MODULE: &str = "orbit/sdk";

/// Future returned by an asynchronous host operation.
pub type HostFuture<'a> = BoxFuture<'a, anyhow::Result<i32>>;

type Handler = dyn for<'a> Fn(Caller<'a, HostState>, Vec<i32>) -> HostFuture<'a> + Send + Sync;

/// A named function the guest can import.
///
/// Every operation takes `arity` `i32` arguments and returns an `i32`
/// status. Returning `Err` traps the guest.
#[derive(Clone)]
pub struct HostOperation {
    name: String,
    arity: usize,
    handler: Arc<Handler>,
}

impl fmt::Debug for HostOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostOperation")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

impl HostOperation {
    /// Create an operation whose handler may await (e.g. network I/O).
    pub fn new<F>(name: impl Into<String>, arity: usize, handler: F) -> Self
    where
        F: for<'a> Fn(Caller<'a, HostState>, Vec<i32>) -> HostFuture<'a> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            arity,
            handler: Arc::new(handler),
        }
    }

    /// Create an operation that completes without awaiting.
    pub fn immediate<F>(name: impl Into<String>, arity: usize, handler: F) -> Self
    where
        F: Fn(&mut Caller<'_, HostState>, &[i32]) -> i32 + Send + Sync + 'static,
    {
        Self::new(name, arity, move |mut caller, args| {
            let code = handler(&mut caller, &args);
            Box::pin(futures::future::ready(Ok(code)))
        })
    }

    /// Name the guest imports this operation under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of `i32` arguments.
    pub fn arity(&self) -> usize {
        self.arity
    }

    fn func_type(&self, engine: &wasmtime::Engine) -> FuncType {
        FuncType::new(
            engine,
            std::iter::repeat(ValType::I32).take(self.arity),
            [ValType::I32],
        )
    }

    fn define(&self, linker: &mut Linker<HostState>) -> anyhow::Result<()> {
        let ty = self.func_type(linker.engine());
        let handler = Arc::clone(&self.handler);
        let name: Arc<str> = Arc::from(self.name.as_str());
        linker.func_new_async(HOST_MODULE, &self.name, ty, move |caller, params, results| {
            let handler = Arc::clone(&handler);
            let name = Arc::clone(&name);
            Box::new(async move {
                let args = params
                    .iter()
                    .map(|v| v.i32().ok_or_else(|| anyhow::anyhow!("expected i32 argument")))
                    .collect::<anyhow::Result<Vec<i32>>>()?;
                let instance_id = caller.data().instance_id();
                let code = handler(caller, args).await?;
                tracing::trace!(%instance_id, operation = %name, code, "Host operation returned");
                results[0] = Val::I32(code);
                Ok(())
            })
        })?;
        Ok(())
    }
}

/// A cohesive family of host operations, owned by one sandbox instance.
pub trait CapabilityProvider: Send {
    /// Provider name used in logs and composite errors.
    fn name(&self) -> &str;

    /// The operations this provider exposes, in registration order.
    ///
    /// Called once at bind time; resources the operations need are
    /// allocated here.
    fn operations(&mut self) -> Result<Vec<HostOperation>, ProviderError>;

    /// Release everything the provider allocated.
    fn close(&mut self) -> Result<(), ProviderError>;
}

/// The providers attached to one sandbox instance.
pub struct CapabilityRegistry {
    providers: Vec<Box<dyn CapabilityProvider>>,
    bound: Vec<String>,
    closed: bool,
}

impl CapabilityRegistry {
    /// Take ownership of an ordered provider list.
    pub fn new(providers: Vec<Box<dyn CapabilityProvider>>) -> Self {
        Self {
            providers,
            bound: Vec::new(),
            closed: false,
        }
    }

    /// Names of the attached providers.
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Names of the operations bound so far.
    pub fn bound_operations(&self) -> &[String] {
        &self.bound
    }

    /// Bind every provider's operations into `linker`.
    ///
    /// A provider that fails is recorded and skipped; the remaining
    /// providers are still bound. Returns the number of operations bound.
    pub fn bind(&mut self, linker: &mut Linker<HostState>) -> Result<usize, BindError> {
        let mut failures = Vec::new();

        for provider in &mut self.providers {
            let provider_name = provider.name().to_string();

            let operations = match provider.operations() {
                Ok(operations) => operations,
                Err(e) => {
                    tracing::warn!(provider = %provider_name, error = %e, "Provider failed to bind");
                    failures.push(BindFailure {
                        provider: provider_name,
                        source: Box::new(e),
                    });
                    continue;
                }
            };

            if operations.is_empty() {
                tracing::debug!(provider = %provider_name, "Provider exposes no operations");
            }

            for operation in &operations {
                if let Err(e) = operation.define(linker) {
                    tracing::warn!(
                        provider = %provider_name,
                        operation = operation.name(),
                        error = %e,
                        "Failed to register host operation"
                    );
                    failures.push(BindFailure {
                        provider: provider_name.clone(),
                        source: e.into(),
                    });
                    break;
                }
                tracing::trace!(
                    provider = %provider_name,
                    operation = operation.name(),
                    "Bound host operation"
                );
                self.bound.push(operation.name().to_string());
            }
        }

        if failures.is_empty() {
            tracing::debug!(operations = self.bound.len(), "Capability providers bound");
            Ok(self.bound.len())
        } else {
            Err(BindError::new(failures))
        }
    }

    /// Close every provider, newest first, collecting all failures.
    pub fn close(&mut self) -> Result<(), TeardownError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut failures = Vec::new();
        for provider in self.providers.iter_mut().rev() {
            if let Err(e) = provider.close() {
                tracing::warn!(provider = provider.name(), error = %e, "Provider failed to close");
                failures.push(TeardownFailure {
                    stage: TeardownStage::Provider(provider.name().to_string()),
                    source: Box::new(e),
                });
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TeardownError::new(failures))
        }
    }
}

impl Drop for CapabilityRegistry {
    fn drop(&mut self) {
        if !self.closed {
            tracing::warn!("Capability registry dropped without close, releasing providers");
            if let Err(e) = self.close() {
                tracing::error!(error = %e, "Provider release failed during drop");
            }
        }
    }
}
