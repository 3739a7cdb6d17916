//! SandboxInstance - one booted guest runtime and everything it owns.

use crate::config::{SandboxConfig, ServiceConfig};
use crate::error::{BootError, CallError, LinkError, TeardownError};
use crate::registry::{CapabilityProvider, CapabilityRegistry};
use crate::service::ServiceStats;
use crate::vm::{Vm, VmState};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wasmtime::{
    Func, Instance, Linker, Module, Store, StoreLimits, StoreLimitsBuilder, Trap, UpdateDeadline,
    Val, ValType,
};

/// Data stored alongside the guest in its wasmtime store.
///
/// Host operations reach it through `caller.data()`.
pub struct HostState {
    limits: StoreLimits,
    cancel: CancellationToken,
    instance_id: Uuid,
}

impl HostState {
    /// Token cancelled when the invocation is abandoned.
    ///
    /// Host operations that block (network, DNS) must race against it.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Id of the owning sandbox instance.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }
}

/// Lifecycle state of a sandbox instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Booted and accepting modules and calls
    Ready,
    /// Teardown in progress
    Closing,
    /// All resources released
    Closed,
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceState::Ready => write!(f, "ready"),
            InstanceState::Closing => write!(f, "closing"),
            InstanceState::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleWidth {
    I32,
    I64,
}

/// A resolved guest export that accepts a single event handle.
#[derive(Debug, Clone)]
pub struct GuestFunction {
    module: String,
    export: String,
    func: Func,
    param: HandleWidth,
    returns_code: bool,
}

impl GuestFunction {
    /// Module the export belongs to.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Export name.
    pub fn export(&self) -> &str {
        &self.export
    }
}

struct Runtime {
    store: Store<HostState>,
    linker: Linker<HostState>,
    modules: HashMap<String, Instance>,
}

/// A booted sandbox.
///
/// Owns its engine, store, linker, loaded modules and capability providers.
/// Call [`SandboxInstance::close`] exactly once when done; dropping without
/// closing releases what it can synchronously and logs a warning.
pub struct SandboxInstance {
    id: Uuid,
    config: SandboxConfig,
    state: InstanceState,
    registry: CapabilityRegistry,
    runtime: Option<Runtime>,
    vm: Vm,
    cancel: CancellationToken,
    created_at: Instant,
    stats: Arc<ServiceStats>,
}

impl SandboxInstance {
    pub(crate) async fn boot(
        service: &ServiceConfig,
        config: SandboxConfig,
        providers: Vec<Box<dyn CapabilityProvider>>,
        parent: &CancellationToken,
        stats: Arc<ServiceStats>,
    ) -> Result<Self, BootError> {
        config.validate().map_err(BootError::Config)?;

        let id = Uuid::new_v4();
        let start = Instant::now();
        tracing::debug!(instance_id = %id, memory_pages = config.memory_pages, "Booting sandbox instance");

        let mut vm = Vm::start(service, id)?;
        let cancel = parent.child_token();

        let memory_bytes = usize::try_from(config.memory_bytes()).unwrap_or(usize::MAX);
        let limits = StoreLimitsBuilder::new().memory_size(memory_bytes).build();
        let mut store = Store::new(
            vm.engine(),
            HostState {
                limits,
                cancel: cancel.clone(),
                instance_id: id,
            },
        );
        store.limiter(|state| &mut state.limits);
        store.set_epoch_deadline(1);
        store.epoch_deadline_callback(|ctx| {
            if ctx.data().cancel.is_cancelled() {
                Err(Trap::Interrupt.into())
            } else {
                Ok(UpdateDeadline::Yield(1))
            }
        });

        let mut linker = Linker::new(vm.engine());
        let mut registry = CapabilityRegistry::new(providers);

        if let Err(e) = registry.bind(&mut linker) {
            tracing::warn!(instance_id = %id, error = %e, "Capability bind failed, releasing sandbox");
            if let Err(close_err) = registry.close() {
                tracing::warn!(instance_id = %id, error = %close_err, "Provider release failed after bind error");
            }
            drop(linker);
            drop(store);
            if let Err(vm_err) = vm.stop() {
                tracing::warn!(instance_id = %id, error = %vm_err, "Engine stop failed after bind error");
            }
            cancel.cancel();
            stats.record_boot_failure();
            return Err(BootError::Bind(e));
        }

        stats.record_boot();
        tracing::info!(
            instance_id = %id,
            providers = ?registry.provider_names(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Sandbox instance booted"
        );

        Ok(Self {
            id,
            config,
            state: InstanceState::Ready,
            registry,
            runtime: Some(Runtime {
                store,
                linker,
                modules: HashMap::new(),
            }),
            vm,
            cancel,
            created_at: Instant::now(),
            stats,
        })
    }

    /// Unique id of this instance.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// State of the underlying engine.
    pub fn vm_state(&self) -> VmState {
        self.vm.state()
    }

    /// Configuration the instance was booted with.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Time since boot.
    pub fn uptime(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Token shared with every host operation of this instance.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Names of the attached capability providers.
    pub fn providers(&self) -> Vec<&str> {
        self.registry.provider_names()
    }

    /// Compile and instantiate guest bytes under `name`.
    ///
    /// Instantiation runs the module's start function, which is interrupted
    /// like any other guest code once the instance token is cancelled.
    pub async fn load_module(&mut self, name: &str, bytes: &[u8]) -> Result<(), LinkError> {
        if self.state != InstanceState::Ready {
            return Err(LinkError::Closed);
        }
        let runtime = self.runtime.as_mut().ok_or(LinkError::Closed)?;

        let module = Module::new(self.vm.engine(), bytes).map_err(|e| LinkError::Compile {
            module: name.to_string(),
            reason: format!("{e:#}"),
        })?;

        let instance = runtime
            .linker
            .instantiate_async(&mut runtime.store, &module)
            .await
            .map_err(|e| {
                if self.cancel.is_cancelled() {
                    LinkError::Interrupted(name.to_string())
                } else {
                    LinkError::Instantiate {
                        module: name.to_string(),
                        reason: format!("{e:#}"),
                    }
                }
            })?;

        runtime.modules.insert(name.to_string(), instance);
        tracing::debug!(instance_id = %self.id, module = name, "Module loaded");
        Ok(())
    }

    /// Resolve an export of a loaded module.
    ///
    /// The export must take one `i32` or `i64` argument and return nothing
    /// or a single integer.
    pub fn function(&mut self, module: &str, export: &str) -> Result<GuestFunction, LinkError> {
        if self.state != InstanceState::Ready {
            return Err(LinkError::Closed);
        }
        let runtime = self.runtime.as_mut().ok_or(LinkError::Closed)?;

        let instance = runtime
            .modules
            .get(module)
            .copied()
            .ok_or_else(|| LinkError::MissingModule(module.to_string()))?;

        let func = instance
            .get_func(&mut runtime.store, export)
            .ok_or_else(|| LinkError::MissingExport {
                module: module.to_string(),
                export: export.to_string(),
            })?;

        let ty = func.ty(&runtime.store);
        let params: Vec<ValType> = ty.params().collect();
        let results: Vec<ValType> = ty.results().collect();

        let param = match params.as_slice() {
            [ValType::I32] => Some(HandleWidth::I32),
            [ValType::I64] => Some(HandleWidth::I64),
            _ => None,
        };
        let results_ok = match results.as_slice() {
            [] | [ValType::I32] | [ValType::I64] => true,
            _ => false,
        };

        match param {
            Some(param) if results_ok => Ok(GuestFunction {
                module: module.to_string(),
                export: export.to_string(),
                func,
                param,
                returns_code: !results.is_empty(),
            }),
            _ => Err(LinkError::Signature {
                export: export.to_string(),
                signature: render_signature(&params, &results),
            }),
        }
    }

    /// Call `function` with `handle`, bounded by `deadline`.
    ///
    /// When the deadline elapses or the parent token is cancelled, the
    /// guest is interrupted at its next epoch check and the call returns
    /// once it has actually stopped.
    pub async fn call(
        &mut self,
        function: &GuestFunction,
        handle: u32,
        deadline: Duration,
    ) -> Result<(), CallError> {
        if self.state != InstanceState::Ready {
            return Err(CallError::Closed);
        }
        let runtime = self.runtime.as_mut().ok_or(CallError::Closed)?;
        let export = function.export.clone();

        let arg = match function.param {
            HandleWidth::I32 => Val::I32(handle as i32),
            HandleWidth::I64 => Val::I64(i64::from(handle)),
        };
        let mut results = if function.returns_code {
            vec![Val::I32(0)]
        } else {
            Vec::new()
        };

        let args = [arg];
        let cancel = self.cancel.clone();
        let start = Instant::now();
        tracing::debug!(instance_id = %self.id, export = %export, handle, ?deadline, "Calling guest");

        let outcome = {
            let call = function
                .func
                .call_async(&mut runtime.store, &args, &mut results);
            tokio::pin!(call);

            tokio::select! {
                res = &mut call => Outcome::Finished(res),
                _ = tokio::time::sleep(deadline) => {
                    cancel.cancel();
                    let _ = call.await;
                    Outcome::DeadlineExceeded
                }
                _ = cancel.cancelled() => {
                    let _ = call.await;
                    Outcome::Cancelled
                }
            }
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Outcome::Finished(Ok(())) => {
                let code = match results.first() {
                    Some(Val::I32(code)) => i64::from(*code),
                    Some(Val::I64(code)) => *code,
                    _ => 0,
                };
                if code != 0 {
                    tracing::debug!(instance_id = %self.id, export = %export, code, elapsed_ms, "Guest returned error code");
                    return Err(CallError::ErrorCode { export, code });
                }
                tracing::debug!(instance_id = %self.id, export = %export, elapsed_ms, "Guest call completed");
                Ok(())
            }
            Outcome::Finished(Err(_)) if cancel.is_cancelled() => {
                tracing::debug!(instance_id = %self.id, export = %export, elapsed_ms, "Guest call cancelled");
                Err(CallError::Cancelled { export })
            }
            Outcome::Finished(Err(e)) => {
                tracing::debug!(instance_id = %self.id, export = %export, error = %e, elapsed_ms, "Guest trapped");
                Err(CallError::Trap {
                    export,
                    reason: format!("{e:#}"),
                })
            }
            Outcome::DeadlineExceeded => {
                tracing::warn!(instance_id = %self.id, export = %export, ?deadline, elapsed_ms, "Guest call exceeded deadline");
                Err(CallError::DeadlineExceeded { export, deadline })
            }
            Outcome::Cancelled => {
                tracing::debug!(instance_id = %self.id, export = %export, elapsed_ms, "Guest call cancelled");
                Err(CallError::Cancelled { export })
            }
        }
    }

    /// Release everything the instance owns.
    ///
    /// Providers are released first, then the store and loaded modules,
    /// then the engine. Every step runs even if an earlier one failed; all
    /// failures are returned together. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<(), TeardownError> {
        if self.state == InstanceState::Closed {
            return Ok(());
        }
        self.state = InstanceState::Closing;
        tracing::debug!(instance_id = %self.id, "Closing sandbox instance");

        let mut failures = Vec::new();

        if let Err(e) = self.registry.close() {
            failures.extend(e.into_failures());
        }

        if let Some(runtime) = self.runtime.take() {
            tracing::trace!(instance_id = %self.id, modules = runtime.modules.len(), "Dropping runtime");
            drop(runtime);
        }

        if let Err(e) = self.vm.stop() {
            failures.push(e);
        }

        self.finish();

        if failures.is_empty() {
            tracing::info!(instance_id = %self.id, uptime_ms = self.uptime().as_millis() as u64, "Sandbox instance closed");
            Ok(())
        } else {
            let err = TeardownError::new(failures);
            tracing::warn!(instance_id = %self.id, error = %err, "Sandbox instance closed with errors");
            Err(err)
        }
    }

    fn finish(&mut self) {
        self.cancel.cancel();
        self.state = InstanceState::Closed;
        self.stats.record_close();
    }
}

impl Drop for SandboxInstance {
    fn drop(&mut self) {
        if self.state == InstanceState::Closed {
            return;
        }
        tracing::warn!(instance_id = %self.id, "Sandbox instance dropped without close");
        if let Err(e) = self.registry.close() {
            tracing::error!(instance_id = %self.id, error = %e, "Provider release failed during drop");
        }
        self.runtime.take();
        self.vm.abort();
        self.finish();
    }
}

impl std::fmt::Debug for SandboxInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxInstance")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

enum Outcome {
    Finished(anyhow::Result<()>),
    DeadlineExceeded,
    Cancelled,
}

fn render_signature(params: &[ValType], results: &[ValType]) -> String {
    let names = |types: &[ValType]| -> String {
        types
            .iter()
            .map(|t| match t {
                ValType::I32 => "i32",
                ValType::I64 => "i64",
                ValType::F32 => "f32",
                ValType::F64 => "f64",
                ValType::V128 => "v128",
                ValType::Ref(_) => "ref",
            })
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!("({}) -> ({})", names(params), names(results))
}
