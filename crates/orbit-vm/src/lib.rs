//! Orbit VM - isolated WebAssembly sandboxes with pluggable host capabilities.
//!
//! This crate boots one sandbox per invocation:
//!
//! - A private wasmtime engine with an epoch ticker ([`vm`])
//! - A store with a memory ceiling derived from the declared size ([`config`])
//! - Host operations contributed by [`CapabilityProvider`]s and bound into
//!   the guest import module [`HOST_MODULE`] ([`registry`])
//! - Deadline- and cancellation-bounded guest calls ([`SandboxInstance::call`])
//! - Ordered teardown with composite error reporting ([`SandboxInstance::close`])
//!
//! # Example
//!
//! ```no_run
//! use orbit_vm::SandboxService;
//! use std::time::Duration;
//!
//! # async fn example(guest: &[u8]) -> anyhow::Result<()> {
//! let service = SandboxService::with_defaults();
//! let mut instance = service.instance().memory_bytes(16 << 20).boot().await?;
//!
//! instance.load_module("main", guest).await?;
//! let handler = instance.function("main", "handle")?;
//! let outcome = instance.call(&handler, 1, Duration::from_secs(5)).await;
//!
//! instance.close().await?;
//! outcome?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod handles;
pub mod instance;
pub mod memory;
pub mod registry;
pub mod service;
pub mod vm;

pub use builder::InstanceBuilder;
pub use config::{memory_limit_pages, SandboxConfig, ServiceConfig, MAX_MEMORY_PAGES, PAGE_SIZE};
pub use error::{
    BindError, BindFailure, BootError, CallError, LinkError, ProviderError, Result,
    TeardownError, TeardownFailure, TeardownStage, VmError,
};
pub use handles::HandleTable;
pub use instance::{GuestFunction, HostState, InstanceState, SandboxInstance};
pub use memory::{Errno, GuestResult};
pub use registry::{CapabilityProvider, CapabilityRegistry, HostFuture, HostOperation, HOST_MODULE};
pub use service::{SandboxService, ServiceStats};
pub use vm::VmState;

// Re-exported so providers can name the caller type without depending on
// wasmtime directly.
pub use wasmtime::Caller;
