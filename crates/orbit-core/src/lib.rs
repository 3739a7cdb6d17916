//! # orbit-core
//!
//! Function invocation layer for orbit: module resolution, host
//! capabilities, and the invocation controller.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    orbit-core (host)                     │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │    Invoker      │────▶│  ModuleLoader            │   │
//! │  │   - invoke()    │     │   Resolver -> Backend    │   │
//! │  └─────────────────┘     │   -> archive::unwrap     │   │
//! │           │              └──────────────────────────┘   │
//! │           ▼                                              │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │ SandboxInstance │◀────│  Providers               │   │
//! │  │ (from orbit-vm) │     │   event, http-client,    │   │
//! │  │  - call()       │     │   self, dns              │   │
//! │  │  - close()      │     └──────────────────────────┘   │
//! │  └─────────────────┘                                    │
//! │                                                          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use bytes::Bytes;
//! use orbit_core::{FunctionSpec, InvocationContext, Invoker, ModuleLoader};
//!
//! # async fn example() -> orbit_core::Result<()> {
//! let invoker = Invoker::new(ModuleLoader::from_file("/srv/functions/ping.wasm"));
//! let spec = FunctionSpec::http("ping", "ping");
//! let ctx = InvocationContext::new("my-project", "fn-ping");
//!
//! let request = http::Request::get("/ping?n=41").body(Bytes::new()).unwrap();
//! let invocation = invoker.invoke(&ctx, &spec, request).await?;
//! println!("{}", String::from_utf8_lossy(invocation.response().body()));
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **One sandbox per call**: Every invocation boots and tears down its own instance
//! - **Bounded execution**: Deadlines and caller cancellation interrupt running guests
//! - **Archive support**: Raw, gzip and zip packaged modules
//! - **Host capabilities**: Request/response access, outbound HTTP, DNS and self identity

pub mod archive;
mod context;
mod error;
mod function;
mod invoker;
mod loader;
pub mod locator;
pub mod providers;
mod reference;

pub use archive::{Container, GuestBinary};
pub use context::InvocationContext;
pub use error::{InvokeError, LocateError, ResolutionError, Result, UnwrapError};
pub use function::{FunctionSpec, TriggerKind};
pub use invoker::{Invocation, Invoker, InvokerConfig, DEFAULT_TIMEOUT};
pub use loader::{LoadedModule, ModuleLoader};
pub use locator::{Backend, FileBackend, FileResolver, Resolver};
pub use reference::{ModuleReference, FILE_PROTOCOL};
