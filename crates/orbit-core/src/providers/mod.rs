//! Host capability providers exposed to guests.
//!
//! - [`event`]: the triggering request and the response being built
//! - [`http_client`]: outbound HTTP
//! - [`self_info`]: the function's own identity
//! - [`dns`]: name resolution

pub mod dns;
pub mod event;
pub mod http_client;
pub mod self_info;

pub use dns::{DnsProvider, DnsSource};
pub use event::{EventProvider, EventTable, HttpEvent};
pub use http_client::HttpClientProvider;
pub use self_info::SelfProvider;

use orbit_vm::{Errno, GuestResult};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a host table. A panic in another host call does not make the data
/// unusable, so poisoning is ignored.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Interpret a guest integer as a handle.
pub(crate) fn handle(arg: i32) -> GuestResult<u32> {
    u32::try_from(arg).map_err(|_| Errno::InvalidArgument)
}
