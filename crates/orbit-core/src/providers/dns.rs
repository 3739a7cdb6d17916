//! DNS provider: name resolution for the guest.
//!
//! `dnsLookup` performs the query and caches the answers, NUL-separated, on
//! the resolver handle; `dnsLookupResult` copies the cached answers out.

use super::{handle, lock};
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::Resolver;
use orbit_vm::memory::{read_string, status, write_into, write_size, write_u32};
use orbit_vm::{
    Caller, CapabilityProvider, Errno, GuestResult, HandleTable, HostOperation, HostState,
    ProviderError,
};
use std::sync::{Arc, Mutex};

type DnsResolver = Resolver<TokioConnectionProvider>;

/// Where resolvers take their upstream configuration from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DnsSource {
    /// The host's system configuration (`/etc/resolv.conf` on Unix).
    #[default]
    System,
    /// Built-in public resolvers; performs no local file I/O.
    BuiltIn,
}

impl std::str::FromStr for DnsSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "system" => Ok(Self::System),
            "builtin" | "default" => Ok(Self::BuiltIn),
            other => Err(format!("unknown DNS source `{other}`")),
        }
    }
}

/// Record family requested by `dnsLookup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    Txt,
    Address,
    Cname,
    Mx,
}

impl TryFrom<i32> for LookupKind {
    type Error = Errno;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Txt),
            1 => Ok(Self::Address),
            2 => Ok(Self::Cname),
            3 => Ok(Self::Mx),
            _ => Err(Errno::InvalidArgument),
        }
    }
}

struct ResolverEntry {
    resolver: Arc<DnsResolver>,
    answers: Option<Vec<u8>>,
}

type Resolvers = Arc<Mutex<HandleTable<ResolverEntry>>>;

/// Join answers into the NUL-separated wire form.
fn encode_answers(answers: &[String]) -> Vec<u8> {
    answers.join("\0").into_bytes()
}

async fn lookup(resolver: &DnsResolver, kind: LookupKind, name: &str) -> GuestResult<Vec<String>> {
    let failed = |e: hickory_resolver::ResolveError| {
        tracing::debug!(name, ?kind, error = %e, "DNS lookup failed");
        Errno::DnsFailure
    };

    let answers: Vec<String> = match kind {
        LookupKind::Txt => resolver
            .txt_lookup(name)
            .await
            .map_err(failed)?
            .iter()
            .map(|txt| txt.to_string())
            .collect(),
        LookupKind::Address => resolver
            .lookup_ip(name)
            .await
            .map_err(failed)?
            .iter()
            .map(|ip| ip.to_string())
            .collect(),
        LookupKind::Cname => resolver
            .lookup(name, RecordType::CNAME)
            .await
            .map_err(failed)?
            .iter()
            .filter_map(|rdata| match rdata {
                RData::CNAME(cname) => Some(cname.to_string()),
                _ => None,
            })
            .collect(),
        LookupKind::Mx => resolver
            .mx_lookup(name)
            .await
            .map_err(failed)?
            .iter()
            .map(|mx| mx.exchange().to_string())
            .collect(),
    };
    Ok(answers)
}

fn prepare_lookup(
    caller: &mut Caller<'_, HostState>,
    resolvers: &Resolvers,
    args: &[i32],
) -> GuestResult<(u32, LookupKind, String, Arc<DnsResolver>)> {
    let id = handle(args[0])?;
    let kind = LookupKind::try_from(args[1])?;
    let name = read_string(caller, args[2], args[3])?;
    let resolver = lock(resolvers)
        .get(id)
        .map(|entry| Arc::clone(&entry.resolver))
        .ok_or(Errno::ResolverNotFound)?;
    Ok((id, kind, name, resolver))
}

/// Serves `dnsNewResolver`, `dnsLookup` and `dnsLookupResult`.
pub struct DnsProvider {
    source: DnsSource,
    resolvers: Resolvers,
}

impl DnsProvider {
    /// Create a provider whose resolvers use `source`.
    pub fn new(source: DnsSource) -> Self {
        Self {
            source,
            resolvers: Arc::new(Mutex::new(HandleTable::new())),
        }
    }

    fn build_resolver(&self) -> Result<DnsResolver, ProviderError> {
        match self.source {
            DnsSource::System => Resolver::builder_tokio()
                .map(|builder| builder.build())
                .map_err(|e| ProviderError::Bind(format!("failed to read system DNS configuration: {e}"))),
            DnsSource::BuiltIn => Ok(Resolver::builder_with_config(
                ResolverConfig::default(),
                TokioConnectionProvider::default(),
            )
            .build()),
        }
    }
}

impl CapabilityProvider for DnsProvider {
    fn name(&self) -> &str {
        "dns"
    }

    fn operations(&mut self) -> Result<Vec<HostOperation>, ProviderError> {
        // handles share one resolver and its record cache
        let shared = Arc::new(self.build_resolver()?);
        tracing::debug!(source = ?self.source, "DNS resolver configured");

        let resolvers = Arc::clone(&self.resolvers);
        let new_resolver = HostOperation::immediate("dnsNewResolver", 1, move |caller, args| {
            let id = lock(&resolvers).insert(ResolverEntry {
                resolver: Arc::clone(&shared),
                answers: None,
            });
            let result = write_u32(caller, args[0], id).inspect_err(|_| {
                lock(&resolvers).remove(id);
            });
            status(result)
        });

        // dnsLookup(resolver, kind, namePtr, nameLen, sizePtr)
        let resolvers = Arc::clone(&self.resolvers);
        let do_lookup = HostOperation::new("dnsLookup", 5, move |mut caller, args| {
            let resolvers = Arc::clone(&resolvers);
            let cancel = caller.data().cancellation().clone();
            let prepared = prepare_lookup(&mut caller, &resolvers, &args);

            Box::pin(async move {
                let (id, kind, name, resolver) = match prepared {
                    Ok(prepared) => prepared,
                    Err(errno) => return Ok(errno.code()),
                };

                let answers = tokio::select! {
                    answers = lookup(&resolver, kind, &name) => answers,
                    _ = cancel.cancelled() => Err(Errno::Cancelled),
                };
                let result = answers.and_then(|answers| {
                    let encoded = encode_answers(&answers);
                    lock(&resolvers)
                        .get_mut(id)
                        .ok_or(Errno::ResolverNotFound)?
                        .answers = Some(encoded.clone());
                    write_size(&mut caller, args[4], &encoded)
                });
                Ok(status(result))
            })
        });

        // dnsLookupResult(resolver, bufPtr, bufLen)
        let resolvers = Arc::clone(&self.resolvers);
        let lookup_result = HostOperation::immediate("dnsLookupResult", 3, move |caller, args| {
            let result = handle(args[0]).and_then(|id| {
                let answers = lock(&resolvers)
                    .get(id)
                    .ok_or(Errno::ResolverNotFound)?
                    .answers
                    .clone()
                    .ok_or(Errno::NotFound)?;
                write_into(caller, args[1], args[2], &answers)
            });
            status(result)
        });

        Ok(vec![new_resolver, do_lookup, lookup_result])
    }

    fn close(&mut self) -> Result<(), ProviderError> {
        let released = lock(&self.resolvers).drain().len();
        if released > 0 {
            tracing::debug!(resolvers = released, "Released DNS resolvers");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_kinds() {
        assert_eq!(LookupKind::try_from(0), Ok(LookupKind::Txt));
        assert_eq!(LookupKind::try_from(1), Ok(LookupKind::Address));
        assert_eq!(LookupKind::try_from(2), Ok(LookupKind::Cname));
        assert_eq!(LookupKind::try_from(3), Ok(LookupKind::Mx));
        assert_eq!(LookupKind::try_from(4), Err(Errno::InvalidArgument));
    }

    #[test]
    fn test_answers_are_nul_separated() {
        let encoded = encode_answers(&["10.0.0.1".into(), "10.0.0.2".into()]);
        assert_eq!(encoded, b"10.0.0.1\x0010.0.0.2");
        assert!(encode_answers(&[]).is_empty());
    }

    #[test]
    fn test_source_parsing() {
        assert_eq!("System".parse::<DnsSource>(), Ok(DnsSource::System));
        assert_eq!("builtin".parse::<DnsSource>(), Ok(DnsSource::BuiltIn));
        assert!("carrier-pigeon".parse::<DnsSource>().is_err());
    }

    #[tokio::test]
    async fn test_builtin_source_binds_without_io() {
        let mut provider = DnsProvider::new(DnsSource::BuiltIn);
        let ops = provider.operations().expect("bind");
        let names: Vec<&str> = ops.iter().map(HostOperation::name).collect();
        assert_eq!(names, ["dnsNewResolver", "dnsLookup", "dnsLookupResult"]);
        provider.close().expect("close");
    }
}
